mod cache;
mod mods;
mod util;

pub use cache::{cache_add, cache_add_installed, cache_list, cache_update};
pub use mods::{mods_export, mods_install, mods_list, mods_remove, mods_sync};
