//! Change notifications emitted by the cache and the installed mod set.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    Mods(Vec<String>),
}

/// What kind of change a refresh made, so listeners can skip work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeHint {
    None,
    SortOnly,
    VersionOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ModsAppended { mod_ids: Vec<String> },
    Refreshed { scope: RefreshScope, hint: ChangeHint },
    MetadataChanged { mod_ids: Vec<String> },
}

/// Fan-out of [`ChangeEvent`]s to any number of subscribers.
///
/// Dropped receivers are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventSink {
    subscribers: Vec<UnboundedSender<ChangeEvent>>,
}

impl EventSink {
    pub fn subscribe(&mut self) -> UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: ChangeEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_subscribers() {
        let mut sink = EventSink::default();
        let mut first = sink.subscribe();
        let second = sink.subscribe();
        drop(second);

        sink.emit(ChangeEvent::MetadataChanged {
            mod_ids: vec!["modA".into()],
        });
        assert_eq!(
            first.try_recv().unwrap(),
            ChangeEvent::MetadataChanged {
                mod_ids: vec!["modA".into()]
            }
        );
        assert_eq!(sink.subscribers.len(), 1);
    }
}
