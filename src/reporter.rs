//! Callbacks through which long-running operations talk to a front end.

use tracing::info;

pub trait Reporter {
    /// Starts a progress indicator. `total` is unknown for some downloads.
    fn begin_progress(&self, _label: &str, _total: Option<u64>) {}

    fn update_progress(&self, _current: u64, _total: Option<u64>) {}

    fn end_progress(&self) {}

    fn text_output(&self, line: &str);

    /// Asks the user a yes/no question.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Reporter for scripted use: logs output and answers every prompt the
/// same way.
#[derive(Debug, Clone, Copy)]
pub struct LogReporter {
    pub assume_yes: bool,
}

impl LogReporter {
    pub fn new(assume_yes: bool) -> Self {
        LogReporter { assume_yes }
    }
}

impl Reporter for LogReporter {
    fn text_output(&self, line: &str) {
        info!("{}", line);
    }

    fn confirm(&self, prompt: &str) -> bool {
        info!("{} {}", prompt, if self.assume_yes { "yes" } else { "no" });
        self.assume_yes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_reporter_answers_fixed() {
        let reporter = LogReporter::new(false);
        reporter.begin_progress("Downloading", None);
        reporter.text_output("hello");
        assert!(!reporter.confirm("Continue?"));
        assert!(LogReporter::new(true).confirm("Continue?"));
    }
}
