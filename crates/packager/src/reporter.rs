use indicatif::ProgressBar;
use tracing::{debug, info, warn};

/// User-facing progress reporting.
///
/// Reporters are passed explicitly into the packaging flow, so the same
/// flow may render a spinner in the terminal, write log lines or be
/// captured in tests.
pub(crate) trait Reporter: Send + Sync {
    /// A new stage of the current operation has started.
    fn stage(&self, message: &str);

    /// Something unexpected happened, but the operation continues.
    fn warn(&self, message: &str);

    /// The operation completed successfully.
    fn finish(&self, message: &str);
}

impl Reporter for ProgressBar {
    fn stage(&self, message: &str) {
        debug!("{message}");
        self.set_message(message.to_owned());
    }

    fn warn(&self, message: &str) {
        debug!("{message}");
        self.println(message);
    }

    fn finish(&self, message: &str) {
        debug!("{message}");
        self.finish_with_message(message.to_owned());
    }
}

/// Reporter that only emits [`tracing`] events.
pub(crate) struct TracingReporter;

impl Reporter for TracingReporter {
    fn stage(&self, message: &str) {
        info!("{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }

    fn finish(&self, message: &str) {
        info!("{message}");
    }
}
