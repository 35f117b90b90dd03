//! Progress events emitted during a run
//!
//! The coordinator publishes immutable events on an unbounded channel. How
//! they are displayed is up to the subscriber.

use std::path::PathBuf;
use tokio::sync::mpsc;

/// One step of an archive run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The archive root exists and the seed is queued
    Started { seed: String, archive_root: PathBuf },

    /// A frontier entry reached a terminal state
    PageDone {
        url: String,
        success: bool,
        pages_done: u64,

        /// Pages accepted into the frontier so far
        total_estimate: u64,
    },

    /// Pages re-rewritten after the crawl
    Relinked { pages: usize },

    Assessing,

    Finished { crawled: usize, broken: usize },
}

/// Sending half held by the coordinator
///
/// Sending never blocks and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub(crate) fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sender = Some(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let mut sink = ProgressSink::default();
        let mut events = sink.subscribe();

        sink.emit(ProgressEvent::Assessing);
        sink.emit(ProgressEvent::Finished { crawled: 2, broken: 1 });
        drop(sink);

        assert_eq!(events.recv().await, Some(ProgressEvent::Assessing));
        assert_eq!(
            events.recv().await,
            Some(ProgressEvent::Finished { crawled: 2, broken: 1 })
        );
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_emit_without_subscriber_is_noop() {
        let sink = ProgressSink::default();
        sink.emit(ProgressEvent::Assessing);
    }
}
