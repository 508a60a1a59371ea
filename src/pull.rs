//! Image pull monitoring.
//!
//! An image pull arrives as a stream of progress events terminated by either
//! exhaustion (success) or an error item. [`PullMonitor::drive`] forwards each
//! event to the log exactly once, in arrival order, and then releases exactly
//! one completion signal to whoever holds the paired [`PullSignal`], also on
//! failure, so the provisioner fails fast instead of hanging. The signal is a
//! oneshot sender held as an `Option`; a duplicated terminal event finds it
//! already taken and becomes a logged no-op.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;

use crate::engine::{EngineError, PullProgress};

/// Terminal outcome of a monitored pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The stream ended without an error item.
    Complete {
        /// How many progress events were observed.
        events: u64,
    },
    /// The stream reported an error.
    Failed {
        /// Reason for failure.
        reason: String,
    },
}

/// Consumes a pull progress stream and signals completion exactly once.
pub struct PullMonitor {
    done: Option<oneshot::Sender<PullOutcome>>,
    events: u64,
}

/// The provisioner's half: blocks until the monitored pull terminates.
pub struct PullSignal {
    rx: oneshot::Receiver<PullOutcome>,
}

impl PullMonitor {
    /// Create a monitor and its paired signal.
    pub fn channel() -> (Self, PullSignal) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                done: Some(tx),
                events: 0,
            },
            PullSignal { rx },
        )
    }

    /// Forward one progress event to the log.
    pub fn observe(&mut self, progress: &PullProgress) {
        self.events += 1;
        if let Some(status) = &progress.status {
            match &progress.layer {
                Some(layer) => tracing::trace!("pull progress [{}]: {}", layer, status),
                None => tracing::trace!("pull progress: {}", status),
            }
        }
    }

    /// Release the completion signal.
    ///
    /// Only the first call sends; later calls are logged no-ops, so a stream
    /// that delivers a terminal event twice cannot release the signal twice.
    pub fn complete(&mut self, outcome: PullOutcome) {
        match self.done.take() {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::trace!("duplicate pull completion ignored"),
        }
    }

    /// Drain the stream to its end, then complete.
    pub async fn drive<S>(mut self, mut stream: S)
    where
        S: Stream<Item = Result<PullProgress, EngineError>> + Unpin,
    {
        while let Some(item) = stream.next().await {
            match item {
                Ok(progress) => self.observe(&progress),
                Err(e) => {
                    self.complete(PullOutcome::Failed {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
        let events = self.events;
        self.complete(PullOutcome::Complete { events });
    }
}

impl PullSignal {
    /// Wait for the pull to terminate within `budget`.
    ///
    /// `None` means the budget elapsed first. A monitor that went away without
    /// completing surfaces as a failed outcome, never a hang.
    pub async fn wait(self, budget: Duration) -> Option<PullOutcome> {
        match tokio::time::timeout(budget, self.rx).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => Some(PullOutcome::Failed {
                reason: "pull monitor dropped before signalling".to_string(),
            }),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn progress(status: &str) -> PullProgress {
        PullProgress {
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_stream_completes_with_event_count() {
        let (monitor, signal) = PullMonitor::channel();
        let events = vec![
            Ok(progress("Pulling fs layer")),
            Ok(progress("Downloading")),
            Ok(progress("Pull complete")),
        ];
        tokio::spawn(monitor.drive(stream::iter(events)));

        let outcome = signal.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, Some(PullOutcome::Complete { events: 3 }));
    }

    #[tokio::test]
    async fn test_error_stream_still_releases_signal() {
        let (monitor, signal) = PullMonitor::channel();
        let events = vec![
            Ok(progress("Pulling fs layer")),
            Err(EngineError::Stream {
                reason: "connection reset".to_string(),
            }),
        ];
        tokio::spawn(monitor.drive(stream::iter(events)));

        match signal.wait(Duration::from_secs(1)).await {
            Some(PullOutcome::Failed { reason }) => assert!(reason.contains("connection reset")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_a_no_op() {
        let (mut monitor, signal) = PullMonitor::channel();
        monitor.complete(PullOutcome::Complete { events: 1 });
        monitor.complete(PullOutcome::Failed {
            reason: "late error".to_string(),
        });

        let outcome = signal.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, Some(PullOutcome::Complete { events: 1 }));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_monitor, signal) = PullMonitor::channel();
        let outcome = signal.wait(Duration::from_millis(20)).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_dropped_monitor_surfaces_as_failure() {
        let (monitor, signal) = PullMonitor::channel();
        drop(monitor);

        match signal.wait(Duration::from_secs(1)).await {
            Some(PullOutcome::Failed { .. }) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
