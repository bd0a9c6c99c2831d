//! Progress reporting and cancellation for a single send.
//!
//! A [`Progress`] handle is shared between the pipeline, which writes transfer
//! counts, and the caller, which observes them and may cancel at any time.
//! Both terminal states (`Completed`, `Cancelled`) are entered at most once and
//! exclude each other.
//!
//! When the request carries a body, the upload is reported against all units
//! but the last one, which belongs to the response.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Progress`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Transfer has not finished yet
    Running,
    /// The pipeline received the full response
    Completed,
    /// The caller cancelled the request
    Cancelled,
}

/// Point-in-time view of a [`Progress`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Units transferred so far
    pub completed: u64,
    /// Units expected in total (caller-chosen scale)
    pub total: u64,
    /// Current lifecycle state
    pub state: ProgressState,
}

impl ProgressSnapshot {
    /// Fraction of the work done, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction_completed(&self) -> f64 {
        if self.total == 0 {
            return if self.state == ProgressState::Completed {
                1.0
            } else {
                0.0
            };
        }
        self.completed.min(self.total) as f64 / self.total as f64
    }
}

/// Externally observable transfer counter with cooperative cancellation.
///
/// Cloning is cheap and every clone refers to the same underlying state.
///
/// # Example
///
/// ```ignore
/// let progress = Progress::new(100);
/// let options = SendOptions::new().progress(progress.clone());
///
/// // UI side: callbacks run on the designated runtime only
/// progress.observe_on(&ui_runtime, |snapshot| render(snapshot.fraction_completed()));
///
/// let result = client.send::<MyError>(&request, &options).await;
/// ```
#[derive(Clone, Debug)]
pub struct Progress {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    state: watch::Sender<ProgressSnapshot>,
    upload: AtomicBool,
}

/// Units left for the response once an upload has been reported.
const RESPONSE_UNITS: u64 = 1;

impl Progress {
    /// Create a running handle that reports against `total_unit_count` units.
    #[must_use]
    pub fn new(total_unit_count: u64) -> Self {
        let (state, _) = watch::channel(ProgressSnapshot {
            completed: 0,
            total: total_unit_count,
            state: ProgressState::Running,
        });
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                state,
                upload: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn completed_unit_count(&self) -> u64 {
        self.snapshot().completed
    }

    #[must_use]
    pub fn total_unit_count(&self) -> u64 {
        self.snapshot().total
    }

    #[must_use]
    pub fn fraction_completed(&self) -> f64 {
        self.snapshot().fraction_completed()
    }

    #[must_use]
    pub fn state(&self) -> ProgressState {
        self.snapshot().state
    }

    /// Whether [`cancel`](Self::cancel) took effect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == ProgressState::Cancelled
    }

    /// Whether the transfer reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() != ProgressState::Running
    }

    /// Cancel the request this handle is attached to.
    ///
    /// Has no effect once the transfer completed. Returns `true` if this call
    /// performed the transition.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.state.send_if_modified(|snapshot| {
            if snapshot.state != ProgressState::Running {
                return false;
            }
            snapshot.state = ProgressState::Cancelled;
            true
        });
        if cancelled {
            tracing::debug!("progress handle cancelled");
            self.inner.token.cancel();
        }
        cancelled
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.state.subscribe()
    }

    /// Deliver snapshots to `observer` on the runtime behind `handle`.
    ///
    /// The observer sees the current snapshot immediately, then every change
    /// (intermediate updates may be coalesced), and finally the terminal
    /// snapshot. It never runs concurrently with itself, and never on any
    /// runtime other than `handle`'s.
    pub fn observe_on<F>(&self, handle: &Handle, mut observer: F) -> JoinHandle<()>
    where
        F: FnMut(ProgressSnapshot) + Send + 'static,
    {
        let mut rx = self.subscribe();
        handle.spawn(async move {
            loop {
                let snapshot = *rx.borrow_and_update();
                observer(snapshot);
                if snapshot.state != ProgressState::Running {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// The request body is about to be sent; split the scale with the response.
    pub(crate) fn expect_upload(&self) {
        self.inner.upload.store(true, Ordering::Relaxed);
    }

    /// Record `sent` request bytes out of `expected`.
    pub(crate) fn record_upload(&self, sent: u64, expected: u64) {
        self.advance(sent, expected, |total| (0, total.saturating_sub(RESPONSE_UNITS)));
    }

    /// Record `received` response bytes out of `expected` (if known).
    pub(crate) fn record_transfer(&self, received: u64, expected: Option<u64>) {
        let Some(expected) = expected else {
            return;
        };
        let upload = self.inner.upload.load(Ordering::Relaxed);
        self.advance(received, expected, |total| {
            if upload {
                let base = total.saturating_sub(RESPONSE_UNITS);
                (base, total - base)
            } else {
                (0, total)
            }
        });
    }

    /// Move the counter to `done / expected` of the `(base, span)` window.
    ///
    /// The counter never goes backwards, so a resent body does not rewind it.
    fn advance(&self, done: u64, expected: u64, window: impl FnOnce(u64) -> (u64, u64)) {
        if expected == 0 {
            return;
        }
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.state != ProgressState::Running {
                return false;
            }
            let (base, span) = window(snapshot.total);
            let scaled = u128::from(span) * u128::from(done.min(expected)) / u128::from(expected);
            let completed = base
                .saturating_add(u64::try_from(scaled).unwrap_or(span))
                .min(snapshot.total);
            if completed <= snapshot.completed {
                return false;
            }
            snapshot.completed = completed;
            true
        });
    }

    /// Mark the transfer complete. Returns `true` if this call performed the transition.
    pub(crate) fn finish(&self) -> bool {
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.state != ProgressState::Running {
                return false;
            }
            snapshot.completed = snapshot.total;
            snapshot.state = ProgressState::Completed;
            true
        })
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(1)
    }
}
