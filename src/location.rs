//! Location acquisition: a uniform, cancellable front over the platform.
//!
//! The platform primitive ([`PositionSource`]) answers through channels the
//! way a browser answers through success and error callbacks. The adapter
//! ([`LocationProvider`]) turns a single-shot request into a future that
//! honours a timeout and a cancellation token, and a continuous watch into a
//! [`WatchHandle`] that stops all callbacks when cancelled or dropped.
//!
//! The adapter never retries. Retrying is the caller's decision.

mod scripted;

pub use scripted::ScriptedSource;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::model::Coordinates;

/// Default single-shot timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default gap allowed between updates of a continuous watch.
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Errors surfaced to callers of the adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("position unavailable: {message}")]
    PositionUnavailable { message: String },

    #[error("location request timed out: {message}")]
    Timeout { message: String },

    /// The caller abandoned the request before it resolved.
    #[error("location request cancelled")]
    Cancelled,
}

/// An error as reported by the platform: a numeric code and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub code: u16,
    pub message: String,
}

impl PlatformError {
    pub const PERMISSION_DENIED: u16 = 1;
    pub const POSITION_UNAVAILABLE: u16 = 2;
    pub const TIMEOUT: u16 = 3;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<PlatformError> for LocationError {
    fn from(e: PlatformError) -> Self {
        let message = e.message;
        match e.code {
            PlatformError::PERMISSION_DENIED => Self::PermissionDenied { message },
            PlatformError::TIMEOUT => Self::Timeout { message },
            // Unknown codes are treated as the hardware not producing a fix.
            _ => Self::PositionUnavailable { message },
        }
    }
}

/// What a platform sends back for one request or one watch update.
pub type PlatformReply = Result<Coordinates, PlatformError>;

/// How a fix should be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Trade latency and power for precision.
    pub high_accuracy: bool,

    /// How long to wait for a fix (single-shot) or between updates (watch).
    pub timeout: Duration,

    /// Oldest cached fix the platform may return. Zero rejects any cached fix.
    pub max_cached_age: Duration,
}

impl PositionOptions {
    /// Options for a continuous watch: same as the default, longer timeout.
    pub fn watch() -> Self {
        Self {
            timeout: DEFAULT_WATCH_TIMEOUT,
            ..Self::default()
        }
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_TIMEOUT,
            max_cached_age: Duration::ZERO,
        }
    }
}

/// Platform-assigned identifier for a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// The platform geolocation primitive.
///
/// Invoking either request method may prompt the user for permission.
pub trait PositionSource: Send + Sync {
    /// Start a single-shot request. The platform answers once on `reply`,
    /// or drops it if it never will.
    fn get_current_position(
        &self,
        options: &PositionOptions,
        reply: oneshot::Sender<PlatformReply>,
    );

    /// Start a continuous watch delivering every new fix on `updates`.
    fn watch_position(
        &self,
        options: &PositionOptions,
        updates: mpsc::UnboundedSender<PlatformReply>,
    ) -> WatchId;

    /// Stop a watch. Unknown ids are ignored.
    fn clear_watch(&self, id: WatchId);
}

/// The adapter the workflow talks to.
#[derive(Clone)]
pub struct LocationProvider {
    source: Arc<dyn PositionSource>,
}

impl LocationProvider {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self { source }
    }

    /// Acquire one fix.
    ///
    /// Resolves when the platform answers, when `options.timeout` elapses
    /// ([`LocationError::Timeout`]), or when `cancel` fires
    /// ([`LocationError::Cancelled`]). Fixes that fail validation are
    /// reported as unavailable.
    pub async fn current_position(
        &self,
        options: &PositionOptions,
        cancel: &CancellationToken,
    ) -> Result<Coordinates, LocationError> {
        let (tx, rx) = oneshot::channel();
        self.source.get_current_position(options, tx);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LocationError::Cancelled),
            outcome = tokio::time::timeout(options.timeout, rx) => outcome,
        };

        match outcome {
            Err(_elapsed) => Err(LocationError::Timeout {
                message: format!("no fix within {} ms", options.timeout.as_millis()),
            }),
            Ok(Err(_dropped)) => Err(LocationError::PositionUnavailable {
                message: "location source abandoned the request".to_string(),
            }),
            Ok(Ok(reply)) => checked(reply.map_err(LocationError::from)?),
        }
    }

    /// Start a continuous watch.
    ///
    /// `on_update` runs for every validated fix and `on_error` for every
    /// platform error or update gap longer than `options.timeout`. Gaps do
    /// not end the watch. Neither callback runs after the returned handle
    /// is cancelled or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_position<U, E>(
        &self,
        on_update: U,
        on_error: E,
        options: &PositionOptions,
    ) -> WatchHandle
    where
        U: FnMut(Coordinates) + Send + 'static,
        E: FnMut(LocationError) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.source.watch_position(options, tx);
        let token = CancellationToken::new();
        let callbacks: SharedCallbacks = Arc::new(Mutex::new(Some(Callbacks {
            on_update: Box::new(on_update),
            on_error: Box::new(on_error),
        })));

        let task_token = token.clone();
        let task_callbacks = Arc::clone(&callbacks);
        let gap = options.timeout;
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    next = tokio::time::timeout(gap, rx.recv()) => next,
                };

                let mut guard = task_callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(callbacks) = guard.as_mut() else {
                    break;
                };
                match next {
                    Ok(Some(reply)) => match reply.map_err(LocationError::from).and_then(checked) {
                        Ok(fix) => (callbacks.on_update)(fix),
                        Err(e) => (callbacks.on_error)(e),
                    },
                    // Source closed the watch on its side.
                    Ok(None) => break,
                    Err(_elapsed) => (callbacks.on_error)(LocationError::Timeout {
                        message: format!("no update within {} ms", gap.as_millis()),
                    }),
                }
            }
            tracing::debug!("location watch task finished");
        });

        tracing::debug!(watch = id.0, "location watch started");
        WatchHandle {
            id,
            source: Arc::clone(&self.source),
            token,
            callbacks,
        }
    }
}

fn checked(fix: Coordinates) -> Result<Coordinates, LocationError> {
    fix.validate()
        .map(|()| fix)
        .map_err(|e| LocationError::PositionUnavailable {
            message: format!("platform reported an invalid fix: {e}"),
        })
}

struct Callbacks {
    on_update: Box<dyn FnMut(Coordinates) + Send>,
    on_error: Box<dyn FnMut(LocationError) + Send>,
}

type SharedCallbacks = Arc<Mutex<Option<Callbacks>>>;

/// A live continuous watch. Cancelled on drop.
pub struct WatchHandle {
    id: WatchId,
    source: Arc<dyn PositionSource>,
    token: CancellationToken,
    callbacks: SharedCallbacks,
}

impl WatchHandle {
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Stop the watch. Once this returns, no callback runs again.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let released = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if released {
            self.token.cancel();
            self.source.clear_watch(self.id);
            tracing::debug!(watch = self.id.0, "location watch cleared");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
