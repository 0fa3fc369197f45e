//! An in-memory position source that replays a script.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use super::{PlatformError, PlatformReply, PositionOptions, PositionSource, WatchId};
use crate::model::Coordinates;

/// How the next single-shot request is answered.
#[derive(Debug, Clone)]
enum Step {
    Reply(PlatformReply),

    /// Hold the request open without answering.
    Hang,
}

#[derive(Default)]
struct State {
    script: VecDeque<Step>,
    hung: Vec<oneshot::Sender<PlatformReply>>,
    watches: HashMap<WatchId, mpsc::UnboundedSender<PlatformReply>>,
    next_watch: u64,
    requests: Vec<PositionOptions>,
}

/// Answers single-shot requests from a queue and pushes updates to watches
/// on demand.
///
/// When the queue is empty a request is answered with
/// "position unavailable".
#[derive(Default)]
pub struct ScriptedSource {
    state: Mutex<State>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that answers requests with the given fixes in order.
    pub fn with_fixes(fixes: impl IntoIterator<Item = Coordinates>) -> Self {
        let source = Self::new();
        for fix in fixes {
            source.push_fix(fix);
        }
        source
    }

    pub fn push_fix(&self, fix: Coordinates) {
        self.state().script.push_back(Step::Reply(Ok(fix)));
    }

    pub fn push_error(&self, error: PlatformError) {
        self.state().script.push_back(Step::Reply(Err(error)));
    }

    /// Queue a request that is never answered.
    pub fn push_hang(&self) {
        self.state().script.push_back(Step::Hang);
    }

    /// Push an update to every active watch. Returns how many received it.
    pub fn emit(&self, reply: PlatformReply) -> usize {
        let mut state = self.state();
        state.watches.retain(|_, tx| !tx.is_closed());
        state
            .watches
            .values()
            .filter(|tx| tx.send(reply.clone()).is_ok())
            .count()
    }

    pub fn active_watches(&self) -> usize {
        self.state().watches.len()
    }

    /// Options of every single-shot request received so far.
    pub fn requests(&self) -> Vec<PositionOptions> {
        self.state().requests.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionSource for ScriptedSource {
    fn get_current_position(
        &self,
        options: &PositionOptions,
        reply: oneshot::Sender<PlatformReply>,
    ) {
        let mut state = self.state();
        state.requests.push(*options);
        match state.script.pop_front() {
            Some(Step::Reply(r)) => {
                // The requester may already be gone.
                let _ = reply.send(r);
            }
            Some(Step::Hang) => state.hung.push(reply),
            None => {
                let _ = reply.send(Err(PlatformError::new(
                    PlatformError::POSITION_UNAVAILABLE,
                    "no scripted fix",
                )));
            }
        }
    }

    fn watch_position(
        &self,
        _options: &PositionOptions,
        updates: mpsc::UnboundedSender<PlatformReply>,
    ) -> WatchId {
        let mut state = self.state();
        state.next_watch += 1;
        let id = WatchId(state.next_watch);
        state.watches.insert(id, updates);
        id
    }

    fn clear_watch(&self, id: WatchId) {
        self.state().watches.remove(&id);
    }
}
