//! Live reference state for one input box.
//!
//! A [`ReferenceFeed`] owns the suggestion task for a single consumer. Every
//! [`set_text`](ReferenceFeed::set_text) replaces the in-flight task, and
//! subscribers see `{references, is_loading, error}` through a `watch`
//! channel. Dropping the feed cancels whatever is still pending.
//!
//! Aborting a task cannot stop a poll already running on another worker, so
//! each `set_text` also bumps a generation and a task only publishes while
//! its generation is still the latest.
//!
//! Must be driven from inside a tokio runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use chat_context_core::models::Reference;

use crate::suggest::{SuggestionOptions, SuggestionOrchestrator};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceState {
    pub references: Vec<Reference>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct ReferenceFeed {
    orchestrator: Arc<SuggestionOrchestrator>,
    options: SuggestionOptions,
    state: Arc<watch::Sender<ReferenceState>>,
    generation: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl ReferenceFeed {
    /// A feed scoped to `chat_id`, using `options` for everything else.
    pub fn new(
        orchestrator: Arc<SuggestionOrchestrator>,
        chat_id: Option<String>,
        mut options: SuggestionOptions,
    ) -> Self {
        options.chat_id = chat_id;
        let (tx, _rx) = watch::channel(ReferenceState::default());
        Self {
            orchestrator,
            options,
            state: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReferenceState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ReferenceState {
        self.state.borrow().clone()
    }

    /// Recompute references for new input text.
    pub fn set_text(&mut self, text: &str) {
        self.abort_task();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if text.trim().is_empty() {
            self.orchestrator.cancel_pending();
            self.state.send_replace(ReferenceState::default());
            return;
        }

        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });

        let orchestrator = self.orchestrator.clone();
        let options = self.options.clone();
        let state = self.state.clone();
        let latest = self.generation.clone();
        let text = text.to_string();
        self.task = Some(tokio::spawn(async move {
            // None means a newer call took over; leave the state to it.
            if let Some(result) = orchestrator.get_suggestions(&text, &options).await {
                let next = ReferenceState {
                    references: result.contexts,
                    is_loading: false,
                    error: result.error,
                };
                if !publish_if_current(&state, &latest, generation, next) {
                    tracing::debug!(query = %text, "dropped stale references");
                }
            }
        }));
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Replace the state with `next` unless a newer `set_text` has happened
/// since `generation` was taken. The check runs under the channel's lock.
fn publish_if_current(
    state: &watch::Sender<ReferenceState>,
    latest: &AtomicU64,
    generation: u64,
    next: ReferenceState,
) -> bool {
    state.send_if_modified(|current| {
        if latest.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = next;
        true
    })
}

impl Drop for ReferenceFeed {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_task();
        self.orchestrator.cancel_pending();
    }
}
