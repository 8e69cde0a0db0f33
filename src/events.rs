//! Progress/event channel between the engine and its observers

use async_channel as channel;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Per-target progress: `index` is the zero-based position of `identifier`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
	pub run_id: u64,
	pub identifier: String,
	pub index: usize,
	pub total: usize,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
	/// Every target was processed
	Exhausted,
	/// `stop()` was called
	Stopped,
	/// The automation capability was withdrawn
	PermissionRevoked,
	/// The backend reported an unrecoverable interruption
	Interrupted,
}

/// Final record of one run. Produced exactly once per run that was not
/// force-reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRecord {
	pub run_id: u64,
	/// `true` only when the queue was exhausted
	pub success: bool,
	pub outcome: RunOutcome,
	/// Targets fully resolved, settle wait included. A run stopped while
	/// settling counts the current target in `completed` but not here.
	pub index: usize,
	pub total: usize,
	/// Targets whose confirmation control was invoked, in queue order
	pub completed: Vec<String>,
	/// Targets abandoned after the retry bound or a navigation failure
	pub skipped: Vec<String>,
	/// Built by an observer for a run it never saw finish
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub synthetic: bool,
}

/// What the primary surface should show when control returns to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnDirective {
	ShowAnalysis,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
	/// A target is about to be processed
	ProgressUpdate(ProgressUpdate),
	/// The run ended, naturally or not
	RunComplete(CompletionRecord),
	/// Issued a short while after natural completion
	ReturnToObserver { run_id: u64, directive: ReturnDirective },
}

impl EngineEvent {
	/// Wire name of the event
	pub fn name(&self) -> &'static str {
		match self {
			EngineEvent::ProgressUpdate(_) => "progress-update",
			EngineEvent::RunComplete(_) => "run-complete",
			EngineEvent::ReturnToObserver { .. } => "return-to-observer",
		}
	}

	pub fn run_id(&self) -> u64 {
		match self {
			EngineEvent::ProgressUpdate(p) => p.run_id,
			EngineEvent::RunComplete(c) => c.run_id,
			EngineEvent::ReturnToObserver { run_id, .. } => *run_id,
		}
	}
}

/// Simple broadcast-style event bus using fan-out to per-subscriber channels.
///
/// Emission never blocks and never fails: with no subscribers the event is
/// dropped, and subscribers whose receiver is gone are pruned.
#[derive(Default)]
pub struct EventBus {
	subscribers: Mutex<Vec<channel::Sender<EngineEvent>>>,
}

impl EventBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			subscribers: Mutex::new(Vec::new()),
		})
	}

	/// Subscribe to events. Returns a Receiver that will get future events.
	pub fn subscribe(&self) -> channel::Receiver<EngineEvent> {
		let (tx, rx) = channel::unbounded();
		match self.subscribers.lock() {
			Ok(mut subs) => subs.push(tx),
			Err(_) => error!("EventBus: subscribers lock poisoned; subscriber not registered"),
		}
		rx
	}

	/// Broadcast an event to all subscribers. Best-effort.
	pub fn emit(&self, event: EngineEvent) {
		if let Ok(mut subs) = self.subscribers.lock() {
			subs.retain(|sub| !sub.is_closed());
			for sub in subs.iter() {
				let _ = sub.try_send(event.clone());
			}
		} else {
			error!("EventBus: subscribers lock poisoned; dropping event");
		}
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers
			.lock()
			.map(|mut subs| {
				subs.retain(|sub| !sub.is_closed());
				subs.len()
			})
			.unwrap_or(0)
	}
}
