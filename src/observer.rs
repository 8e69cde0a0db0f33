//! Observer-side view of the engine's progress
//!
//! Events can arrive late or not at all (the observer may be detached), so
//! this state is rebuilt from whatever is available: events when listening,
//! and [`ObserverState::resync`] against a snapshot when (re)attaching.

use async_channel as channel;
use tracing::{debug, info};

use crate::engine::ProgressSnapshot;
use crate::events::{CompletionRecord, EngineEvent, ProgressUpdate, ReturnDirective, RunOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverStatus {
	/// Nothing seen yet
	Idle,
	Running(ProgressUpdate),
	Finished(CompletionRecord),
}

#[derive(Debug, Clone)]
pub struct ObserverState {
	status: ObserverStatus,
	/// Highest run id known to be over
	last_finished: Option<u64>,
	pending_return: Option<ReturnDirective>,
}

impl Default for ObserverState {
	fn default() -> Self {
		Self::new()
	}
}

impl ObserverState {
	pub fn new() -> Self {
		Self {
			status: ObserverStatus::Idle,
			last_finished: None,
			pending_return: None,
		}
	}

	pub fn status(&self) -> &ObserverStatus {
		&self.status
	}

	pub fn is_running(&self) -> bool {
		matches!(self.status, ObserverStatus::Running(_))
	}

	fn is_over(&self, run_id: u64) -> bool {
		self.last_finished.is_some_and(|last| run_id <= last)
	}

	fn mark_finished(&mut self, record: CompletionRecord) {
		self.last_finished = Some(self.last_finished.map_or(record.run_id, |l| l.max(record.run_id)));
		self.status = ObserverStatus::Finished(record);
	}

	/// Fold one event in. Returns whether the visible state changed.
	pub fn apply(&mut self, event: &EngineEvent) -> bool {
		match event {
			EngineEvent::ProgressUpdate(progress) => {
				if self.is_over(progress.run_id) {
					debug!("Observer: ignoring late progress for run {}", progress.run_id);
					return false;
				}
				self.status = ObserverStatus::Running(progress.clone());
				true
			}
			EngineEvent::RunComplete(record) => {
				if self.is_over(record.run_id) {
					return false;
				}
				self.mark_finished(record.clone());
				true
			}
			EngineEvent::ReturnToObserver { run_id, directive } => {
				if self.last_finished != Some(*run_id) {
					return false;
				}
				self.pending_return = Some(*directive);
				true
			}
		}
	}

	/// Apply everything queued on `rx` without waiting. Returns the number
	/// of events that changed the state.
	pub fn drain(&mut self, rx: &channel::Receiver<EngineEvent>) -> usize {
		std::iter::from_fn(|| rx.try_recv().ok())
			.filter(|event| self.apply(event))
			.count()
	}

	/// Take a pending return-to-observer directive, if one arrived
	pub fn take_return_request(&mut self) -> Option<ReturnDirective> {
		self.pending_return.take()
	}

	/// Reconcile with the engine's current snapshot.
	///
	/// When this observer believed a run was active but the engine has moved
	/// on (finished, reset or started another run), a synthetic completion is
	/// recorded and returned so the observer never stays "running" forever.
	pub fn resync(&mut self, snapshot: Option<ProgressSnapshot>) -> Option<CompletionRecord> {
		let believed = match &self.status {
			ObserverStatus::Running(progress) => Some(progress.clone()),
			_ => None,
		};

		match (believed, snapshot) {
			(Some(progress), Some(snap)) if snap.run_id == progress.run_id && snap.running => {
				self.status = ObserverStatus::Running(progress_from(&snap));
				None
			}
			(Some(progress), Some(snap)) if snap.run_id == progress.run_id => {
				// finished naturally while we were away
				let record = synthetic(progress.run_id, RunOutcome::Exhausted, snap.index, snap.total);
				info!("Observer: run {} finished while detached", progress.run_id);
				self.mark_finished(record.clone());
				Some(record)
			}
			(Some(progress), snapshot) => {
				let record = synthetic(progress.run_id, RunOutcome::Interrupted, progress.index, progress.total);
				info!("Observer: run {} is gone, recording synthetic completion", progress.run_id);
				self.mark_finished(record.clone());
				if let Some(snap) = snapshot.filter(|s| s.running && !self.is_over(s.run_id)) {
					self.status = ObserverStatus::Running(progress_from(&snap));
				}
				Some(record)
			}
			(None, Some(snap)) if snap.running && !self.is_over(snap.run_id) => {
				self.status = ObserverStatus::Running(progress_from(&snap));
				None
			}
			(None, _) => None,
		}
	}
}

fn progress_from(snapshot: &ProgressSnapshot) -> ProgressUpdate {
	ProgressUpdate {
		run_id: snapshot.run_id,
		identifier: snapshot.identifier.clone().unwrap_or_default(),
		index: snapshot.index,
		total: snapshot.total,
	}
}

fn synthetic(run_id: u64, outcome: RunOutcome, index: usize, total: usize) -> CompletionRecord {
	CompletionRecord {
		run_id,
		success: outcome == RunOutcome::Exhausted,
		outcome,
		index,
		total,
		completed: Vec::new(),
		skipped: Vec::new(),
		synthetic: true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::Step;

	fn progress(run_id: u64, index: usize) -> EngineEvent {
		EngineEvent::ProgressUpdate(ProgressUpdate {
			run_id,
			identifier: format!("user{index}"),
			index,
			total: 3,
		})
	}

	fn complete(run_id: u64, index: usize) -> EngineEvent {
		EngineEvent::RunComplete(CompletionRecord {
			run_id,
			success: false,
			outcome: RunOutcome::Stopped,
			index,
			total: 3,
			completed: Vec::new(),
			skipped: Vec::new(),
			synthetic: false,
		})
	}

	fn running_snapshot(run_id: u64, index: usize) -> ProgressSnapshot {
		ProgressSnapshot {
			run_id,
			running: true,
			identifier: Some(format!("user{index}")),
			index,
			total: 3,
			step: Step::LocatingMenu,
		}
	}

	#[test]
	fn test_late_progress_is_ignored() {
		let mut observer = ObserverState::new();
		assert!(observer.apply(&progress(1, 0)));
		assert!(observer.apply(&complete(1, 1)));
		assert!(!observer.apply(&progress(1, 1)));
		assert!(!observer.is_running());

		// a newer run is accepted
		assert!(observer.apply(&progress(2, 0)));
		assert!(observer.is_running());
	}

	#[test]
	fn test_return_request_only_for_finished_run() {
		let mut observer = ObserverState::new();
		let back = EngineEvent::ReturnToObserver {
			run_id: 1,
			directive: ReturnDirective::ShowAnalysis,
		};
		assert!(!observer.apply(&back));
		observer.apply(&complete(1, 3));
		assert!(observer.apply(&back));
		assert_eq!(observer.take_return_request(), Some(ReturnDirective::ShowAnalysis));
		assert_eq!(observer.take_return_request(), None);
	}

	#[test]
	fn test_drain_applies_in_order() {
		let (tx, rx) = channel::unbounded();
		for event in [progress(1, 0), progress(1, 1), complete(1, 2), progress(1, 2)] {
			tx.try_send(event).unwrap();
		}
		let mut observer = ObserverState::new();
		assert_eq!(observer.drain(&rx), 3);
		assert!(matches!(observer.status(), ObserverStatus::Finished(r) if r.index == 2));
	}

	#[test]
	fn test_resync_absent_engine_synthesizes_completion() {
		let mut observer = ObserverState::new();
		observer.apply(&progress(1, 1));

		let record = observer.resync(None).unwrap();
		assert!(record.synthetic);
		assert!(!record.success);
		assert_eq!(record.index, 1);
		assert!(!observer.is_running());
		assert_eq!(observer.resync(None), None);
	}

	#[test]
	fn test_resync_natural_finish_while_detached() {
		let mut observer = ObserverState::new();
		observer.apply(&progress(1, 0));
		let finished = ProgressSnapshot {
			run_id: 1,
			running: false,
			identifier: None,
			index: 3,
			total: 3,
			step: Step::Idle,
		};
		let record = observer.resync(Some(finished)).unwrap();
		assert!(record.success);
		assert_eq!(record.outcome, RunOutcome::Exhausted);
		assert_eq!(record.index, 3);
	}

	#[test]
	fn test_resync_adopts_running_snapshot() {
		let mut observer = ObserverState::new();
		assert_eq!(observer.resync(Some(running_snapshot(4, 2))), None);
		assert!(matches!(observer.status(), ObserverStatus::Running(p) if p.index == 2 && p.run_id == 4));

		// engine moved on to another run while detached
		let record = observer.resync(Some(running_snapshot(5, 0))).unwrap();
		assert_eq!(record.run_id, 4);
		assert!(matches!(observer.status(), ObserverStatus::Running(p) if p.run_id == 5));
	}
}
