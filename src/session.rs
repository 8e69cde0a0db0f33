//! Control surface over the engine: validated start, stop, status and reset

use std::collections::HashSet;

use async_channel as channel;
use tracing::{debug, warn};

use crate::engine::{ProgressSnapshot, UnfollowEngine};
use crate::error::{SessionError, SessionResult};
use crate::events::{CompletionRecord, EngineEvent};
use crate::observer::ObserverState;

/// Clean up user-supplied identifiers into a run queue.
///
/// Surrounding whitespace and a leading `@` are dropped. Duplicates are
/// removed case-insensitively, keeping the first spelling and position.
pub fn normalize_targets<I, S>(identifiers: I) -> SessionResult<Vec<String>>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen = HashSet::new();
	let mut targets = Vec::new();
	for raw in identifiers {
		let raw = raw.as_ref();
		let identifier = raw.trim().trim_start_matches('@');
		if identifier.is_empty() {
			return Err(SessionError::InvalidIdentifier {
				identifier: raw.to_string(),
				reason: "empty".to_string(),
			});
		}
		if let Some(bad) = identifier.chars().find(|c| *c == '/' || c.is_whitespace()) {
			return Err(SessionError::InvalidIdentifier {
				identifier: raw.to_string(),
				reason: format!("contains {bad:?}"),
			});
		}
		if seen.insert(identifier.to_lowercase()) {
			targets.push(identifier.to_string());
		} else {
			warn!("Session: dropping duplicate target {identifier}");
		}
	}
	Ok(targets)
}

/// The externally callable face of one engine
#[derive(Clone)]
pub struct Session {
	engine: UnfollowEngine,
}

impl Session {
	pub fn new(engine: UnfollowEngine) -> Self {
		Self { engine }
	}

	/// Validate `identifiers` and start a run. Nothing changes on error.
	pub fn start<I, S>(&self, identifiers: I) -> SessionResult<u64>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let targets = normalize_targets(identifiers)?;
		if targets.is_empty() {
			debug!("Session: start ignored, no targets");
			return Err(SessionError::EmptyTargets);
		}
		self.engine.start(targets)
	}

	/// Request a halt. `false` when nothing was running.
	pub fn stop(&self) -> bool {
		self.engine.stop()
	}

	pub fn force_reset(&self) {
		self.engine.force_reset()
	}

	pub fn current_snapshot(&self) -> Option<ProgressSnapshot> {
		self.engine.snapshot()
	}

	/// Whether the backend currently grants automation. No side effects.
	pub async fn is_automation_permission_granted(&self) -> bool {
		self.engine.driver().automation_permitted().await
	}

	pub fn subscribe(&self) -> channel::Receiver<EngineEvent> {
		self.engine.subscribe()
	}

	/// Reconcile an (re)attaching observer with the engine.
	pub fn resync(&self, observer: &mut ObserverState) -> Option<CompletionRecord> {
		observer.resync(self.current_snapshot())
	}

	pub fn engine(&self) -> &UnfollowEngine {
		&self.engine
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;

	use crate::driver::ReplayDriver;
	use crate::engine::{EngineConfig, EngineSettings};
	use crate::events::EventBus;
	use crate::pacing::{DelayRange, PacingConfig};
	use crate::query::LabelConfig;

	fn session(driver: Arc<ReplayDriver>, pacing: PacingConfig) -> Session {
		let settings = EngineSettings {
			engine: EngineConfig {
				return_delay_ms: 0,
				..EngineConfig::default()
			},
			pacing,
			labels: LabelConfig::default(),
		};
		Session::new(UnfollowEngine::new(driver.clone(), driver, EventBus::new(), settings))
	}

	#[test]
	fn test_normalize_dedupes_case_insensitively() {
		let targets = normalize_targets([" Alice", "@bob", "alice", "BOB", "carol"]).unwrap();
		assert_eq!(targets, vec!["Alice", "bob", "carol"]);
	}

	#[test]
	fn test_normalize_rejects_bad_identifiers() {
		assert!(matches!(
			normalize_targets(["ok", "  "]),
			Err(SessionError::InvalidIdentifier { .. })
		));
		assert!(matches!(
			normalize_targets(["a/b"]),
			Err(SessionError::InvalidIdentifier { .. })
		));
		assert!(matches!(
			normalize_targets(["two words"]),
			Err(SessionError::InvalidIdentifier { .. })
		));
		assert!(normalize_targets(Vec::<String>::new()).unwrap().is_empty());
	}

	#[smol_potat::test]
	async fn test_start_rejects_empty_and_invalid_without_side_effects() {
		let session = session(Arc::new(ReplayDriver::new()), PacingConfig::immediate());
		assert!(matches!(
			session.start(Vec::<String>::new()),
			Err(SessionError::EmptyTargets)
		));
		assert!(matches!(
			session.start(["fine", "not/fine"]),
			Err(SessionError::InvalidIdentifier { .. })
		));
		assert_eq!(session.current_snapshot(), None);
		assert!(!session.stop());
	}

	#[smol_potat::test]
	async fn test_permission_query_is_pure() {
		let driver = Arc::new(ReplayDriver::new());
		let session = session(driver.clone(), PacingConfig::immediate());
		assert!(session.is_automation_permission_granted().await);
		driver.set_permitted(false);
		assert!(!session.is_automation_permission_granted().await);
		assert!(!session.is_automation_permission_granted().await);
		assert!(driver.opened().is_empty());
	}

	#[smol_potat::test]
	async fn test_resync_after_force_reset_yields_synthetic_completion() {
		let driver = Arc::new(ReplayDriver::new());
		let pacing = PacingConfig {
			open_wait: DelayRange::fixed(5_000),
			..PacingConfig::immediate()
		};
		let session = session(driver, pacing);
		let mut observer = ObserverState::new();

		session.start(["alice", "bob"]).unwrap();
		assert!(session.resync(&mut observer).is_none());
		assert!(observer.is_running());

		session.force_reset();
		smol::Timer::after(Duration::from_millis(50)).await;

		let record = session.resync(&mut observer).expect("synthetic completion");
		assert!(record.synthetic);
		assert!(!record.success);
		assert_eq!(record.total, 2);
		assert!(!observer.is_running());
		assert!(session.resync(&mut observer).is_none());
	}
}
