//! Background engine driving one unfollow run at a time
//!
//! A run walks its queue strictly in order. Each target goes through
//! `OpeningTarget -> LocatingMenu -> AwaitingConfirmation -> ConfirmingAction
//! -> Settling` and back to `Idle`, or is skipped when a step fails
//! `max_failed_attempts` times in a row or the profile cannot be opened.
//!
//! The run executes on its own named thread under `smol::block_on`. Every
//! suspension (timer or backend call) is raced against the run's cancel
//! channel, and every state change re-checks under the slot lock that the
//! slot still holds this run. `stop()` and `force_reset()` clear the run and
//! drop the cancel sender in the same critical section, so nothing a stale
//! wake-up does can touch a later run.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_channel as channel;
use futures_lite::future;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::driver::{Navigator, UiDriver};
use crate::error::{DriverError, NavigationError, SessionError, SessionResult};
use crate::events::{
	CompletionRecord, EngineEvent, EventBus, ProgressUpdate, ReturnDirective, RunOutcome,
};
use crate::navigator::{profile_url, DEFAULT_PROFILE_BASE};
use crate::pacing::{Pacer, PacingConfig};
use crate::query::{find_and_invoke, ElementQuery, LabelConfig};
use crate::tree::{dump_surfaces, trace_surfaces, UiSurface};

pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Consecutive failed attempts per step before the target is skipped
	pub max_failed_attempts: u32,
	/// Failed-attempt counts at which the visible tree is dumped
	pub dump_at_attempts: Vec<u32>,
	/// Delay between natural completion and the return-to-observer request
	pub return_delay_ms: u64,
	pub profile_base: String,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
			dump_at_attempts: vec![3, 6],
			return_delay_ms: 1_000,
			profile_base: DEFAULT_PROFILE_BASE.to_string(),
		}
	}
}

/// Everything tunable about a run
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
	pub engine: EngineConfig,
	pub pacing: PacingConfig,
	pub labels: LabelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
	Idle,
	OpeningTarget,
	LocatingMenu,
	AwaitingConfirmation,
	ConfirmingAction,
	Settling,
}

/// Read-only view of the run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
	pub run_id: u64,
	pub running: bool,
	pub identifier: Option<String>,
	pub index: usize,
	pub total: usize,
	pub step: Step,
}

#[derive(Debug)]
struct RunState {
	run_id: u64,
	targets: Vec<String>,
	index: usize,
	step: Step,
	completed: Vec<String>,
	skipped: Vec<String>,
}

impl RunState {
	fn new(run_id: u64, targets: Vec<String>) -> Self {
		Self {
			run_id,
			targets,
			index: 0,
			step: Step::Idle,
			completed: Vec::new(),
			skipped: Vec::new(),
		}
	}

	fn snapshot(&self) -> ProgressSnapshot {
		ProgressSnapshot {
			run_id: self.run_id,
			running: true,
			identifier: self.targets.get(self.index).cloned(),
			index: self.index,
			total: self.targets.len(),
			step: self.step,
		}
	}

	fn into_record(self, outcome: RunOutcome) -> CompletionRecord {
		CompletionRecord {
			run_id: self.run_id,
			success: outcome == RunOutcome::Exhausted,
			outcome,
			index: self.index,
			total: self.targets.len(),
			completed: self.completed,
			skipped: self.skipped,
			synthetic: false,
		}
	}
}

#[derive(Debug, Default)]
struct RunSlot {
	last_run_id: u64,
	run: Option<RunState>,
	/// Snapshot of the last run that ran out of targets
	finished: Option<ProgressSnapshot>,
	cancel: Option<channel::Sender<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
	Confirmed,
	Skipped,
	Halted(RunOutcome),
}

enum Attempt {
	Invoked,
	Missed(Vec<UiSurface>),
	Halted(RunOutcome),
}

enum StepResult {
	Done,
	Exhausted,
	Halted(RunOutcome),
}

struct EngineShared {
	driver: Arc<dyn UiDriver>,
	navigator: Arc<dyn Navigator>,
	bus: Arc<EventBus>,
	settings: EngineSettings,
	slot: Mutex<RunSlot>,
}

/// Owned handle to the engine; clones share the same run slot.
#[derive(Clone)]
pub struct UnfollowEngine {
	shared: Arc<EngineShared>,
}

impl UnfollowEngine {
	pub fn new(
		driver: Arc<dyn UiDriver>,
		navigator: Arc<dyn Navigator>,
		bus: Arc<EventBus>,
		settings: EngineSettings,
	) -> Self {
		Self {
			shared: Arc::new(EngineShared {
				driver,
				navigator,
				bus,
				settings,
				slot: Mutex::new(RunSlot::default()),
			}),
		}
	}

	/// Begin a run over `targets`, returning its run id.
	///
	/// Targets are taken as given; validation happens in the session layer.
	pub fn start(&self, targets: Vec<String>) -> SessionResult<u64> {
		if targets.is_empty() {
			return Err(SessionError::EmptyTargets);
		}
		let total = targets.len();
		let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
		let run_id = {
			let mut slot = self.shared.lock_slot();
			if slot.run.is_some() {
				return Err(SessionError::AlreadyRunning);
			}
			slot.last_run_id += 1;
			let run_id = slot.last_run_id;
			slot.run = Some(RunState::new(run_id, targets));
			slot.finished = None;
			// replacing the sender cancels a pending return request of the previous run
			slot.cancel = Some(cancel_tx);
			run_id
		};

		let shared = Arc::clone(&self.shared);
		let spawned = thread::Builder::new()
			.name(format!("unpal-run-{run_id}"))
			.spawn(move || smol::block_on(shared.drive(run_id, cancel_rx)));
		if let Err(err) = spawned {
			let mut slot = self.shared.lock_slot();
			if slot.run.as_ref().is_some_and(|r| r.run_id == run_id) {
				slot.run = None;
				slot.cancel = None;
			}
			return Err(SessionError::Spawn(err));
		}
		info!("Engine: run {run_id} started with {total} targets");
		Ok(run_id)
	}

	/// Halt the active run and emit its completion. Returns `false` when no
	/// run was active.
	pub fn stop(&self) -> bool {
		self.shared.halt(None, RunOutcome::Stopped)
	}

	/// Drop all run state without emitting anything.
	pub fn force_reset(&self) {
		let mut slot = self.shared.lock_slot();
		let had_run = slot.run.take().is_some();
		slot.finished = None;
		slot.cancel = None;
		info!("Engine: force reset (active run: {had_run})");
	}

	/// Latest known state. `None` when no run is active and the last one was
	/// stopped, halted or reset.
	pub fn snapshot(&self) -> Option<ProgressSnapshot> {
		let slot = self.shared.lock_slot();
		match &slot.run {
			Some(run) => Some(run.snapshot()),
			None => slot.finished.clone(),
		}
	}

	pub fn is_running(&self) -> bool {
		self.shared.lock_slot().run.is_some()
	}

	pub fn subscribe(&self) -> channel::Receiver<EngineEvent> {
		self.shared.bus.subscribe()
	}

	pub fn driver(&self) -> &Arc<dyn UiDriver> {
		&self.shared.driver
	}

	pub fn settings(&self) -> &EngineSettings {
		&self.shared.settings
	}
}

impl EngineShared {
	fn lock_slot(&self) -> MutexGuard<'_, RunSlot> {
		self.slot.lock().unwrap_or_else(|poisoned| {
			error!("Engine: run slot lock poisoned; recovering");
			poisoned.into_inner()
		})
	}

	/// Run `f` on the run state if the slot still holds run `run_id`.
	fn with_run<R>(&self, run_id: u64, f: impl FnOnce(&mut RunState, &EventBus) -> R) -> Option<R> {
		let mut slot = self.lock_slot();
		match slot.run.as_mut() {
			Some(run) if run.run_id == run_id => Some(f(run, &self.bus)),
			_ => None,
		}
	}

	/// End the active run (or run `run_id` only, when given) like a stop.
	fn halt(&self, run_id: Option<u64>, outcome: RunOutcome) -> bool {
		let mut slot = self.lock_slot();
		let matches = match (&slot.run, run_id) {
			(Some(run), Some(id)) => run.run_id == id,
			(Some(_), None) => true,
			(None, _) => false,
		};
		if !matches {
			return false;
		}
		let Some(run) = slot.run.take() else {
			return false;
		};
		slot.cancel = None;
		slot.finished = None;
		let record = run.into_record(outcome);
		info!(
			"Engine: run {} halted ({:?}) at {}/{}",
			record.run_id, outcome, record.index, record.total
		);
		self.bus.emit(EngineEvent::RunComplete(record));
		true
	}

	fn finish(&self, run_id: u64) -> bool {
		let mut slot = self.lock_slot();
		if !slot.run.as_ref().is_some_and(|r| r.run_id == run_id) {
			return false;
		}
		let Some(run) = slot.run.take() else {
			return false;
		};
		let record = run.into_record(RunOutcome::Exhausted);
		slot.finished = Some(ProgressSnapshot {
			run_id,
			running: false,
			identifier: None,
			index: record.index,
			total: record.total,
			step: Step::Idle,
		});
		info!(
			"Engine: run {run_id} finished: {} confirmed, {} skipped of {}",
			record.completed.len(),
			record.skipped.len(),
			record.total
		);
		self.bus.emit(EngineEvent::RunComplete(record));
		true
	}

	/// Await `work` unless the run is cancelled first.
	async fn guard<T>(&self, cancel: &channel::Receiver<()>, work: impl Future<Output = T>) -> Option<T> {
		if cancel.is_closed() {
			return None;
		}
		let out = future::or(async move { Some(work.await) }, async {
			let _ = cancel.recv().await;
			None
		})
		.await?;
		if cancel.is_closed() {
			None
		} else {
			Some(out)
		}
	}

	async fn sleep(&self, cancel: &channel::Receiver<()>, wait: Duration) -> Option<()> {
		self.guard(cancel, smol::Timer::after(wait)).await.map(|_| ())
	}

	async fn drive(self: Arc<Self>, run_id: u64, cancel: channel::Receiver<()>) {
		let mut pacer = Pacer::new(self.settings.pacing.clone());
		loop {
			let next = self.with_run(run_id, |run, bus| {
				let identifier = run.targets.get(run.index)?.clone();
				run.step = Step::OpeningTarget;
				bus.emit(EngineEvent::ProgressUpdate(ProgressUpdate {
					run_id,
					identifier: identifier.clone(),
					index: run.index,
					total: run.targets.len(),
				}));
				Some(identifier)
			});
			let identifier = match next {
				None => return,
				Some(None) => break,
				Some(Some(identifier)) => identifier,
			};

			let Some(resolution) = self.process_target(run_id, &cancel, &mut pacer, &identifier).await else {
				return;
			};
			if let Resolution::Halted(outcome) = resolution {
				self.halt(Some(run_id), outcome);
				return;
			}
			let processed = self.with_run(run_id, |run, _| {
				if resolution == Resolution::Skipped {
					run.skipped.push(identifier.clone());
				}
				run.step = Step::Settling;
				run.index + 1
			});
			let Some(processed) = processed else {
				return;
			};
			if self.sleep(&cancel, pacer.settle_wait(processed)).await.is_none() {
				return;
			}
			let advanced = self.with_run(run_id, |run, _| {
				run.index += 1;
				run.step = Step::Idle;
			});
			if advanced.is_none() {
				return;
			}
		}

		if !self.finish(run_id) {
			return;
		}
		let delay = Duration::from_millis(self.settings.engine.return_delay_ms);
		if self.sleep(&cancel, delay).await.is_none() {
			return;
		}
		let slot = self.lock_slot();
		if slot.finished.as_ref().is_some_and(|s| s.run_id == run_id) {
			debug!("Engine: run {run_id} returning control to observer");
			self.bus.emit(EngineEvent::ReturnToObserver {
				run_id,
				directive: ReturnDirective::ShowAnalysis,
			});
		}
	}

	/// Drive one target to a resolution. `None` means the run was cancelled.
	async fn process_target(
		&self,
		run_id: u64,
		cancel: &channel::Receiver<()>,
		pacer: &mut Pacer,
		identifier: &str,
	) -> Option<Resolution> {
		if !self.guard(cancel, self.driver.automation_permitted()).await? {
			warn!("Engine: automation permission missing before {identifier}");
			return Some(Resolution::Halted(RunOutcome::PermissionRevoked));
		}

		let url = profile_url(&self.settings.engine.profile_base, identifier);
		debug!("Engine: opening {url} via {}", self.navigator.name());
		if let Err(err) = self.guard(cancel, self.navigator.open(&url)).await? {
			if let NavigationError::Backend(inner) = &err {
				if inner.is_interruption() {
					warn!("Engine: backend interrupted while opening {identifier}: {inner}");
					return Some(Resolution::Halted(RunOutcome::Interrupted));
				}
			}
			warn!("Engine: cannot open {identifier}, skipping: {err}");
			return Some(Resolution::Skipped);
		}
		self.sleep(cancel, pacer.open_wait()).await?;

		let labels = &self.settings.labels;
		match self
			.retry_step(run_id, cancel, pacer, Step::LocatingMenu, &labels.relationship_control, identifier)
			.await?
		{
			StepResult::Done => {}
			StepResult::Exhausted => return Some(Resolution::Skipped),
			StepResult::Halted(outcome) => return Some(Resolution::Halted(outcome)),
		}

		self.with_run(run_id, |run, _| run.step = Step::AwaitingConfirmation)?;
		self.sleep(cancel, pacer.confirmation_wait()).await?;

		match self
			.retry_step(run_id, cancel, pacer, Step::ConfirmingAction, &labels.confirmation, identifier)
			.await?
		{
			StepResult::Done => {}
			StepResult::Exhausted => return Some(Resolution::Skipped),
			StepResult::Halted(outcome) => return Some(Resolution::Halted(outcome)),
		}

		self.with_run(run_id, |run, _| {
			run.completed.push(identifier.to_string());
			run.step = Step::Settling;
		})?;
		info!("Engine: {identifier} confirmed");
		self.sleep(cancel, pacer.post_confirm_wait()).await?;
		Some(Resolution::Confirmed)
	}

	/// Repeat find-and-invoke for `query` until it succeeds or fails
	/// `max_failed_attempts` times in a row.
	async fn retry_step(
		&self,
		run_id: u64,
		cancel: &channel::Receiver<()>,
		pacer: &mut Pacer,
		step: Step,
		query: &ElementQuery,
		identifier: &str,
	) -> Option<StepResult> {
		self.with_run(run_id, |run, _| run.step = step)?;
		let max = self.settings.engine.max_failed_attempts.max(1);
		let mut failures = 0u32;
		loop {
			let delay = match step {
				Step::ConfirmingAction => pacer.confirm_attempt_delay(),
				_ => pacer.menu_attempt_delay(),
			};
			self.sleep(cancel, delay).await?;

			let first_look = step == Step::LocatingMenu && failures == 0;
			match self.attempt(cancel, query, first_look).await? {
				Attempt::Invoked => {
					debug!("Engine: {identifier}: {step:?} done after {failures} failed attempts");
					return Some(StepResult::Done);
				}
				Attempt::Halted(outcome) => return Some(StepResult::Halted(outcome)),
				Attempt::Missed(surfaces) => {
					failures += 1;
					debug!("Engine: {identifier}: {step:?} attempt {failures}/{max} found nothing");
					if failures >= max {
						warn!("Engine: {identifier}: {step:?} gave up after {failures} attempts, skipping");
						return Some(StepResult::Exhausted);
					}
					if self.settings.engine.dump_at_attempts.contains(&failures) {
						dump_surfaces(&surfaces, &format!("{identifier} {step:?} attempt {failures}"));
					}
					self.sleep(cancel, pacer.retry_wait()).await?;
				}
			}
		}
	}

	/// One look at the screen. The surfaces of a miss are handed back for
	/// diagnostics so the tree is only fetched once per attempt.
	async fn attempt(
		&self,
		cancel: &channel::Receiver<()>,
		query: &ElementQuery,
		first_look: bool,
	) -> Option<Attempt> {
		if !self.guard(cancel, self.driver.automation_permitted()).await? {
			warn!("Engine: automation permission revoked");
			return Some(Attempt::Halted(RunOutcome::PermissionRevoked));
		}
		let surfaces = match self.guard(cancel, self.driver.surfaces()).await? {
			Ok(surfaces) => surfaces,
			Err(err) => return Some(absorb(err, Vec::new())),
		};
		if first_look {
			trace_surfaces(&surfaces);
		}
		match self
			.guard(cancel, find_and_invoke(self.driver.as_ref(), &surfaces, query))
			.await?
		{
			Ok(true) => Some(Attempt::Invoked),
			Ok(false) => Some(Attempt::Missed(surfaces)),
			Err(err) => Some(absorb(err, surfaces)),
		}
	}
}

fn absorb(err: DriverError, surfaces: Vec<UiSurface>) -> Attempt {
	if err.is_interruption() {
		warn!("Engine: {err}");
		Attempt::Halted(RunOutcome::Interrupted)
	} else {
		debug!("Engine: backend error counted as a failed attempt: {err}");
		Attempt::Missed(surfaces)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::driver::ReplayDriver;
	use crate::navigator::identifier_from_url;
	use crate::pacing::DelayRange;
	use crate::tree::{NodeId, UiElement};
	use async_trait::async_trait;

	fn confirmable() -> Vec<Vec<UiElement>> {
		vec![
			vec![UiElement::new("main").with_child(UiElement::new("button").actionable().with_text("Following"))],
			vec![UiElement::new("dialog").with_child(UiElement::new("button").actionable().with_text("Unfollow"))],
		]
	}

	fn blank_page() -> Vec<UiElement> {
		vec![UiElement::new("main").with_child(UiElement::new("span").with_text("No posts yet"))]
	}

	fn settings(pacing: PacingConfig) -> EngineSettings {
		EngineSettings {
			engine: EngineConfig {
				return_delay_ms: 0,
				..EngineConfig::default()
			},
			pacing,
			labels: LabelConfig::default(),
		}
	}

	fn engine_over(driver: Arc<ReplayDriver>) -> (UnfollowEngine, channel::Receiver<EngineEvent>) {
		let bus = EventBus::new();
		let rx = bus.subscribe();
		let engine = UnfollowEngine::new(driver.clone(), driver, bus, settings(PacingConfig::immediate()));
		(engine, rx)
	}

	fn targets(ids: &[&str]) -> Vec<String> {
		ids.iter().map(|s| s.to_string()).collect()
	}

	async fn next_event(rx: &channel::Receiver<EngineEvent>) -> EngineEvent {
		future::or(async { rx.recv().await.ok() }, async {
			smol::Timer::after(Duration::from_secs(10)).await;
			None
		})
		.await
		.expect("timed out waiting for an engine event")
	}

	async fn run_to_completion(rx: &channel::Receiver<EngineEvent>) -> (Vec<ProgressUpdate>, CompletionRecord) {
		let mut progress = Vec::new();
		loop {
			match next_event(rx).await {
				EngineEvent::ProgressUpdate(p) => progress.push(p),
				EngineEvent::RunComplete(record) => return (progress, record),
				EngineEvent::ReturnToObserver { .. } => {}
			}
		}
	}

	async fn settle_briefly() {
		smol::Timer::after(Duration::from_millis(150)).await;
	}

	/// Replay backend whose `surfaces()` never answers while `stall_on` is shown
	struct StallingDriver {
		inner: ReplayDriver,
		stall_on: &'static str,
		current: Mutex<String>,
	}

	impl StallingDriver {
		fn new(inner: ReplayDriver, stall_on: &'static str) -> Arc<Self> {
			Arc::new(Self {
				inner,
				stall_on,
				current: Mutex::new(String::new()),
			})
		}
	}

	#[async_trait]
	impl UiDriver for StallingDriver {
		async fn surfaces(&self) -> crate::error::DriverResult<Vec<UiSurface>> {
			let stalled = self.current.lock().unwrap().as_str() == self.stall_on;
			if stalled {
				future::pending::<()>().await;
			}
			self.inner.surfaces().await
		}

		async fn perform_action(&self, surface: &UiSurface, node: NodeId) -> crate::error::DriverResult<bool> {
			self.inner.perform_action(surface, node).await
		}

		async fn automation_permitted(&self) -> bool {
			self.inner.automation_permitted().await
		}

		fn name(&self) -> &'static str {
			"stalling"
		}
	}

	#[async_trait]
	impl Navigator for StallingDriver {
		async fn open(&self, url: &str) -> Result<(), NavigationError> {
			*self.current.lock().unwrap() = identifier_from_url(url).unwrap_or_default().to_string();
			Navigator::open(&self.inner, url).await
		}

		fn name(&self) -> &'static str {
			"stalling"
		}
	}

	fn stalling_engine(driver: Arc<StallingDriver>, pacing: PacingConfig) -> (UnfollowEngine, channel::Receiver<EngineEvent>) {
		let bus = EventBus::new();
		let rx = bus.subscribe();
		let engine = UnfollowEngine::new(driver.clone(), driver, bus, settings(pacing));
		(engine, rx)
	}

	#[smol_potat::test]
	async fn test_empty_start_is_a_no_op() {
		let (engine, rx) = engine_over(Arc::new(ReplayDriver::new()));
		assert!(matches!(engine.start(Vec::new()), Err(SessionError::EmptyTargets)));
		assert_eq!(engine.snapshot(), None);
		assert!(!engine.is_running());
		settle_briefly().await;
		assert!(rx.try_recv().is_err());
	}

	#[smol_potat::test]
	async fn test_confirmed_then_skipped_scenario() {
		let driver = Arc::new(
			ReplayDriver::new()
				.with_script("alice", confirmable())
				.with_static("bob", blank_page()),
		);
		let (engine, rx) = engine_over(driver.clone());
		let run_id = engine.start(targets(&["alice", "bob"])).unwrap();

		let (progress, record) = run_to_completion(&rx).await;
		let seen: Vec<(&str, usize)> = progress.iter().map(|p| (p.identifier.as_str(), p.index)).collect();
		assert_eq!(seen, vec![("alice", 0), ("bob", 1)]);
		assert!(progress.iter().all(|p| p.total == 2 && p.run_id == run_id));

		assert_eq!(record.index, 2);
		assert_eq!(record.total, 2);
		assert!(record.success);
		assert_eq!(record.outcome, RunOutcome::Exhausted);
		assert_eq!(record.completed, targets(&["alice"]));
		assert_eq!(record.skipped, targets(&["bob"]));

		assert_eq!(driver.queries_for("alice"), 2);
		assert_eq!(driver.queries_for("bob"), DEFAULT_MAX_FAILED_ATTEMPTS as usize);
		assert_eq!(driver.actions_performed(), 2);

		assert_eq!(
			next_event(&rx).await,
			EngineEvent::ReturnToObserver {
				run_id,
				directive: ReturnDirective::ShowAnalysis,
			}
		);
		let snapshot = engine.snapshot().unwrap();
		assert!(!snapshot.running);
		assert_eq!((snapshot.index, snapshot.total), (2, 2));
	}

	#[smol_potat::test]
	async fn test_retry_bound_is_exact() {
		let driver = Arc::new(ReplayDriver::new().with_static("ghost", blank_page()));
		let (engine, rx) = engine_over(driver.clone());
		engine.start(targets(&["ghost"])).unwrap();
		let (_, record) = run_to_completion(&rx).await;
		assert_eq!(record.skipped, targets(&["ghost"]));
		assert_eq!(driver.queries_for("ghost"), 12);
		assert_eq!(driver.actions_performed(), 0);
	}

	#[smol_potat::test]
	async fn test_retry_bound_resets_between_steps() {
		// menu found at once, confirmation never shows
		let driver = Arc::new(ReplayDriver::new().with_script(
			"carol",
			vec![
				vec![UiElement::new("main").with_child(UiElement::new("button").actionable().with_text("Following"))],
				blank_page(),
			],
		));
		let (engine, rx) = engine_over(driver.clone());
		engine.start(targets(&["carol"])).unwrap();
		let (_, record) = run_to_completion(&rx).await;
		assert_eq!(record.skipped, targets(&["carol"]));
		assert!(record.completed.is_empty());
		assert_eq!(driver.queries_for("carol"), 1 + 12);
	}

	#[smol_potat::test]
	async fn test_index_is_monotonic() {
		let mut replay = ReplayDriver::new();
		let ids = ["u0", "u1", "u2", "u3", "u4", "u5"];
		for (i, id) in ids.iter().enumerate() {
			replay = if i % 2 == 0 {
				replay.with_script(id, confirmable())
			} else {
				replay.with_static(id, blank_page())
			};
		}
		let (engine, rx) = engine_over(Arc::new(replay));
		engine.start(targets(&ids)).unwrap();
		let (progress, record) = run_to_completion(&rx).await;
		let indices: Vec<usize> = progress.iter().map(|p| p.index).collect();
		assert_eq!(indices, (0..ids.len()).collect::<Vec<_>>());
		assert_eq!(record.index, ids.len());
		assert_eq!(record.completed, targets(&["u0", "u2", "u4"]));
	}

	#[smol_potat::test]
	async fn test_navigation_failure_skips_without_retrying() {
		let driver = Arc::new(
			ReplayDriver::new()
				.with_unreachable("gone")
				.with_script("dave", confirmable()),
		);
		let (engine, rx) = engine_over(driver.clone());
		engine.start(targets(&["gone", "dave"])).unwrap();
		let (progress, record) = run_to_completion(&rx).await;
		assert_eq!(progress.len(), 2);
		assert!(record.success);
		assert_eq!(record.skipped, targets(&["gone"]));
		assert_eq!(record.completed, targets(&["dave"]));
		assert_eq!(driver.queries_for("gone"), 0);
	}

	#[smol_potat::test]
	async fn test_permission_revocation_halts_like_stop() {
		let driver = Arc::new(
			ReplayDriver::new()
				.with_script("a", confirmable())
				.with_revocation_on_open("b")
				.with_script("b", confirmable())
				.with_script("c", confirmable()),
		);
		let (engine, rx) = engine_over(driver.clone());
		engine.start(targets(&["a", "b", "c"])).unwrap();
		let (progress, record) = run_to_completion(&rx).await;
		assert_eq!(progress.len(), 2);
		assert!(!record.success);
		assert_eq!(record.outcome, RunOutcome::PermissionRevoked);
		assert_eq!(record.index, 1);
		assert_eq!(record.completed, targets(&["a"]));
		assert_eq!(driver.queries_for("b"), 0);
		assert_eq!(engine.snapshot(), None);

		settle_briefly().await;
		assert!(rx.try_recv().is_err());
	}

	#[smol_potat::test]
	async fn test_missing_permission_halts_before_opening() {
		let driver = Arc::new(ReplayDriver::new().with_script("a", confirmable()));
		driver.set_permitted(false);
		let (engine, rx) = engine_over(driver.clone());
		engine.start(targets(&["a"])).unwrap();
		let (_, record) = run_to_completion(&rx).await;
		assert_eq!(record.outcome, RunOutcome::PermissionRevoked);
		assert_eq!(record.index, 0);
		assert!(driver.opened().is_empty());
	}

	#[smol_potat::test]
	async fn test_backend_interruption_halts_run() {
		let driver = Arc::new(
			ReplayDriver::new()
				.with_script("a", confirmable())
				.with_interruption("b"),
		);
		let (engine, rx) = engine_over(driver);
		engine.start(targets(&["a", "b", "c"])).unwrap();
		let (_, record) = run_to_completion(&rx).await;
		assert_eq!(record.outcome, RunOutcome::Interrupted);
		assert!(!record.success);
		assert_eq!(record.index, 1);
	}

	#[smol_potat::test]
	async fn test_stop_mid_run_clears_state() {
		let driver = StallingDriver::new(ReplayDriver::new().with_script("a", confirmable()), "b");
		let (engine, rx) = stalling_engine(driver, PacingConfig::immediate());
		let run_id = engine.start(targets(&["a", "b", "c"])).unwrap();

		loop {
			if let EngineEvent::ProgressUpdate(p) = next_event(&rx).await {
				if p.index == 1 {
					break;
				}
			}
		}
		settle_briefly().await;
		assert_eq!(engine.snapshot().unwrap().identifier.as_deref(), Some("b"));

		assert!(engine.stop());
		match next_event(&rx).await {
			EngineEvent::RunComplete(record) => {
				assert_eq!(record.run_id, run_id);
				assert!(!record.success);
				assert_eq!(record.outcome, RunOutcome::Stopped);
				assert_eq!(record.index, 1);
				assert_eq!(record.completed, targets(&["a"]));
			}
			other => panic!("expected completion, got {other:?}"),
		}
		assert_eq!(engine.snapshot(), None);
		assert!(!engine.stop());

		settle_briefly().await;
		assert!(rx.try_recv().is_err());
	}

	#[smol_potat::test]
	async fn test_stale_timer_cannot_resurrect_state() {
		let pacing = PacingConfig {
			settle: DelayRange::fixed(300),
			..PacingConfig::immediate()
		};
		let driver = StallingDriver::new(
			ReplayDriver::new()
				.with_script("a", confirmable())
				.with_script("c", confirmable()),
			"never",
		);
		let (engine, rx) = stalling_engine(driver, pacing);
		engine.start(targets(&["a", "c"])).unwrap();

		assert!(matches!(next_event(&rx).await, EngineEvent::ProgressUpdate(_)));
		// now inside the 300ms settle wait after confirming "a"
		smol::Timer::after(Duration::from_millis(100)).await;
		assert_eq!(engine.snapshot().unwrap().step, Step::Settling);
		assert!(engine.stop());
		match next_event(&rx).await {
			EngineEvent::RunComplete(record) => {
				assert_eq!(record.index, 0);
				assert_eq!(record.completed, targets(&["a"]));
			}
			other => panic!("expected completion, got {other:?}"),
		}

		smol::Timer::after(Duration::from_millis(500)).await;
		assert!(rx.try_recv().is_err());
		assert_eq!(engine.snapshot(), None);

		let second = engine.start(targets(&["c"])).unwrap();
		assert_eq!(second, 2);
		let (progress, record) = run_to_completion(&rx).await;
		assert!(progress.iter().all(|p| p.run_id == second));
		assert_eq!(record.run_id, second);
		assert_eq!(record.completed, targets(&["c"]));
	}

	#[smol_potat::test]
	async fn test_concurrent_start_is_rejected() {
		let driver = StallingDriver::new(ReplayDriver::new(), "x");
		let (engine, _rx) = stalling_engine(driver, PacingConfig::immediate());
		engine.start(targets(&["x"])).unwrap();
		assert!(matches!(engine.start(targets(&["y"])), Err(SessionError::AlreadyRunning)));

		let snapshot = engine.snapshot().unwrap();
		assert!(snapshot.running);
		assert_eq!(snapshot.total, 1);
		assert!(engine.stop());
	}

	#[smol_potat::test]
	async fn test_force_reset_is_silent() {
		let driver = StallingDriver::new(ReplayDriver::new(), "x");
		let (engine, rx) = stalling_engine(driver, PacingConfig::immediate());
		engine.start(targets(&["x"])).unwrap();
		assert!(matches!(next_event(&rx).await, EngineEvent::ProgressUpdate(_)));

		engine.force_reset();
		assert_eq!(engine.snapshot(), None);
		settle_briefly().await;
		assert!(rx.try_recv().is_err());

		assert!(engine.start(targets(&["y"])).is_ok());
		engine.force_reset();
	}

	#[derive(Clone, Default)]
	struct CapturedLog(Arc<Mutex<Vec<u8>>>);

	impl std::io::Write for CapturedLog {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn test_tree_dumped_at_configured_attempts_only() {
		let driver = Arc::new(ReplayDriver::new().with_static("ghost", blank_page()));
		let (engine, _rx) = engine_over(driver.clone());
		engine.shared.lock_slot().run = Some(RunState::new(1, targets(&["ghost"])));
		let (_cancel_tx, cancel_rx) = channel::bounded::<()>(1);

		let log = CapturedLog::default();
		let writer = log.clone();
		let subscriber = tracing_subscriber::fmt()
			.with_max_level(tracing::Level::DEBUG)
			.with_ansi(false)
			.with_writer(move || writer.clone())
			.finish();
		let result = tracing::subscriber::with_default(subscriber, || {
			smol::block_on(async {
				let url = profile_url(DEFAULT_PROFILE_BASE, "ghost");
				Navigator::open(driver.as_ref(), &url).await.unwrap();
				let mut pacer = Pacer::new(PacingConfig::immediate());
				let query = engine.settings().labels.relationship_control.clone();
				engine
					.shared
					.retry_step(1, &cancel_rx, &mut pacer, Step::LocatingMenu, &query, "ghost")
					.await
			})
		});
		assert!(matches!(result, Some(StepResult::Exhausted)));
		assert_eq!(driver.queries_for("ghost"), DEFAULT_MAX_FAILED_ATTEMPTS as usize);

		let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
		let dumped: Vec<u32> = (1..=DEFAULT_MAX_FAILED_ATTEMPTS)
			.filter(|n| {
				let header = format!("DUMP (ghost LocatingMenu attempt {n})");
				output.lines().any(|line| line.contains(&header))
			})
			.collect();
		assert_eq!(dumped, vec![3, 6]);
	}
}
