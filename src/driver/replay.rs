//! Recorded-tree backend
//!
//! Replays UI trees captured from a real device or page. Each target has a
//! script of frames; a frame is the list of surfaces visible at that moment.
//! Opening a profile selects the target's script at frame 0 and every
//! performed action advances one frame, which is enough to rehearse the
//! open -> menu -> confirm sequence without touching a live account.
//!
//! Fixture directories hold one `<identifier>.json` per target:
//!
//! ```json
//! { "frames": [ [ { "class_name": "div", "children": [ ... ] } ], [ ... ] ] }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Navigator, UiDriver};
use crate::error::{DriverError, DriverResult, NavigationError};
use crate::navigator::identifier_from_url;
use crate::tree::{NodeId, UiElement, UiSurface};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayScript {
	pub frames: Vec<Vec<UiElement>>,
}

#[derive(Debug, Default)]
struct ReplayState {
	current: Option<String>,
	frame: usize,
	queries: HashMap<String, usize>,
	opened: Vec<String>,
}

#[derive(Debug)]
pub struct ReplayDriver {
	scripts: HashMap<String, ReplayScript>,
	state: Mutex<ReplayState>,
	actions: AtomicUsize,
	permitted: AtomicBool,
	unreachable: HashSet<String>,
	revoke_on_open: HashSet<String>,
	interrupt_on: HashSet<String>,
}

impl Default for ReplayDriver {
	fn default() -> Self {
		Self::new()
	}
}

impl ReplayDriver {
	pub fn new() -> Self {
		Self {
			scripts: HashMap::new(),
			state: Mutex::new(ReplayState::default()),
			actions: AtomicUsize::new(0),
			permitted: AtomicBool::new(true),
			unreachable: HashSet::new(),
			revoke_on_open: HashSet::new(),
			interrupt_on: HashSet::new(),
		}
	}

	/// Load every `*.json` script in `dir`, keyed by file stem.
	pub fn load_dir(dir: &Path) -> DriverResult<Self> {
		let mut driver = Self::new();
		for entry in std::fs::read_dir(dir)? {
			let path = entry?.path();
			if path.extension().and_then(|e| e.to_str()) != Some("json") {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			let bytes = std::fs::read(&path)?;
			let script: ReplayScript = serde_json::from_slice(&bytes)?;
			debug!("Replay: loaded {} frames for {stem}", script.frames.len());
			driver.scripts.insert(stem.to_lowercase(), script);
		}
		info!("Replay: loaded {} scripts from {}", driver.scripts.len(), dir.display());
		Ok(driver)
	}

	pub fn with_script(mut self, identifier: &str, frames: Vec<Vec<UiElement>>) -> Self {
		self.scripts
			.insert(identifier.to_lowercase(), ReplayScript { frames });
		self
	}

	/// A target whose page never changes, whatever is clicked
	pub fn with_static(self, identifier: &str, roots: Vec<UiElement>) -> Self {
		self.with_script(identifier, vec![roots])
	}

	/// Opening this target fails as if no handler could show it
	pub fn with_unreachable(mut self, identifier: &str) -> Self {
		self.unreachable.insert(identifier.to_lowercase());
		self
	}

	/// Opening this target withdraws the automation permission
	pub fn with_revocation_on_open(mut self, identifier: &str) -> Self {
		self.revoke_on_open.insert(identifier.to_lowercase());
		self
	}

	/// Querying this target's page reports a platform interruption
	pub fn with_interruption(mut self, identifier: &str) -> Self {
		self.interrupt_on.insert(identifier.to_lowercase());
		self
	}

	pub fn has_script(&self, identifier: &str) -> bool {
		self.scripts.contains_key(&identifier.to_lowercase())
	}

	/// Show `identifier`'s first frame
	pub fn select(&self, identifier: &str) {
		let mut state = self.lock();
		let key = identifier.to_lowercase();
		state.opened.push(key.clone());
		state.current = Some(key);
		state.frame = 0;
	}

	pub fn set_permitted(&self, permitted: bool) {
		self.permitted.store(permitted, Ordering::SeqCst);
	}

	/// Number of `surfaces()` calls made while `identifier` was shown
	pub fn queries_for(&self, identifier: &str) -> usize {
		self.lock()
			.queries
			.get(&identifier.to_lowercase())
			.copied()
			.unwrap_or(0)
	}

	pub fn actions_performed(&self) -> usize {
		self.actions.load(Ordering::SeqCst)
	}

	/// Targets opened so far, in order
	pub fn opened(&self) -> Vec<String> {
		self.lock().opened.clone()
	}

	fn lock(&self) -> MutexGuard<'_, ReplayState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[async_trait]
impl UiDriver for ReplayDriver {
	async fn surfaces(&self) -> DriverResult<Vec<UiSurface>> {
		let mut state = self.lock();
		let Some(current) = state.current.clone() else {
			return Ok(Vec::new());
		};
		*state.queries.entry(current.clone()).or_insert(0) += 1;
		if self.interrupt_on.contains(&current) {
			return Err(DriverError::Interrupted {
				reason: format!("replay interruption while showing {current}"),
			});
		}
		let frame = state.frame;
		Ok(self
			.scripts
			.get(&current)
			.and_then(|script| script.frames.get(frame))
			.map(|roots| UiSurface::from_roots(roots))
			.unwrap_or_default())
	}

	async fn perform_action(&self, surface: &UiSurface, node: NodeId) -> DriverResult<bool> {
		let target = surface.get(node).ok_or_else(|| DriverError::StaleNode {
			handle: format!("{}:{}", surface.id, node.index()),
		})?;
		self.actions.fetch_add(1, Ordering::SeqCst);

		let mut state = self.lock();
		let frames = state
			.current
			.as_ref()
			.and_then(|c| self.scripts.get(c))
			.map(|s| s.frames.len())
			.unwrap_or(0);
		if state.frame + 1 < frames {
			state.frame += 1;
		}
		debug!(
			"Replay: action on [{}] '{}' -> frame {}",
			target.class_name, target.text, state.frame
		);
		Ok(target.actionable)
	}

	async fn automation_permitted(&self) -> bool {
		self.permitted.load(Ordering::SeqCst)
	}

	fn name(&self) -> &'static str {
		"replay"
	}
}

#[async_trait]
impl Navigator for ReplayDriver {
	async fn open(&self, url: &str) -> Result<(), NavigationError> {
		let identifier = identifier_from_url(url).ok_or_else(|| NavigationError::NoHandler {
			url: url.to_string(),
		})?;
		let key = identifier.to_lowercase();
		if self.unreachable.contains(&key) {
			return Err(NavigationError::NoHandler {
				url: url.to_string(),
			});
		}
		if self.revoke_on_open.contains(&key) {
			self.set_permitted(false);
		}
		self.select(&key);
		Ok(())
	}

	fn name(&self) -> &'static str {
		"replay"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn two_frame_script() -> Vec<Vec<UiElement>> {
		vec![
			vec![UiElement::new("main").with_child(UiElement::new("button").actionable().with_text("Following"))],
			vec![UiElement::new("dialog").with_child(UiElement::new("button").actionable().with_text("Unfollow"))],
		]
	}

	#[smol_potat::test]
	async fn test_actions_advance_frames() {
		let driver = ReplayDriver::new().with_script("alice", two_frame_script());
		driver.open("https://www.instagram.com/alice").await.unwrap();

		let first = driver.surfaces().await.unwrap();
		assert_eq!(first[0].find_by_text("Following").len(), 1);

		let button = first[0].find_by_text("Following")[0];
		assert!(driver.perform_action(&first[0], button).await.unwrap());

		let second = driver.surfaces().await.unwrap();
		assert_eq!(second[0].find_by_text("Unfollow").len(), 1);

		// clamps at the last frame
		let button = second[0].find_by_text("Unfollow")[0];
		driver.perform_action(&second[0], button).await.unwrap();
		let third = driver.surfaces().await.unwrap();
		assert_eq!(third[0].find_by_text("Unfollow").len(), 1);

		assert_eq!(driver.queries_for("ALICE"), 3);
		assert_eq!(driver.actions_performed(), 2);
	}

	#[smol_potat::test]
	async fn test_unknown_target_shows_nothing() {
		let driver = ReplayDriver::new();
		driver.open("https://www.instagram.com/nobody/").await.unwrap();
		assert!(driver.surfaces().await.unwrap().is_empty());
		assert_eq!(driver.opened(), vec!["nobody".to_string()]);
	}

	#[smol_potat::test]
	async fn test_unreachable_and_revocation() {
		let driver = ReplayDriver::new()
			.with_unreachable("ghost")
			.with_revocation_on_open("carol");

		let err = driver.open("https://www.instagram.com/ghost").await.unwrap_err();
		assert!(matches!(err, NavigationError::NoHandler { .. }));

		assert!(driver.automation_permitted().await);
		driver.open("https://www.instagram.com/carol").await.unwrap();
		assert!(!driver.automation_permitted().await);
	}

	#[test]
	fn test_load_dir() {
		let temp_dir = TempDir::new().unwrap();
		let script = ReplayScript {
			frames: two_frame_script(),
		};
		std::fs::write(
			temp_dir.path().join("Alice.json"),
			serde_json::to_vec(&script).unwrap(),
		)
		.unwrap();
		std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

		let driver = ReplayDriver::load_dir(temp_dir.path()).unwrap();
		assert!(driver.has_script("alice"));
		assert!(!driver.has_script("notes"));
	}
}
