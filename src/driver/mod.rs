//! UI backends the engine drives
//!
//! A backend answers two questions for the engine: what is on screen right
//! now ([`UiDriver::surfaces`]) and "act on this node" ([`UiDriver::perform_action`]).
//! Opening a target's profile is a separate [`Navigator`] concern so an
//! accessibility-style driver can be paired with a system browser while an
//! embedded-browser driver navigates itself.

use async_trait::async_trait;

use crate::error::{DriverResult, NavigationError};
use crate::tree::{NodeId, UiSurface};

pub mod replay;
pub mod webdriver;

pub use replay::ReplayDriver;
pub use webdriver::WebDriverBackend;

/// Common interface for UI tree backends
#[async_trait]
pub trait UiDriver: Send + Sync {
	/// Every currently visible surface, topmost last. An empty list is valid.
	async fn surfaces(&self) -> DriverResult<Vec<UiSurface>>;

	/// Invoke the default action on `node`.
	///
	/// Returns whether the platform acknowledged the action. Platforms that
	/// cannot tell return `true`.
	async fn perform_action(&self, surface: &UiSurface, node: NodeId) -> DriverResult<bool>;

	/// Whether the platform currently grants the automation capability.
	/// Polled; implementations must not change any state.
	async fn automation_permitted(&self) -> bool;

	/// Backend name for logging and identification
	fn name(&self) -> &'static str;
}

/// Opens a target's profile surface
#[async_trait]
pub trait Navigator: Send + Sync {
	async fn open(&self, url: &str) -> Result<(), NavigationError>;

	fn name(&self) -> &'static str;
}
