//! # Unfollow Automation
//!
//! Finds accounts that do not follow back from an account data export and
//! semi-automates unfollowing them by driving a UI: a retry-driven state
//! machine that presses the relationship control and its confirmation on
//! each target's profile, with randomised human-like pacing.
//!
//! The engine talks to the screen only through the [`driver::UiDriver`] and
//! [`driver::Navigator`] traits; observers follow along through the
//! [`events::EventBus`] and the [`session::Session`] control surface.

pub mod analysis;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod navigator;
pub mod observer;
pub mod pacing;
pub mod paths;
pub mod query;
pub mod session;
pub mod store;
pub mod tree;

// Re-export main API types
pub use analysis::{Account, Analysis, SortOrder};
pub use config::UnpalConfig;
pub use driver::{Navigator, ReplayDriver, UiDriver, WebDriverBackend};
pub use engine::{EngineConfig, EngineSettings, ProgressSnapshot, Step, UnfollowEngine};
pub use error::{
	ConfigError, DriverError, ImportError, NavigationError, SessionError, StoreError, UnpalError,
	UnpalResult,
};
pub use events::{CompletionRecord, EngineEvent, EventBus, ProgressUpdate, ReturnDirective, RunOutcome};
pub use observer::{ObserverState, ObserverStatus};
pub use pacing::{DelayRange, PacingConfig};
pub use query::{ElementQuery, Invocation, LabelConfig};
pub use session::Session;
pub use store::RemovedStore;
pub use tree::{UiElement, UiSurface};
