//! Error types for the unfollow automation system

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type covering every fallible surface of the crate.
///
/// Most callers only meet the narrower enums below: the session rejects a
/// start with a [`SessionError`], backends fail with a [`DriverError`] or a
/// [`NavigationError`], and the supporting file stores return
/// [`StoreError`], [`ImportError`] or [`ConfigError`]. `UnpalError` exists
/// so front ends can bubble any of them up with `?`.
///
/// Element-not-found is deliberately absent: the query layer answers
/// "nothing matched" with `None`, and the engine turns repeated misses into
/// a retry or a skip instead of an error.
///
/// ## Error Handling Patterns
///
/// ```rust,ignore
/// use unpal::{Session, SessionError};
///
/// match session.start(targets) {
///     Ok(run_id) => println!("run {run_id} started"),
///     Err(SessionError::AlreadyRunning) => eprintln!("a run is already active"),
///     Err(SessionError::EmptyTargets) => eprintln!("nothing to do"),
///     Err(err) => eprintln!("could not start: {err}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum UnpalError {
	#[error("Session error: {0}")]
	Session(#[from] SessionError),

	#[error("Driver error: {0}")]
	Driver(#[from] DriverError),

	#[error("Navigation error: {0}")]
	Navigation(#[from] NavigationError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Import error: {0}")]
	Import(#[from] ImportError),

	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),
}

/// Reasons the control surface refuses a request
#[derive(Debug, Error)]
pub enum SessionError {
	/// `start` was called with no targets; nothing changed
	#[error("No targets supplied")]
	EmptyTargets,

	/// A run is active; it must be stopped before another can start
	#[error("A run is already in progress")]
	AlreadyRunning,

	#[error("Invalid account identifier '{identifier}': {reason}")]
	InvalidIdentifier { identifier: String, reason: String },

	/// The background thread for the run could not be created
	#[error("Failed to spawn engine thread: {0}")]
	Spawn(#[source] std::io::Error),
}

/// Failures reported by a UI backend
#[derive(Debug, Error)]
pub enum DriverError {
	/// The platform withdrew the automation capability or tore the session down.
	/// Ends the run like an explicit stop.
	#[error("Automation interrupted: {reason}")]
	Interrupted { reason: String },

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The node handle no longer resolves to a live element
	#[error("Stale node handle: {handle}")]
	StaleNode { handle: String },

	#[error("Driver I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Driver JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl DriverError {
	pub fn is_interruption(&self) -> bool {
		matches!(self, DriverError::Interrupted { .. })
	}
}

impl From<reqwest::Error> for DriverError {
	fn from(err: reqwest::Error) -> Self {
		DriverError::Transport(err.to_string())
	}
}

/// Failures opening a target's profile surface
#[derive(Debug, Error)]
pub enum NavigationError {
	#[error("No handler available to open {url}")]
	NoHandler { url: String },

	#[error("Failed to launch '{program}': {source}")]
	Launch {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Navigation rejected by backend: {0}")]
	Backend(#[from] DriverError),
}

/// Removed-accounts store errors
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Store file corrupted: {path}")]
	Corrupted { path: PathBuf },

	#[error("Store I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Store JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Export file import errors
#[derive(Debug, Error)]
pub enum ImportError {
	#[error("Failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Malformed export JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Unrecognised export layout: {0}")]
	Layout(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Config I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Config JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid config value for {field}: {reason}")]
	Invalid { field: String, reason: String },
}

pub type UnpalResult<T> = Result<T, UnpalError>;

pub type SessionResult<T> = Result<T, SessionError>;

pub type DriverResult<T> = Result<T, DriverError>;

pub type StoreResult<T> = Result<T, StoreError>;

pub type ImportResult<T> = Result<T, ImportError>;

pub type ConfigResult<T> = Result<T, ConfigError>;
