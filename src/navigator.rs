//! Opening profile pages in an independent browser

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol::process::Command;
use tracing::{debug, info, warn};

use crate::driver::Navigator;
use crate::error::NavigationError;

pub const DEFAULT_PROFILE_BASE: &str = "https://www.instagram.com/";

/// Profile location for `identifier` under `base`
pub fn profile_url(base: &str, identifier: &str) -> String {
	format!("{}/{}", base.trim_end_matches('/'), identifier)
}

/// Last path segment of a profile URL, ignoring query and fragment
pub fn identifier_from_url(url: &str) -> Option<&str> {
	let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
	let (_, path) = rest.split_once('/')?;
	let path = path.split(['?', '#']).next().unwrap_or_default();
	path.split('/').filter(|s| !s.is_empty()).last()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
	/// Browser executables to look for on `PATH`, in order
	pub preferred: Vec<String>,
	/// Handlers that must never be used, e.g. the primary app itself
	pub excluded: Vec<String>,
}

impl Default for BrowserConfig {
	fn default() -> Self {
		Self {
			preferred: [
				"google-chrome",
				"chromium",
				"chromium-browser",
				"firefox",
				"brave-browser",
				"microsoft-edge",
				"opera",
			]
			.into_iter()
			.map(String::from)
			.collect(),
			excluded: vec!["instagram".to_string()],
		}
	}
}

/// Navigator that launches a desktop browser process per target.
///
/// Prefers an installed browser that is not an excluded handler; when none
/// is found it asks the platform's generic URL opener instead.
#[derive(Debug, Clone)]
pub struct SystemBrowser {
	config: BrowserConfig,
	search_path: Option<OsString>,
}

impl SystemBrowser {
	pub fn new(config: BrowserConfig) -> Self {
		Self {
			config,
			search_path: None,
		}
	}

	/// Search `path` instead of the process `PATH`
	pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
		self.search_path = Some(path.into());
		self
	}

	/// First preferred, non-excluded browser found on the search path
	pub fn resolve(&self) -> Option<PathBuf> {
		let search = self
			.search_path
			.clone()
			.or_else(|| std::env::var_os("PATH"))?;
		let dirs: Vec<PathBuf> = std::env::split_paths(&search).collect();
		self.config
			.preferred
			.iter()
			.filter(|name| !self.is_excluded(name))
			.find_map(|name| dirs.iter().find_map(|dir| executable_in(dir, name)))
	}

	fn is_excluded(&self, name: &str) -> bool {
		let name = name.to_lowercase();
		self.config
			.excluded
			.iter()
			.any(|ex| name.contains(&ex.to_lowercase()))
	}
}

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
	let candidate = dir.join(name);
	if candidate.is_file() {
		return Some(candidate);
	}
	if cfg!(windows) {
		let exe = dir.join(format!("{name}.exe"));
		if exe.is_file() {
			return Some(exe);
		}
	}
	None
}

fn generic_opener(url: &str) -> (&'static str, Vec<String>) {
	if cfg!(target_os = "macos") {
		("open", vec![url.to_string()])
	} else if cfg!(windows) {
		(
			"cmd",
			vec!["/C".to_string(), "start".to_string(), String::new(), url.to_string()],
		)
	} else {
		("xdg-open", vec![url.to_string()])
	}
}

fn launch(program: &str, args: &[String]) -> std::io::Result<()> {
	Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
		.map(|_child| ())
}

#[async_trait]
impl Navigator for SystemBrowser {
	async fn open(&self, url: &str) -> Result<(), NavigationError> {
		if let Some(browser) = self.resolve() {
			info!("Browser: opening {url} with {}", browser.display());
			let program = browser.to_string_lossy().into_owned();
			return launch(&program, &[url.to_string()])
				.map_err(|source| NavigationError::Launch { program, source });
		}

		let (program, args) = generic_opener(url);
		debug!("Browser: no preferred browser found, falling back to {program}");
		launch(program, &args).map_err(|source| {
			if source.kind() == std::io::ErrorKind::NotFound {
				warn!("Browser: generic opener {program} is not installed");
				NavigationError::NoHandler {
					url: url.to_string(),
				}
			} else {
				NavigationError::Launch {
					program: program.to_string(),
					source,
				}
			}
		})
	}

	fn name(&self) -> &'static str {
		"system-browser"
	}
}
