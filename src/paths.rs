//! Default locations for configuration and data files

use dirs::{config_dir, data_dir};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "unpal";
pub const CONFIG_FILE: &str = "config.json";
pub const REMOVED_FILE: &str = "removed.json";

/// Get the default configuration directory for unpal, e.g.:
/// - Linux: ~/.config/unpal
/// - macOS: ~/Library/Application Support/unpal
/// - Windows: %APPDATA%\unpal
pub fn default_config_dir() -> Option<PathBuf> {
	config_dir().map(|mut p| {
		p.push(APP_DIR);
		p
	})
}

pub fn default_config_path() -> Option<PathBuf> {
	default_config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Get the default data directory for unpal, e.g.:
/// - Linux: ~/.local/share/unpal
/// - macOS: ~/Library/Application Support/unpal
/// - Windows: %APPDATA%\unpal
pub fn default_data_dir() -> Option<PathBuf> {
	data_dir().map(|mut p| {
		p.push(APP_DIR);
		p
	})
}

/// Where the removed-accounts store lives by default
pub fn default_removed_path() -> Option<PathBuf> {
	default_data_dir().map(|p| p.join(REMOVED_FILE))
}

/// Write `bytes` to a temp file next to `path` and rename it into place,
/// creating parent directories as needed.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent)?;
	}
	let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
	tmp_name.push(".tmp");
	let tmp = path.with_file_name(tmp_name);

	let mut f = File::create(&tmp)?;
	f.write_all(bytes)?;
	// Ensure data is written to disk before rename
	f.sync_all()?;
	drop(f);

	// Windows cannot rename over an existing file
	#[cfg(windows)]
	{
		if path.exists() {
			fs::remove_file(path)?;
		}
	}
	fs::rename(&tmp, path)
}
