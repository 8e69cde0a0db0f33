//! Persistent record of accounts already unfollowed

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::paths::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedRecord {
	/// Always lowercase
	pub identifier: String,
	pub removed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
	version: u32,
	removed: Vec<RemovedRecord>,
}

const STORE_VERSION: u32 = 1;

/// JSON-backed set of removed accounts, ordered by removal time
#[derive(Debug)]
pub struct RemovedStore {
	path: PathBuf,
	records: Vec<RemovedRecord>,
}

impl RemovedStore {
	/// Open the store at `path`; a missing file is an empty store.
	pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
		let path = path.into();
		if !path.exists() {
			debug!("Store: {} does not exist yet", path.display());
			return Ok(Self {
				path,
				records: Vec::new(),
			});
		}
		let bytes = std::fs::read(&path)?;
		let file: StoreFile = serde_json::from_slice(&bytes).map_err(|err| {
			warn!("Store: cannot parse {}: {err}", path.display());
			StoreError::Corrupted { path: path.clone() }
		})?;
		debug!("Store: loaded {} records from {}", file.removed.len(), path.display());
		Ok(Self {
			path,
			records: file.removed,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn records(&self) -> &[RemovedRecord] {
		&self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn contains(&self, identifier: &str) -> bool {
		let key = identifier.to_lowercase();
		self.records.iter().any(|r| r.identifier == key)
	}

	/// Lowercase identifiers, for filtering analyses
	pub fn identifiers(&self) -> HashSet<String> {
		self.records.iter().map(|r| r.identifier.clone()).collect()
	}

	/// Record `identifiers` as removed now. Returns how many were new.
	pub fn add<I, S>(&mut self, identifiers: I) -> usize
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let now = Utc::now();
		let mut known = self.identifiers();
		let before = self.records.len();
		for identifier in identifiers {
			let key = identifier.as_ref().trim().to_lowercase();
			if key.is_empty() || !known.insert(key.clone()) {
				continue;
			}
			self.records.push(RemovedRecord {
				identifier: key,
				removed_at: now,
			});
		}
		self.records.len() - before
	}

	pub fn clear(&mut self) {
		self.records.clear();
	}

	pub fn save(&self) -> StoreResult<()> {
		let file = StoreFile {
			version: STORE_VERSION,
			removed: self.records.clone(),
		};
		let bytes = serde_json::to_vec_pretty(&file)?;
		atomic_write(&self.path, &bytes)?;
		info!("Store: saved {} records to {}", self.records.len(), self.path.display());
		Ok(())
	}
}
