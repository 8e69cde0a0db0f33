//! Follower/following export parsing and the not-following-back analysis
//!
//! Two JSON layouts occur in account data exports:
//!
//! - `followers_1.json`: a top-level array of relationship entries
//! - `following.json`: an object whose `relationships_following` (or
//!   `relationships_followers`, `followers`, `following`) key holds that array
//!
//! Each entry carries `string_list_data: [{ value, href, timestamp }]` and
//! sometimes a `title`; the username is `value`, falling back to `title`.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ImportError, ImportResult};

const LIST_KEYS: [&str; 4] = [
	"relationships_following",
	"relationships_followers",
	"followers",
	"following",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
	pub username: String,
	pub profile_url: Option<String>,
	/// When the relationship started, if the export says
	pub since: Option<DateTime<Utc>>,
}

impl Account {
	pub fn new(username: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			profile_url: None,
			since: None,
		}
	}

	fn key(&self) -> String {
		self.username.to_lowercase()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
	Followers,
	Following,
}

impl ExportKind {
	/// Guess from a file name; anything not clearly followers is following.
	pub fn from_file_name(name: &str) -> Self {
		let name = name.to_lowercase();
		if name.contains("follower") && !name.contains("following") {
			ExportKind::Followers
		} else {
			ExportKind::Following
		}
	}
}

/// Parse one export JSON document into accounts, de-duplicated
/// case-insensitively in file order.
pub fn parse_export(content: &str) -> ImportResult<Vec<Account>> {
	let json: Value = serde_json::from_str(content)?;
	let accounts: Vec<Account> = match &json {
		Value::Array(entries) => entries.iter().flat_map(accounts_in_list_entry).collect(),
		Value::Object(map) => {
			let lists: Vec<&Vec<Value>> = LIST_KEYS
				.iter()
				.filter_map(|key| map.get(*key).and_then(Value::as_array))
				.collect();
			if lists.is_empty() {
				return Err(ImportError::Layout(format!(
					"object has none of the keys {}",
					LIST_KEYS.join(", ")
				)));
			}
			// first key that yields any account wins; an empty list falls through
			lists
				.into_iter()
				.map(|list| list.iter().filter_map(account_in_keyed_entry).collect::<Vec<_>>())
				.find(|accounts| !accounts.is_empty())
				.unwrap_or_default()
		}
		_ => return Err(ImportError::Layout("expected an array or an object".to_string())),
	};
	Ok(dedup(accounts))
}

/// Read and parse an export file, classifying it by name.
pub fn load_export_file(path: &Path) -> ImportResult<(ExportKind, Vec<Account>)> {
	let content = std::fs::read_to_string(path).map_err(|source| ImportError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
	let kind = ExportKind::from_file_name(&name);
	let accounts = parse_export(&content)?;
	debug!("Import: {} accounts ({kind:?}) from {}", accounts.len(), path.display());
	Ok((kind, accounts))
}

// Array layout: every string_list_data item is an account.
fn accounts_in_list_entry(entry: &Value) -> Vec<Account> {
	entry
		.get("string_list_data")
		.and_then(Value::as_array)
		.map(|items| {
			items
				.iter()
				.filter_map(|item| {
					let username = non_blank(item.get("value"))?;
					Some(account_from(username, item))
				})
				.collect()
		})
		.unwrap_or_default()
}

// Keyed layout: first string_list_data item, falling back to title.
fn account_in_keyed_entry(entry: &Value) -> Option<Account> {
	let title = non_blank(entry.get("title"));
	let first = entry
		.get("string_list_data")
		.and_then(Value::as_array)
		.and_then(|items| items.first());
	match first {
		Some(item) => {
			let username = non_blank(item.get("value")).or(title)?;
			Some(account_from(username, item))
		}
		None => title.map(Account::new),
	}
}

fn account_from(username: &str, item: &Value) -> Account {
	Account {
		username: username.to_string(),
		profile_url: non_blank(item.get("href")).map(str::to_string),
		since: item
			.get("timestamp")
			.and_then(Value::as_i64)
			.filter(|ts| *ts > 0)
			.and_then(|ts| DateTime::from_timestamp(ts, 0)),
	}
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
	value
		.and_then(Value::as_str)
		.map(str::trim)
		.filter(|s| !s.is_empty())
}

fn dedup(accounts: Vec<Account>) -> Vec<Account> {
	let mut seen = HashSet::new();
	accounts.into_iter().filter(|a| seen.insert(a.key())).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
	#[default]
	AsExported,
	Oldest,
	Newest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
	pub followers: Vec<Account>,
	pub following: Vec<Account>,
	/// Followed by me, not following me
	pub not_following_back: Vec<Account>,
	/// Following me, not followed by me
	pub not_followed_back: Vec<Account>,
}

impl Analysis {
	/// Compare the two lists. Accounts in `removed` (lowercase) are left
	/// out of both result lists.
	pub fn compute(followers: Vec<Account>, following: Vec<Account>, removed: &HashSet<String>) -> Self {
		let followers = dedup(followers);
		let following = dedup(following);
		let follower_keys: HashSet<String> = followers.iter().map(Account::key).collect();
		let following_keys: HashSet<String> = following.iter().map(Account::key).collect();

		let not_following_back = following
			.iter()
			.filter(|a| !follower_keys.contains(&a.key()) && !removed.contains(&a.key()))
			.cloned()
			.collect();
		let not_followed_back = followers
			.iter()
			.filter(|a| !following_keys.contains(&a.key()) && !removed.contains(&a.key()))
			.cloned()
			.collect();

		let analysis = Self {
			followers,
			following,
			not_following_back,
			not_followed_back,
		};
		info!(
			"Analysis: {} followers, {} following, {} not following back",
			analysis.followers.len(),
			analysis.following.len(),
			analysis.not_following_back.len()
		);
		analysis
	}

	/// Load and compare a set of export files
	pub fn from_files<P: AsRef<Path>>(paths: &[P], removed: &HashSet<String>) -> ImportResult<Self> {
		let mut followers = Vec::new();
		let mut following = Vec::new();
		for path in paths {
			let (kind, accounts) = load_export_file(path.as_ref())?;
			match kind {
				ExportKind::Followers => followers.extend(accounts),
				ExportKind::Following => following.extend(accounts),
			}
		}
		Ok(Self::compute(followers, following, removed))
	}

	pub fn mutual_count(&self) -> usize {
		self.followers.len() - self.not_followed_back_unfiltered()
	}

	fn not_followed_back_unfiltered(&self) -> usize {
		let following: HashSet<String> = self.following.iter().map(Account::key).collect();
		self.followers
			.iter()
			.filter(|a| !following.contains(&a.key()))
			.count()
	}

	/// Not-following-back accounts in the requested order; accounts
	/// without a timestamp sort last either way.
	pub fn not_following_back_sorted(&self, order: SortOrder) -> Vec<&Account> {
		let mut list: Vec<&Account> = self.not_following_back.iter().collect();
		match order {
			SortOrder::AsExported => {}
			SortOrder::Oldest => list.sort_by_key(|a| (a.since.is_none(), a.since)),
			SortOrder::Newest => list.sort_by_key(|a| (a.since.is_none(), a.since.map(std::cmp::Reverse))),
		}
		list
	}
}
