//! Application configuration
//!
//! One JSON file with a section per concern. Every field has a default, so
//! a partial file (or none at all) is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::webdriver::WebDriverConfig;
use crate::engine::{EngineConfig, EngineSettings};
use crate::error::{ConfigError, ConfigResult};
use crate::navigator::BrowserConfig;
use crate::pacing::PacingConfig;
use crate::paths::atomic_write;
use crate::query::LabelConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpalConfig {
	pub engine: EngineConfig,
	pub pacing: PacingConfig,
	pub labels: LabelConfig,
	pub webdriver: WebDriverConfig,
	pub browser: BrowserConfig,
}

impl UnpalConfig {
	/// Load from `path`, falling back to defaults when the file is absent.
	pub fn load(path: &Path) -> ConfigResult<Self> {
		if !path.exists() {
			debug!("Config: {} not found, using defaults", path.display());
			return Ok(Self::default());
		}
		let bytes = std::fs::read(path)?;
		let config: Self = serde_json::from_slice(&bytes)?;
		config.validate()?;
		debug!("Config: loaded {}", path.display());
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> ConfigResult<()> {
		self.validate()?;
		let bytes = serde_json::to_vec_pretty(self)?;
		atomic_write(path, &bytes)?;
		info!("Config: wrote {}", path.display());
		Ok(())
	}

	pub fn validate(&self) -> ConfigResult<()> {
		if self.engine.max_failed_attempts == 0 {
			return Err(invalid("engine.max_failed_attempts", "must be at least 1"));
		}
		if self.engine.profile_base.trim().is_empty() {
			return Err(invalid("engine.profile_base", "must not be empty"));
		}
		let ranges = [
			("pacing.open_wait", self.pacing.open_wait),
			("pacing.menu_attempt_delay", self.pacing.menu_attempt_delay),
			("pacing.confirmation_wait", self.pacing.confirmation_wait),
			("pacing.confirm_attempt_delay", self.pacing.confirm_attempt_delay),
			("pacing.post_confirm_wait", self.pacing.post_confirm_wait),
			("pacing.retry_wait", self.pacing.retry_wait),
			("pacing.settle", self.pacing.settle),
			("pacing.long_pause", self.pacing.long_pause),
			("pacing.very_long_pause", self.pacing.very_long_pause),
			("pacing.cooldown_every_5", self.pacing.cooldown_every_5),
			("pacing.cooldown_every_10", self.pacing.cooldown_every_10),
		];
		if let Some((field, range)) = ranges.iter().find(|(_, r)| r.min_ms > r.max_ms) {
			return Err(invalid(field, &format!("min {} exceeds max {}", range.min_ms, range.max_ms)));
		}
		for (field, percent) in [
			("pacing.long_pause_percent", self.pacing.long_pause_percent),
			("pacing.very_long_pause_percent", self.pacing.very_long_pause_percent),
		] {
			if percent > 100 {
				return Err(invalid(field, "must be between 0 and 100"));
			}
		}
		if self.labels.relationship_control.text.is_empty() && self.labels.relationship_control.description.is_empty() {
			return Err(invalid("labels.relationship_control", "needs at least one candidate"));
		}
		if self.labels.confirmation.text.is_empty() && self.labels.confirmation.description.is_empty() {
			return Err(invalid("labels.confirmation", "needs at least one candidate"));
		}
		Ok(())
	}

	/// The parts of the configuration the engine consumes
	pub fn engine_settings(&self) -> EngineSettings {
		EngineSettings {
			engine: self.engine.clone(),
			pacing: self.pacing.clone(),
			labels: self.labels.clone(),
		}
	}
}

fn invalid(field: &str, reason: &str) -> ConfigError {
	ConfigError::Invalid {
		field: field.to_string(),
		reason: reason.to_string(),
	}
}
