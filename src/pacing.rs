//! Randomised, human-like timing between automation steps
//!
//! Every wait is sampled from a uniform range so the driven UI never sees a
//! fixed cadence. The settle wait between targets additionally injects rare
//! long "distraction" pauses and a cool-down every 5th and 10th target.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Inclusive-exclusive millisecond range. `min >= max` always yields `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
	pub min_ms: u64,
	pub max_ms: u64,
}

impl DelayRange {
	pub const ZERO: DelayRange = DelayRange::fixed(0);

	pub const fn new(min_ms: u64, max_ms: u64) -> Self {
		Self { min_ms, max_ms }
	}

	pub const fn fixed(ms: u64) -> Self {
		Self::new(ms, ms)
	}

	pub fn sample_ms<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
		if self.min_ms >= self.max_ms {
			self.min_ms
		} else {
			rng.gen_range(self.min_ms..self.max_ms)
		}
	}

	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
		Duration::from_millis(self.sample_ms(rng))
	}
}

/// Timing knobs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
	/// After opening a profile; page load dominates, so this is the longest
	pub open_wait: DelayRange,
	/// Before each attempt to find and press the relationship control
	pub menu_attempt_delay: DelayRange,
	/// Between pressing the relationship control and looking for the confirmation
	pub confirmation_wait: DelayRange,
	/// Before each attempt to find and press the confirmation
	pub confirm_attempt_delay: DelayRange,
	/// After a confirmed action, before settling
	pub post_confirm_wait: DelayRange,
	/// After a failed attempt, before the next one
	pub retry_wait: DelayRange,
	/// Ordinary wait before the next target
	pub settle: DelayRange,
	/// Replaces `settle` with probability `long_pause_percent`
	pub long_pause: DelayRange,
	pub long_pause_percent: u8,
	/// Replaces the above with probability `very_long_pause_percent`
	pub very_long_pause: DelayRange,
	pub very_long_pause_percent: u8,
	/// Added after every 5th processed target
	pub cooldown_every_5: DelayRange,
	/// Added after every 10th processed target, on top of the 5th cool-down
	pub cooldown_every_10: DelayRange,
	/// Fixed RNG seed, for reproducible rehearsals
	pub seed: Option<u64>,
}

impl Default for PacingConfig {
	fn default() -> Self {
		Self {
			open_wait: DelayRange::new(6_000, 9_000),
			menu_attempt_delay: DelayRange::new(300, 800),
			confirmation_wait: DelayRange::new(1_000, 2_000),
			confirm_attempt_delay: DelayRange::new(500, 1_200),
			post_confirm_wait: DelayRange::new(500, 1_500),
			retry_wait: DelayRange::new(1_500, 2_500),
			settle: DelayRange::new(2_000, 5_000),
			long_pause: DelayRange::new(5_000, 10_000),
			long_pause_percent: 15,
			very_long_pause: DelayRange::new(10_000, 15_000),
			very_long_pause_percent: 5,
			cooldown_every_5: DelayRange::new(2_000, 5_000),
			cooldown_every_10: DelayRange::new(3_000, 7_000),
			seed: None,
		}
	}
}

impl PacingConfig {
	/// No waits at all. Used by tests and dry runs against recorded trees.
	pub fn immediate() -> Self {
		Self {
			open_wait: DelayRange::ZERO,
			menu_attempt_delay: DelayRange::ZERO,
			confirmation_wait: DelayRange::ZERO,
			confirm_attempt_delay: DelayRange::ZERO,
			post_confirm_wait: DelayRange::ZERO,
			retry_wait: DelayRange::ZERO,
			settle: DelayRange::ZERO,
			long_pause: DelayRange::ZERO,
			long_pause_percent: 0,
			very_long_pause: DelayRange::ZERO,
			very_long_pause_percent: 0,
			cooldown_every_5: DelayRange::ZERO,
			cooldown_every_10: DelayRange::ZERO,
			seed: Some(0),
		}
	}
}

/// Per-run sampler over a [`PacingConfig`]
#[derive(Debug)]
pub struct Pacer {
	config: PacingConfig,
	rng: StdRng,
}

impl Pacer {
	pub fn new(config: PacingConfig) -> Self {
		let rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Self { config, rng }
	}

	pub fn open_wait(&mut self) -> Duration {
		self.config.open_wait.sample(&mut self.rng)
	}

	pub fn menu_attempt_delay(&mut self) -> Duration {
		self.config.menu_attempt_delay.sample(&mut self.rng)
	}

	pub fn confirmation_wait(&mut self) -> Duration {
		self.config.confirmation_wait.sample(&mut self.rng)
	}

	pub fn confirm_attempt_delay(&mut self) -> Duration {
		self.config.confirm_attempt_delay.sample(&mut self.rng)
	}

	pub fn post_confirm_wait(&mut self) -> Duration {
		self.config.post_confirm_wait.sample(&mut self.rng)
	}

	pub fn retry_wait(&mut self) -> Duration {
		self.config.retry_wait.sample(&mut self.rng)
	}

	/// Wait before the next target, once `processed` targets are done
	pub fn settle_wait(&mut self, processed: usize) -> Duration {
		let cfg = &self.config;
		let mut ms = cfg.settle.sample_ms(&mut self.rng);
		if self.rng.gen_range(0..100u8) < cfg.long_pause_percent {
			ms = cfg.long_pause.sample_ms(&mut self.rng);
		}
		if self.rng.gen_range(0..100u8) < cfg.very_long_pause_percent {
			ms = cfg.very_long_pause.sample_ms(&mut self.rng);
		}
		if processed > 0 && processed % 5 == 0 {
			ms += cfg.cooldown_every_5.sample_ms(&mut self.rng);
		}
		if processed > 0 && processed % 10 == 0 {
			ms += cfg.cooldown_every_10.sample_ms(&mut self.rng);
		}
		Duration::from_millis(ms)
	}
}
