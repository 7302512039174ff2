//! Memory aging: prominence scoring and the periodic sweep.
//!
//! Every entity carries a prominence score combining recency, access
//! frequency, caller-assigned importance, and exponential decay. The sweep
//! recomputes scores per context and flags entities below the threshold as
//! "forgotten" — they stay stored and searchable, they just lose their
//! ranking boost. Aging never deletes data.

use crate::Result;
use crate::storage::EntityStore;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Named aging presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgingPreset {
    /// Slow decay, long half-life. Memories linger.
    Conservative,
    /// The default profile.
    Balanced,
    /// Fast decay for high-churn graphs.
    Aggressive,
    /// Recency-weighted profile for work graphs.
    WorkFocused,
    /// Frequency-weighted profile for personal graphs.
    PersonalFocused,
}

impl AgingPreset {
    /// Parses a preset name (kebab or snake case accepted).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('_', "-").as_str() {
            "conservative" => Some(Self::Conservative),
            "balanced" => Some(Self::Balanced),
            "aggressive" => Some(Self::Aggressive),
            "work-focused" | "work" => Some(Self::WorkFocused),
            "personal-focused" | "personal" => Some(Self::PersonalFocused),
            _ => None,
        }
    }
}

/// Aging model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgingConfig {
    /// Whether the sweep runs at all. Scoring still works when disabled.
    pub enabled: bool,
    /// Exponential recency decay rate per day.
    pub base_decay_rate: f64,
    /// Weight of the recency term.
    pub weight_recency: f64,
    /// Weight of the frequency term.
    pub weight_frequency: f64,
    /// Multiplier applied to `importance_weight` before capping.
    pub importance_multiplier: f64,
    /// Half-life of the decay term, in days.
    pub half_life_days: f64,
    /// Lower prominence bound.
    pub min_prominence: f64,
    /// Upper prominence bound.
    pub max_prominence: f64,
    /// Scores below this are flagged forgotten by the sweep.
    pub min_prominence_threshold: f64,
    /// Seconds between sweep passes.
    pub sweep_interval_secs: u64,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self::preset(AgingPreset::Balanced)
    }
}

impl AgingConfig {
    /// Returns the configuration for a named preset.
    #[must_use]
    pub fn preset(preset: AgingPreset) -> Self {
        let base = Self {
            enabled: true,
            base_decay_rate: 0.05,
            weight_recency: 0.35,
            weight_frequency: 0.25,
            importance_multiplier: 1.0,
            half_life_days: 90.0,
            min_prominence: 0.0,
            max_prominence: 2.0,
            min_prominence_threshold: 0.2,
            sweep_interval_secs: 24 * 3600,
        };
        match preset {
            AgingPreset::Balanced => base,
            AgingPreset::Conservative => Self {
                base_decay_rate: 0.01,
                weight_recency: 0.3,
                weight_frequency: 0.3,
                half_life_days: 180.0,
                min_prominence_threshold: 0.1,
                sweep_interval_secs: 48 * 3600,
                ..base
            },
            AgingPreset::Aggressive => Self {
                base_decay_rate: 0.15,
                weight_recency: 0.45,
                weight_frequency: 0.15,
                half_life_days: 30.0,
                min_prominence_threshold: 0.3,
                sweep_interval_secs: 12 * 3600,
                ..base
            },
            AgingPreset::WorkFocused => Self {
                base_decay_rate: 0.08,
                weight_recency: 0.4,
                weight_frequency: 0.2,
                half_life_days: 45.0,
                min_prominence_threshold: 0.25,
                ..base
            },
            AgingPreset::PersonalFocused => Self {
                base_decay_rate: 0.03,
                weight_recency: 0.3,
                weight_frequency: 0.3,
                half_life_days: 120.0,
                min_prominence_threshold: 0.15,
                ..base
            },
        }
    }

    /// Loads the preset named by `MEMORY_AGING_PRESET` with
    /// `MEMORY_AGING_*` overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let preset = std::env::var("MEMORY_AGING_PRESET")
            .ok()
            .and_then(|v| AgingPreset::parse(&v))
            .unwrap_or(AgingPreset::Balanced);
        let mut config = Self::preset(preset);

        if let Ok(v) = std::env::var("MEMORY_AGING_ENABLED") {
            config.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("MEMORY_AGING_DECAY_RATE")
            && let Ok(parsed) = v.parse::<f64>()
        {
            config.base_decay_rate = parsed.max(0.0);
        }
        if let Ok(v) = std::env::var("MEMORY_AGING_HALF_LIFE_DAYS")
            && let Ok(parsed) = v.parse::<f64>()
        {
            config.half_life_days = parsed.max(1.0);
        }
        if let Ok(v) = std::env::var("MEMORY_AGING_SWEEP_INTERVAL_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            config.sweep_interval_secs = parsed.max(60);
        }
        config
    }

    /// Computes the prominence score for one entity.
    ///
    /// `recency` and `decay` both fall with days since last access;
    /// `frequency` grows logarithmically with reads; `importance` is the
    /// capped caller weight. The result is clamped into
    /// `[min_prominence, max_prominence]`.
    #[must_use]
    pub fn prominence(
        &self,
        last_accessed: i64,
        access_count: u64,
        importance_weight: f64,
        now: i64,
    ) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let days = ((now - last_accessed).max(0) as f64) / SECONDS_PER_DAY;
        #[allow(clippy::cast_precision_loss)]
        let count = access_count as f64;

        let recency = (-self.base_decay_rate * days).exp();
        let frequency = (1.0 + count).ln() / 10.0_f64.ln();
        let importance = (importance_weight * self.importance_multiplier).min(self.max_prominence);
        let decay = 0.5_f64.powf(days / self.half_life_days);

        let raw = recency * self.weight_recency
            + frequency * self.weight_frequency
            + importance * 0.3
            + decay * 0.2;
        raw.clamp(self.min_prominence, self.max_prominence)
    }

    /// Maps a prominence score to a search relevance multiplier.
    ///
    /// Prominence normalized to `[0, 1]`, passed through a sigmoid centered
    /// at 0.5 with slope 3, scaled onto `[1.0, 3.0]`. Forgotten entities get
    /// a flat 1.0.
    #[must_use]
    pub fn search_boost(&self, prominence: f64, forgotten: bool) -> f64 {
        if forgotten {
            return 1.0;
        }
        let span = self.max_prominence - self.min_prominence;
        let normalized = if span > 0.0 {
            ((prominence - self.min_prominence) / span).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let sigmoid = 1.0 / (1.0 + (-3.0 * (normalized - 0.5)).exp());
        2.0_f64.mul_add(sigmoid, 1.0)
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SweepStats {
    /// Entities examined.
    pub scanned: usize,
    /// Entities whose stored score changed.
    pub updated: usize,
    /// Entities currently below the forgotten threshold.
    pub forgotten: usize,
}

/// Recomputes prominence for every entity in a store.
///
/// Entities below `min_prominence_threshold` are flagged forgotten; nothing
/// is ever deleted. Write-back is skipped when the stored score already
/// matches, keeping a quiet graph sweep cheap.
pub fn run_sweep(store: &EntityStore, config: &AgingConfig) -> Result<SweepStats> {
    let now = crate::current_timestamp();
    let mut stats = SweepStats::default();

    for entity in store.all_entities()? {
        stats.scanned += 1;
        let score = config.prominence(
            entity.last_accessed,
            entity.access_count,
            entity.importance_weight,
            now,
        );
        let forgotten = score < config.min_prominence_threshold;
        if forgotten {
            stats.forgotten += 1;
        }
        let unchanged =
            (entity.prominence_score - score).abs() < f64::EPSILON && entity.forgotten == forgotten;
        if !unchanged {
            store.write_prominence(&entity.name_normalized(), score, forgotten)?;
            stats.updated += 1;
        }
    }

    tracing::debug!(
        scanned = stats.scanned,
        updated = stats.updated,
        forgotten = stats.forgotten,
        "aging sweep complete"
    );
    metrics::counter!("aging_sweeps_total").increment(1);
    metrics::gauge!("aging_forgotten_entities").set(stats.forgotten as f64);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityInput;

    #[test]
    fn test_prominence_within_bounds() {
        let config = AgingConfig::default();
        for days_ago in [0_i64, 1, 30, 365, 10_000] {
            for count in [0_u64, 1, 100, 1_000_000] {
                for weight in [0.0, 1.0, 50.0] {
                    let now = 1_700_000_000;
                    let p = config.prominence(now - days_ago * 86_400, count, weight, now);
                    assert!(
                        (config.min_prominence..=config.max_prominence).contains(&p),
                        "p={p} out of bounds for days={days_ago} count={count} weight={weight}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_fresh_beats_stale() {
        let config = AgingConfig::default();
        let now = 1_700_000_000;
        let fresh = config.prominence(now, 5, 1.0, now);
        let stale = config.prominence(now - 365 * 86_400, 5, 1.0, now);
        assert!(fresh > stale);
    }

    #[test]
    fn test_frequency_raises_prominence() {
        let config = AgingConfig::default();
        let now = 1_700_000_000;
        let quiet = config.prominence(now, 0, 1.0, now);
        let busy = config.prominence(now, 500, 1.0, now);
        assert!(busy > quiet);
    }

    #[test]
    fn test_search_boost_range_and_monotonicity() {
        let config = AgingConfig::default();
        let low = config.search_boost(config.min_prominence, false);
        let mid = config.search_boost(config.max_prominence / 2.0, false);
        let high = config.search_boost(config.max_prominence, false);
        assert!((1.0..=3.0).contains(&low));
        assert!((1.0..=3.0).contains(&high));
        assert!(low < mid && mid < high);
        assert!((config.search_boost(config.max_prominence, true) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_presets_differ() {
        let balanced = AgingConfig::preset(AgingPreset::Balanced);
        let aggressive = AgingConfig::preset(AgingPreset::Aggressive);
        assert!(aggressive.base_decay_rate > balanced.base_decay_rate);
        assert!(aggressive.half_life_days < balanced.half_life_days);
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!(AgingPreset::parse("work_focused"), Some(AgingPreset::WorkFocused));
        assert_eq!(AgingPreset::parse("Balanced"), Some(AgingPreset::Balanced));
        assert_eq!(AgingPreset::parse("bogus"), None);
    }

    #[test]
    fn test_sweep_flags_but_never_deletes() {
        let config = AgingConfig {
            // Force everything below threshold
            min_prominence_threshold: 2.0,
            ..AgingConfig::default()
        };
        let store = EntityStore::in_memory(config.clone()).unwrap();
        store
            .create_entities(vec![
                EntityInput::new("A", "t"),
                EntityInput::new("B", "t"),
            ])
            .unwrap();

        let stats = run_sweep(&store, &config).unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.forgotten, 2);
        assert_eq!(store.entity_count().unwrap(), 2);

        let entity = store.peek_entity("A").unwrap().unwrap();
        assert!(entity.forgotten);
    }
}
