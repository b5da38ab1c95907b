//! Pipeline parameters and named profiles
//!
//! Two profiles exist:
//! - `strict`: tight consolidation, strong volume and momentum, entry needs a
//!   close back beyond the zone, stop at the swing extreme.
//! - `loose`: wider consolidation, weaker confirmations, plain range overlap,
//!   ATR-sized stop and targets.
//!
//! Any single threshold can be overridden on top of a profile.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Named parameter profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Strict,
    Loose,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Strict, Profile::Loose];

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Strict => "strict",
            Profile::Loose => "loose",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "a" => Ok(Profile::Strict),
            "loose" | "b" => Ok(Profile::Loose),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown profile '{}'. Valid: strict, loose",
                other
            ))),
        }
    }
}

/// Indicator windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub rsi_period: usize,
    pub vol_avg_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 50,
            ema_slow: 200,
            atr_period: 14,
            rsi_period: 14,
            vol_avg_period: 20,
        }
    }
}

/// Breakout detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutConfig {
    /// Bars in the consolidation window before the candidate bar
    pub range_window: usize,
    /// Max consolidation range as a fraction of its midprice
    pub range_pct: f64,
    /// Breakout volume must reach this multiple of the volume average
    pub vol_multiplier: f64,
    /// Bullish RSI floor; bearish ceiling is `100 - rsi_threshold`
    pub rsi_threshold: f64,
    /// Breakout body must reach this multiple of the window's median body
    #[serde(default = "default_body_multiplier")]
    pub body_multiplier: f64,
}

fn default_body_multiplier() -> f64 {
    1.5
}

impl BreakoutConfig {
    pub fn strict() -> Self {
        Self {
            range_window: 10,
            range_pct: 0.005,
            vol_multiplier: 1.5,
            rsi_threshold: 60.0,
            body_multiplier: default_body_multiplier(),
        }
    }

    pub fn loose() -> Self {
        Self {
            range_window: 10,
            range_pct: 0.01,
            vol_multiplier: 1.2,
            rsi_threshold: 55.0,
            body_multiplier: default_body_multiplier(),
        }
    }
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self::strict()
    }
}

/// Retracement band fractions of the impulse leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Bars strictly before the breakout searched for the swing extreme
    pub lookback: usize,
    pub start_fraction: f64,
    pub best_fraction: f64,
    pub end_fraction: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            start_fraction: 0.62,
            best_fraction: 0.705,
            end_fraction: 0.79,
        }
    }
}

/// How a bar must interact with a zone to trigger an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// The bar's range spans the band
    Overlap,
    /// The bar reaches the deep end of the band and closes back beyond its start
    OverlapAndClose,
}

/// Entry trigger parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Forward bars scanned after a breakout
    pub max_wait: usize,
    pub confirmation_policy: ConfirmationPolicy,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            max_wait: 10,
            confirmation_policy: ConfirmationPolicy::OverlapAndClose,
        }
    }
}

/// Stop/target sizing scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum RiskConfig {
    /// Stop at the zone's swing extreme, targets as fractions of entry-to-swing
    Swing {
        #[serde(default = "default_tp1_fraction")]
        tp1_fraction: f64,
        #[serde(default = "default_tp2_fraction")]
        tp2_fraction: f64,
    },
    /// Stop and targets as multiples of the entry bar's ATR
    Atr {
        #[serde(default = "default_stop_atr")]
        stop_atr: f64,
        #[serde(default = "default_tp1_atr")]
        tp1_atr: f64,
        #[serde(default = "default_tp2_atr")]
        tp2_atr: f64,
    },
}

fn default_tp1_fraction() -> f64 {
    0.27
}
fn default_tp2_fraction() -> f64 {
    0.62
}
fn default_stop_atr() -> f64 {
    1.0
}
fn default_tp1_atr() -> f64 {
    1.5
}
fn default_tp2_atr() -> f64 {
    3.0
}

impl RiskConfig {
    pub fn swing() -> Self {
        RiskConfig::Swing {
            tp1_fraction: default_tp1_fraction(),
            tp2_fraction: default_tp2_fraction(),
        }
    }

    pub fn atr() -> Self {
        RiskConfig::Atr {
            stop_atr: default_stop_atr(),
            tp1_atr: default_tp1_atr(),
            tp2_atr: default_tp2_atr(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self::swing()
    }
}

/// Outcome simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConfig {
    pub max_holding: usize,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self { max_holding: 20 }
    }
}

/// Full parameter set of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub profile: Profile,
    pub indicators: IndicatorConfig,
    pub breakout: BreakoutConfig,
    pub zone: ZoneConfig,
    pub entry: EntryConfig,
    pub risk: RiskConfig,
    pub outcome: OutcomeConfig,
    /// Stricter breakout thresholds re-applied after simulation.
    /// Breakouts failing them are dropped along with their entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidation: Option<BreakoutConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Strict)
    }
}

impl PipelineConfig {
    /// Defaults of a named profile
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Strict => Self {
                profile,
                indicators: IndicatorConfig::default(),
                breakout: BreakoutConfig::strict(),
                zone: ZoneConfig::default(),
                entry: EntryConfig {
                    max_wait: 10,
                    confirmation_policy: ConfirmationPolicy::OverlapAndClose,
                },
                risk: RiskConfig::swing(),
                outcome: OutcomeConfig::default(),
                revalidation: None,
            },
            Profile::Loose => Self {
                profile,
                indicators: IndicatorConfig::default(),
                breakout: BreakoutConfig::loose(),
                zone: ZoneConfig::default(),
                entry: EntryConfig {
                    max_wait: 10,
                    confirmation_policy: ConfirmationPolicy::Overlap,
                },
                risk: RiskConfig::atr(),
                outcome: OutcomeConfig::default(),
                revalidation: None,
            },
        }
    }

    /// Build from a JSON section: `profile` picks the defaults, every other
    /// key overrides them (nested objects are merged key by key).
    pub fn from_value(value: &serde_json::Value) -> PipelineResult<Self> {
        let profile = match value.get("profile") {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| PipelineError::InvalidConfig(format!("profile: {}", e)))?,
            None => Profile::default(),
        };
        Self::for_profile(profile).with_overrides(value)
    }

    /// Apply JSON overrides over this configuration
    pub fn with_overrides(&self, overrides: &serde_json::Value) -> PipelineResult<Self> {
        let mut base = serde_json::to_value(self)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        if !overrides.is_null() {
            merge_json(&mut base, overrides);
        }
        let config: PipelineConfig = serde_json::from_value(base)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets no stage can work with
    pub fn validate(&self) -> PipelineResult<()> {
        let ind = &self.indicators;
        for (name, period) in [
            ("ema_fast", ind.ema_fast),
            ("ema_slow", ind.ema_slow),
            ("atr_period", ind.atr_period),
            ("rsi_period", ind.rsi_period),
            ("vol_avg_period", ind.vol_avg_period),
            ("breakout.range_window", self.breakout.range_window),
            ("zone.lookback", self.zone.lookback),
            ("entry.max_wait", self.entry.max_wait),
            ("outcome.max_holding", self.outcome.max_holding),
        ] {
            if period == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        validate_breakout(&self.breakout)?;
        if let Some(revalidation) = &self.revalidation {
            validate_breakout(revalidation)?;
        }

        let z = &self.zone;
        if !(0.0 < z.start_fraction
            && z.start_fraction < z.best_fraction
            && z.best_fraction < z.end_fraction
            && z.end_fraction < 1.0)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "zone fractions must satisfy 0 < start < best < end < 1, got {} / {} / {}",
                z.start_fraction, z.best_fraction, z.end_fraction
            )));
        }

        let positive = match self.risk {
            RiskConfig::Swing {
                tp1_fraction,
                tp2_fraction,
            } => tp1_fraction > 0.0 && tp2_fraction > 0.0,
            RiskConfig::Atr {
                stop_atr,
                tp1_atr,
                tp2_atr,
            } => stop_atr > 0.0 && tp1_atr > 0.0 && tp2_atr > 0.0,
        };
        if !positive {
            return Err(PipelineError::InvalidConfig(
                "risk multipliers must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Bars the slowest indicator needs before it produces values
    pub fn warmup_bars(&self) -> usize {
        let ind = &self.indicators;
        ind.ema_fast
            .max(ind.ema_slow)
            .max(ind.atr_period)
            .max(ind.rsi_period)
            .max(ind.vol_avg_period)
    }
}

fn validate_breakout(b: &BreakoutConfig) -> PipelineResult<()> {
    if b.range_pct <= 0.0 || b.vol_multiplier < 0.0 || b.body_multiplier < 0.0 {
        return Err(PipelineError::InvalidConfig(
            "breakout thresholds must be non-negative and range_pct positive".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&b.rsi_threshold) {
        return Err(PipelineError::InvalidConfig(format!(
            "rsi_threshold must be within 0..=100, got {}",
            b.rsi_threshold
        )));
    }
    Ok(())
}

/// Recursively merge `overrides` into `base`
fn merge_json(base: &mut serde_json::Value, overrides: &serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(over_map)) => {
            for (key, value) in over_map {
                let nested = value.is_object() && base_map.get(key).is_some_and(|v| v.is_object());
                match base_map.get_mut(key) {
                    Some(existing) if nested => merge_json(existing, value),
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}
