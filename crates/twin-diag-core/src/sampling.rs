//! Per-message sampling strategies
//!
//! A strategy answers one question: given a rate in `[0, 100]`, is this
//! message sampled? Rate 0 never samples and rate 100 always does, whatever
//! the strategy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::policy::MAX_RATE_PERCENTAGE;

/// Decides whether a single message is sampled
pub trait SamplingStrategy: Send + Sync + fmt::Debug {
    /// Returns the unique name of this strategy
    fn name(&self) -> &'static str;

    fn should_sample(&self, rate_percentage: u8) -> bool;
}

/// Independent uniform draw per message
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampling;

impl RandomSampling {
    pub fn new() -> Self {
        Self
    }
}

impl SamplingStrategy for RandomSampling {
    fn name(&self) -> &'static str {
        "random"
    }

    fn should_sample(&self, rate_percentage: u8) -> bool {
        if rate_percentage == 0 {
            return false;
        }
        if rate_percentage >= MAX_RATE_PERCENTAGE {
            return true;
        }
        rand::thread_rng().gen_range(0..MAX_RATE_PERCENTAGE) < rate_percentage
    }
}

/// Deterministic counter: samples exactly `rate` of every 100 consecutive
/// messages, spread evenly
#[derive(Debug, Default)]
pub struct ContinuousSampling {
    counter: AtomicU64,
}

impl ContinuousSampling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages seen so far
    pub fn seen(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl SamplingStrategy for ContinuousSampling {
    fn name(&self) -> &'static str {
        "continuous"
    }

    fn should_sample(&self, rate_percentage: u8) -> bool {
        let rate = u128::from(rate_percentage.min(MAX_RATE_PERCENTAGE));
        let n = u128::from(self.counter.fetch_add(1, Ordering::Relaxed)) + 1;
        let max = u128::from(MAX_RATE_PERCENTAGE);
        // Sample when the running quota crosses an integer boundary.
        n * rate / max > (n - 1) * rate / max
    }
}

/// Configurable choice of strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategyKind {
    #[default]
    Random,
    Continuous,
}

impl SamplingStrategyKind {
    pub fn build(self) -> Box<dyn SamplingStrategy> {
        match self {
            SamplingStrategyKind::Random => Box::new(RandomSampling::new()),
            SamplingStrategyKind::Continuous => Box::new(ContinuousSampling::new()),
        }
    }
}

impl fmt::Display for SamplingStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingStrategyKind::Random => f.write_str("random"),
            SamplingStrategyKind::Continuous => f.write_str("continuous"),
        }
    }
}

impl std::str::FromStr for SamplingStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(SamplingStrategyKind::Random),
            "continuous" => Ok(SamplingStrategyKind::Continuous),
            other => Err(format!(
                "unknown sampling strategy '{}', expected random or continuous",
                other
            )),
        }
    }
}
