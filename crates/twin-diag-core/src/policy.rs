//! Sampling policy shared by the outbound decorator and the twin interceptor
//!
//! The policy records who is authoritative for the sampling rate and holds
//! the current rate and on/off switch. Only a [`SamplingAuthority::Server`]
//! policy accepts updates; the other authorities ignore them silently.
//!
//! Rate and switch live in a single atomic word so a reader always observes a
//! pair that was written together, whatever thread the transport delivers on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

/// Upper bound of the sampling rate, inclusive
pub const MAX_RATE_PERCENTAGE: u8 = 100;

const RATE_MASK: u16 = 0x00FF;
const ENABLED_BIT: u16 = 0x0100;

/// Which party may set the sampling rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingAuthority {
    /// The rate is fixed by the device at construction
    #[serde(alias = "client")]
    Device,
    /// The cloud service controls rate and switch through the device twin
    Server,
    /// Diagnostics are disabled
    None,
}

impl SamplingAuthority {
    /// Whether the switch starts in the on position for this authority
    ///
    /// A server-controlled device stays off until the service turns it on.
    pub fn initially_enabled(self) -> bool {
        matches!(self, SamplingAuthority::Device)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SamplingAuthority::Device => "device",
            SamplingAuthority::Server => "server",
            SamplingAuthority::None => "none",
        }
    }
}

impl fmt::Display for SamplingAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SamplingAuthority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" | "client" => Ok(SamplingAuthority::Device),
            "server" => Ok(SamplingAuthority::Server),
            "none" => Ok(SamplingAuthority::None),
            other => Err(format!(
                "unknown sampling authority '{}', expected device, server or none",
                other
            )),
        }
    }
}

/// A sampling rate known to lie in `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RatePercentage(u8);

impl RatePercentage {
    pub const ZERO: RatePercentage = RatePercentage(0);
    pub const FULL: RatePercentage = RatePercentage(MAX_RATE_PERCENTAGE);

    /// Returns `None` when `value` is outside `[0, 100]`
    pub fn new(value: i64) -> Option<Self> {
        if (0..=i64::from(MAX_RATE_PERCENTAGE)).contains(&value) {
            Some(RatePercentage(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RatePercentage {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        RatePercentage::new(value).ok_or(value)
    }
}

impl fmt::Display for RatePercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A consistent view of rate and switch taken in one load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicySnapshot {
    pub rate_percentage: u8,
    pub enabled: bool,
}

impl PolicySnapshot {
    fn unpack(word: u16) -> Self {
        Self {
            rate_percentage: (word & RATE_MASK) as u8,
            enabled: word & ENABLED_BIT != 0,
        }
    }

    /// True when diagnostics are switched on with a non-zero rate
    pub fn needs_sampling(&self) -> bool {
        self.enabled && self.rate_percentage > 0
    }
}

fn pack(rate: RatePercentage, enabled: bool) -> u16 {
    let word = u16::from(rate.get());
    if enabled {
        word | ENABLED_BIT
    } else {
        word
    }
}

/// Sampling rate, switch and authority for one device session
pub struct SamplingPolicy {
    authority: SamplingAuthority,
    state: AtomicU16,
}

impl SamplingPolicy {
    /// Create a policy; the switch starts per [`SamplingAuthority::initially_enabled`]
    pub fn new(authority: SamplingAuthority, initial_rate: RatePercentage) -> Self {
        Self {
            authority,
            state: AtomicU16::new(pack(initial_rate, authority.initially_enabled())),
        }
    }

    pub fn authority(&self) -> SamplingAuthority {
        self.authority
    }

    /// Whether remote updates are accepted
    pub fn is_server_controlled(&self) -> bool {
        self.authority == SamplingAuthority::Server
    }

    pub fn rate_percentage(&self) -> u8 {
        self.snapshot().rate_percentage
    }

    pub fn enabled(&self) -> bool {
        self.snapshot().enabled
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot::unpack(self.state.load(Ordering::Acquire))
    }

    pub fn needs_sampling(&self) -> bool {
        self.snapshot().needs_sampling()
    }

    /// Set the rate. Returns `false` without touching state unless the
    /// policy is server-controlled.
    pub fn set_rate_percentage(&self, rate: RatePercentage) -> bool {
        if !self.is_server_controlled() {
            return false;
        }
        self.update(|word| (word & ENABLED_BIT) | u16::from(rate.get()));
        true
    }

    /// Set the switch. Returns `false` without touching state unless the
    /// policy is server-controlled.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        if !self.is_server_controlled() {
            return false;
        }
        self.update(|word| {
            if enabled {
                word | ENABLED_BIT
            } else {
                word & !ENABLED_BIT
            }
        });
        true
    }

    fn update(&self, f: impl Fn(u16) -> u16) {
        // The closure never returns None, so fetch_update cannot fail.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| Some(f(word)));
    }
}

impl fmt::Debug for SamplingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("SamplingPolicy")
            .field("authority", &self.authority)
            .field("rate_percentage", &snapshot.rate_percentage)
            .field("enabled", &snapshot.enabled)
            .finish()
    }
}
