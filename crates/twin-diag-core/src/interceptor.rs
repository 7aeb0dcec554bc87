//! Desired-property interception
//!
//! The transport delivers twin deltas one key at a time. Two keys are
//! reserved for diagnostics and never reach the application:
//!
//! - `diag_sample_rate`: numeric rate in `[0, 100]`. Decimal strings such as
//!   `"10.0"` are accepted and truncated toward zero.
//! - `diag_enable`: exactly `"true"` or `"false"`.
//!
//! Reserved keys only change the policy when it is server-controlled. Invalid
//! values are discarded and the policy keeps its last valid state. Every
//! other key is forwarded verbatim to the application's handler, if one is
//! registered.

use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::callback::{CallbackContext, PropertyCallback, Registration};
use crate::policy::{RatePercentage, SamplingPolicy};
use crate::value::{TwinDelta, TwinValue};

/// Desired-property key carrying the sampling rate
pub const KEY_DIAG_SAMPLE_RATE: &str = "diag_sample_rate";

/// Desired-property key carrying the sampling switch
pub const KEY_DIAG_ENABLE: &str = "diag_enable";

/// Whether `key` belongs to the reserved diagnostic namespace
///
/// Matching is case-sensitive: `Diag_Enable` is an ordinary property.
pub fn is_reserved_key(key: &str) -> bool {
    key == KEY_DIAG_SAMPLE_RATE || key == KEY_DIAG_ENABLE
}

/// Why a reserved value was discarded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("expected a number, got {kind} '{raw}'")]
    NotNumeric { kind: &'static str, raw: String },

    #[error("sampling rate {0} is outside [0, 100]")]
    OutOfRange(f64),

    #[error("expected \"true\" or \"false\", got {kind} '{raw}'")]
    NotBoolean { kind: &'static str, raw: String },
}

/// What happened to one delivered key
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The sampling rate was set
    RateApplied(u8),
    /// The sampling switch was set
    SwitchApplied(bool),
    /// Reserved key ignored because the policy is not server-controlled
    IgnoredByAuthority,
    /// Reserved key with an invalid value
    Rejected(RejectReason),
    /// Ordinary key handed to the application
    Forwarded,
    /// Ordinary key with no application handler registered
    Dropped,
}

impl UpdateOutcome {
    /// True when the policy changed
    pub fn applied(&self) -> bool {
        matches!(self, UpdateOutcome::RateApplied(_) | UpdateOutcome::SwitchApplied(_))
    }
}

/// Parse a raw `diag_sample_rate` value
pub fn parse_sample_rate(value: &TwinValue) -> Result<RatePercentage, RejectReason> {
    let number = value.as_f64_lenient().ok_or_else(|| RejectReason::NotNumeric {
        kind: value.kind(),
        raw: value.to_string(),
    })?;

    let truncated = number.trunc();
    if !(0.0..=100.0).contains(&truncated) {
        return Err(RejectReason::OutOfRange(number));
    }

    RatePercentage::new(truncated as i64).ok_or(RejectReason::OutOfRange(number))
}

/// Parse a raw `diag_enable` value
pub fn parse_enable(value: &TwinValue) -> Result<bool, RejectReason> {
    match value.as_str() {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(RejectReason::NotBoolean {
            kind: value.kind(),
            raw: value.to_string(),
        }),
    }
}

/// Applies reserved keys to the policy and relays the rest
pub struct TwinUpdateInterceptor {
    policy: Arc<SamplingPolicy>,
    user: OnceLock<Registration<dyn PropertyCallback>>,
}

impl TwinUpdateInterceptor {
    pub fn new(policy: Arc<SamplingPolicy>) -> Self {
        Self {
            policy,
            user: OnceLock::new(),
        }
    }

    pub fn policy(&self) -> &Arc<SamplingPolicy> {
        &self.policy
    }

    /// Install the application's handler. Only the first call takes effect;
    /// returns whether this call installed it. The twin-start latch is the
    /// only caller.
    pub(crate) fn register_user(
        &self,
        handler: Arc<dyn PropertyCallback>,
        context: CallbackContext,
    ) -> bool {
        self.user.set(Registration::new(handler, context)).is_ok()
    }

    pub fn has_user_handler(&self) -> bool {
        self.user.get().is_some()
    }

    /// Handle one changed key. Never fails.
    ///
    /// `_delivery_context` is the context the transport holds for the
    /// interceptor's own registration. The application handler is always
    /// called with the context it registered.
    pub fn handle_property_update(
        &self,
        key: &str,
        value: &TwinValue,
        _delivery_context: &CallbackContext,
    ) -> UpdateOutcome {
        match key {
            KEY_DIAG_SAMPLE_RATE => self.apply_sample_rate(value),
            KEY_DIAG_ENABLE => self.apply_enable(value),
            _ => self.forward(key, value),
        }
    }

    /// Handle every key of a delta in turn
    pub fn handle_delta(&self, delta: &TwinDelta, context: &CallbackContext) -> Vec<UpdateOutcome> {
        delta
            .iter()
            .map(|(key, value)| self.handle_property_update(key, value, context))
            .collect()
    }

    fn apply_sample_rate(&self, value: &TwinValue) -> UpdateOutcome {
        if !self.policy.is_server_controlled() {
            debug!(
                key = KEY_DIAG_SAMPLE_RATE,
                authority = %self.policy.authority(),
                "Ignoring sampling rate update, rate is not server-controlled"
            );
            return UpdateOutcome::IgnoredByAuthority;
        }

        match parse_sample_rate(value) {
            Ok(rate) => {
                self.policy.set_rate_percentage(rate);
                info!(rate = rate.get(), "Sampling rate changed");
                UpdateOutcome::RateApplied(rate.get())
            }
            Err(reason) => {
                warn!(%reason, "Received invalid value of sampling percentage");
                UpdateOutcome::Rejected(reason)
            }
        }
    }

    fn apply_enable(&self, value: &TwinValue) -> UpdateOutcome {
        if !self.policy.is_server_controlled() {
            debug!(
                key = KEY_DIAG_ENABLE,
                authority = %self.policy.authority(),
                "Ignoring sampling switch update, switch is not server-controlled"
            );
            return UpdateOutcome::IgnoredByAuthority;
        }

        match parse_enable(value) {
            Ok(enabled) => {
                self.policy.set_enabled(enabled);
                info!(enabled, "Sampling switch changed");
                UpdateOutcome::SwitchApplied(enabled)
            }
            Err(reason) => {
                warn!(%reason, "Received invalid value of sampling switch");
                UpdateOutcome::Rejected(reason)
            }
        }
    }

    fn forward(&self, key: &str, value: &TwinValue) -> UpdateOutcome {
        match self.user.get() {
            Some(registration) => {
                debug!(key, "Forwarding desired property to application");
                registration
                    .handler
                    .on_property(key, value, &registration.context);
                UpdateOutcome::Forwarded
            }
            None => {
                debug!(key, "No application property handler, dropping update");
                UpdateOutcome::Dropped
            }
        }
    }
}

impl PropertyCallback for TwinUpdateInterceptor {
    fn on_property(&self, key: &str, value: &TwinValue, context: &CallbackContext) {
        self.handle_property_update(key, value, context);
    }
}

impl std::fmt::Debug for TwinUpdateInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinUpdateInterceptor")
            .field("policy", &self.policy)
            .field("has_user_handler", &self.has_user_handler())
            .finish()
    }
}
