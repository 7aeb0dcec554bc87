//! Outbound message decoration
//!
//! Every message the application sends passes through
//! [`DiagnosticDecorator::decorate`]. The decision is taken from a single
//! policy snapshot, so a concurrent twin update can never pair an old switch
//! with a new rate.

use std::sync::Arc;
use tracing::trace;

use crate::message::{DiagnosticEnvelope, Message};
use crate::policy::SamplingPolicy;
use crate::sampling::{RandomSampling, SamplingStrategy};

/// Attaches a diagnostic envelope to sampled messages
#[derive(Debug)]
pub struct DiagnosticDecorator {
    policy: Arc<SamplingPolicy>,
    strategy: Box<dyn SamplingStrategy>,
}

impl DiagnosticDecorator {
    /// Create a decorator using per-message random sampling
    pub fn new(policy: Arc<SamplingPolicy>) -> Self {
        Self::with_strategy(policy, Box::new(RandomSampling::new()))
    }

    pub fn with_strategy(policy: Arc<SamplingPolicy>, strategy: Box<dyn SamplingStrategy>) -> Self {
        Self { policy, strategy }
    }

    pub fn policy(&self) -> &Arc<SamplingPolicy> {
        &self.policy
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Decide whether the message is sampled and return the message to send
    ///
    /// Unsampled messages come back exactly as they went in.
    pub fn decorate(&self, mut message: Message) -> Message {
        let snapshot = self.policy.snapshot();
        if !snapshot.needs_sampling() {
            return message;
        }

        if !self.strategy.should_sample(snapshot.rate_percentage) {
            return message;
        }

        let envelope = DiagnosticEnvelope::generate();
        trace!(
            correlation_id = %envelope.correlation_id,
            rate = snapshot.rate_percentage,
            "Message sampled for diagnostics"
        );
        envelope.apply(&mut message);
        message
    }
}
