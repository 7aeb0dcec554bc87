//! Twin Diagnostic Sampling
//!
//! A thin layer between an IoT device application and its transport that
//! marks a configurable share of outbound telemetry for end-to-end latency
//! tracking, and lets the cloud steer that share through the device twin.
//!
//! ## Features
//!
//! - **Sampling Policy**: Rate and on/off switch shared by one connection,
//!   read and written atomically
//! - **Sampling Authority**: The rate is fixed by the device, controlled by
//!   the cloud, or disabled
//! - **Message Decoration**: Sampled events carry a correlation id and a
//!   creation timestamp as application properties
//! - **Twin Interception**: The reserved desired properties
//!   `diag_sample_rate` and `diag_enable` update the policy and never reach
//!   the application
//! - **Defensive Parsing**: Invalid remote input is logged and discarded,
//!   never surfaced as an error
//!
//! ## Architecture
//!
//! 1. **Policy** (`policy`): [`SamplingPolicy`] owned by the session and
//!    shared by handle.
//!
//! 2. **Decorator** (`decorator`, `sampling`, `message`): per-message
//!    sampling decision and envelope.
//!
//! 3. **Interceptor** (`interceptor`, `value`): applies reserved keys and
//!    relays the rest to the application handler.
//!
//! 4. **Relay** (`relay`): status pass-through and the one-time twin-start
//!    latch.
//!
//! 5. **Client** (`client`, `transport`, `connection`): the session object
//!    wrapping any [`DeviceTransport`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use twin_diag_core::{DiagnosticDecorator, Message, RatePercentage, SamplingAuthority, SamplingPolicy};
//!
//! let policy = Arc::new(SamplingPolicy::new(SamplingAuthority::Device, RatePercentage::FULL));
//! let decorator = DiagnosticDecorator::new(Arc::clone(&policy));
//!
//! let message = decorator.decorate(Message::new("{\"temp\":21}"));
//! assert!(message.diagnostic_envelope().is_some());
//! ```

pub mod callback;
pub mod client;
pub mod config;
pub mod connection;
pub mod decorator;
pub mod error;
pub mod interceptor;
pub mod loopback;
pub mod message;
pub mod policy;
pub mod relay;
pub mod sampling;
pub mod transport;
pub mod value;

pub use callback::{
    context, CallbackContext, DeviceMethodCallback, DeviceMethodResponse, MessageCallback,
    MessageDisposition, PropertyCallback, StatusCallback, StatusCode,
};
pub use client::DiagnosticDeviceClient;
pub use config::{DiagnosticConfig, DiagnosticConfigBuilder};
pub use connection::{ConnectionIdentity, Credential};
pub use decorator::DiagnosticDecorator;
pub use error::{DiagError, Result};
pub use interceptor::{
    is_reserved_key, RejectReason, TwinUpdateInterceptor, UpdateOutcome, KEY_DIAG_ENABLE,
    KEY_DIAG_SAMPLE_RATE,
};
pub use loopback::LoopbackTransport;
pub use message::{DiagnosticEnvelope, Message, DIAG_CREATION_TIME_PROPERTY, DIAG_ID_PROPERTY};
pub use policy::{PolicySnapshot, RatePercentage, SamplingAuthority, SamplingPolicy};
pub use relay::{TwinStart, TwinStatusRelay};
pub use sampling::{ContinuousSampling, RandomSampling, SamplingStrategy, SamplingStrategyKind};
pub use transport::{DesiredSubscription, DeviceTransport, TransportError};
pub use value::{Property, TwinDelta, TwinValue};

#[cfg(any(test, feature = "testing"))]
pub use transport::MockDeviceTransport;
