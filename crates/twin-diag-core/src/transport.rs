//! Transport collaborator interface
//!
//! The diagnostic client never talks to the network itself. It wraps a
//! [`DeviceTransport`] (an MQTT device client in production, the
//! [`LoopbackTransport`](crate::loopback::LoopbackTransport) in tests and the
//! simulator) and intercepts only the outbound send path and twin delivery.
//!
//! Implementations must be thread-safe: handlers registered here may be
//! invoked from whatever thread the transport delivers on.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::callback::{
    CallbackContext, DeviceMethodCallback, MessageCallback, PropertyCallback, StatusCallback,
};
use crate::message::Message;
use crate::value::Property;

/// Errors raised by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Operation attempted before `open` or after `close`
    #[error("Transport is not open")]
    NotOpen,

    /// Network or connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The hub refused the operation
    #[error("Rejected by hub: {0}")]
    Rejected(String),

    /// Unsupported option or argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Generic transport error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Per-key desired-property subscription
pub struct DesiredSubscription {
    pub key: String,
    pub callback: Arc<dyn PropertyCallback>,
    pub context: CallbackContext,
}

impl DesiredSubscription {
    pub fn new(
        key: impl Into<String>,
        callback: Arc<dyn PropertyCallback>,
        context: CallbackContext,
    ) -> Self {
        Self {
            key: key.into(),
            callback,
            context,
        }
    }
}

impl Clone for DesiredSubscription {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            callback: Arc::clone(&self.callback),
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for DesiredSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesiredSubscription")
            .field("key", &self.key)
            .finish()
    }
}

/// Device-side transport to the hub
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait DeviceTransport: Send + Sync {
    fn open(&self) -> Result<(), TransportError>;

    fn close(&self) -> Result<(), TransportError>;

    fn set_option(&self, name: &str, value: serde_json::Value) -> Result<(), TransportError>;

    /// Queue a device-to-cloud event; `callback` receives the delivery status
    fn send_event(
        &self,
        message: Message,
        callback: Option<Arc<dyn StatusCallback>>,
        context: CallbackContext,
    ) -> Result<(), TransportError>;

    /// Register the handler for cloud-to-device messages
    fn set_message_callback(
        &self,
        callback: Arc<dyn MessageCallback>,
        context: CallbackContext,
    ) -> Result<(), TransportError>;

    /// Start twin traffic. `property_callback` receives every changed
    /// desired key that has no per-key subscription.
    fn start_device_twin(
        &self,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
        property_callback: Arc<dyn PropertyCallback>,
        property_context: CallbackContext,
    ) -> Result<(), TransportError>;

    fn subscribe_to_desired_properties(
        &self,
        subscriptions: Vec<DesiredSubscription>,
    ) -> Result<(), TransportError>;

    fn send_reported_properties(&self, properties: Vec<Property>) -> Result<(), TransportError>;

    fn subscribe_to_device_method(
        &self,
        method_callback: Arc<dyn DeviceMethodCallback>,
        method_context: CallbackContext,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
    ) -> Result<(), TransportError>;
}
