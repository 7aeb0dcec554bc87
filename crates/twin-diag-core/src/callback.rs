//! Handler interfaces shared by the client, the interceptor and transports
//!
//! Each handler travels with an opaque [`CallbackContext`] chosen by whoever
//! registered it. Closures implement the traits directly.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::message::Message;
use crate::value::TwinValue;

/// Opaque context handed back to a handler on every invocation
pub type CallbackContext = Option<Arc<dyn Any + Send + Sync>>;

/// Wrap a value as a callback context
pub fn context<T: Any + Send + Sync>(value: T) -> CallbackContext {
    Some(Arc::new(value))
}

/// Status reported by the hub for an asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    OkEmpty,
    BadFormat,
    Unauthorized,
    TooManyDevices,
    HubOrDeviceIdNotFound,
    PreconditionFailed,
    RequestEntityTooLarge,
    ThrottlingError,
    InternalServerError,
    ServerBusy,
    Error,
    MessageExpired,
    MessageCancelledOnClose,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::OkEmpty)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Receives acknowledgements for twin operations and sent events
pub trait StatusCallback: Send + Sync {
    fn on_status(&self, status: StatusCode, context: &CallbackContext);
}

impl<F> StatusCallback for F
where
    F: Fn(StatusCode, &CallbackContext) + Send + Sync,
{
    fn on_status(&self, status: StatusCode, context: &CallbackContext) {
        self(status, context)
    }
}

/// Receives desired-property changes, one key at a time
pub trait PropertyCallback: Send + Sync {
    fn on_property(&self, key: &str, value: &TwinValue, context: &CallbackContext);
}

impl<F> PropertyCallback for F
where
    F: Fn(&str, &TwinValue, &CallbackContext) + Send + Sync,
{
    fn on_property(&self, key: &str, value: &TwinValue, context: &CallbackContext) {
        self(key, value, context)
    }
}

/// How the device answers a cloud-to-device message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDisposition {
    Complete,
    Abandon,
    Reject,
}

/// Receives cloud-to-device messages
pub trait MessageCallback: Send + Sync {
    fn on_message(&self, message: &Message, context: &CallbackContext) -> MessageDisposition;
}

impl<F> MessageCallback for F
where
    F: Fn(&Message, &CallbackContext) -> MessageDisposition + Send + Sync,
{
    fn on_message(&self, message: &Message, context: &CallbackContext) -> MessageDisposition {
        self(message, context)
    }
}

/// Result of a direct method invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMethodResponse {
    pub status: i32,
    pub payload: serde_json::Value,
}

/// Handles direct method invocations from the cloud
pub trait DeviceMethodCallback: Send + Sync {
    fn on_method(
        &self,
        method_name: &str,
        payload: &serde_json::Value,
        context: &CallbackContext,
    ) -> DeviceMethodResponse;
}

impl<F> DeviceMethodCallback for F
where
    F: Fn(&str, &serde_json::Value, &CallbackContext) -> DeviceMethodResponse + Send + Sync,
{
    fn on_method(
        &self,
        method_name: &str,
        payload: &serde_json::Value,
        context: &CallbackContext,
    ) -> DeviceMethodResponse {
        self(method_name, payload, context)
    }
}

/// A handler together with the context it was registered with
pub struct Registration<H: ?Sized> {
    pub handler: Arc<H>,
    pub context: CallbackContext,
}

impl<H: ?Sized> Registration<H> {
    pub fn new(handler: Arc<H>, context: CallbackContext) -> Self {
        Self { handler, context }
    }
}

impl<H: ?Sized> Clone for Registration<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            context: self.context.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for Registration<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
