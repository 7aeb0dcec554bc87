//! In-process transport
//!
//! [`LoopbackTransport`] keeps everything in memory: sent events and reported
//! properties are recorded, acknowledgements are delivered synchronously and
//! desired-property updates are injected with [`LoopbackTransport::deliver_delta`].
//! The simulator and the integration tests drive the client through it.
//!
//! Handlers are always invoked after the internal lock is released, so a
//! handler may call back into the transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::callback::{
    CallbackContext, DeviceMethodCallback, DeviceMethodResponse, MessageCallback,
    MessageDisposition, PropertyCallback, Registration, StatusCallback, StatusCode,
};
use crate::error::Result;
use crate::message::Message;
use crate::transport::{DesiredSubscription, DeviceTransport, TransportError};
use crate::value::{Property, TwinDelta};

#[derive(Default)]
struct TwinHandlers {
    status: Option<Registration<dyn StatusCallback>>,
    property: Option<Registration<dyn PropertyCallback>>,
    subscriptions: Vec<DesiredSubscription>,
}

#[derive(Default)]
struct LoopbackState {
    open: bool,
    options: BTreeMap<String, serde_json::Value>,
    sent: Vec<Message>,
    reported: Vec<Property>,
    twin_starts: usize,
    twin: TwinHandlers,
    message: Option<Registration<dyn MessageCallback>>,
    method: Option<Registration<dyn DeviceMethodCallback>>,
}

/// Memory-backed [`DeviceTransport`]
#[derive(Default)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::result::Result<MutexGuard<'_, LoopbackState>, TransportError> {
        self.state
            .lock()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn open_state(&self) -> std::result::Result<MutexGuard<'_, LoopbackState>, TransportError> {
        let state = self.state()?;
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        Ok(state)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.open).unwrap_or(false)
    }

    /// Every event accepted by `send_event`, in send order
    pub fn sent_messages(&self) -> Vec<Message> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Every property accepted by `send_reported_properties`
    pub fn reported_properties(&self) -> Vec<Property> {
        self.state
            .lock()
            .map(|s| s.reported.clone())
            .unwrap_or_default()
    }

    pub fn option(&self, name: &str) -> Option<serde_json::Value> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.options.get(name).cloned())
    }

    /// How many times `start_device_twin` reached this transport
    pub fn twin_start_count(&self) -> usize {
        self.state.lock().map(|s| s.twin_starts).unwrap_or(0)
    }

    /// Push a desired-property update to the device
    ///
    /// Keys with a per-key subscription go to that subscription. Every other
    /// key goes to the property handler given to the latest
    /// `start_device_twin`. Returns the number of keys delivered.
    pub fn deliver_delta(&self, delta: &TwinDelta) -> std::result::Result<usize, TransportError> {
        let (general, subscriptions) = {
            let state = self.open_state()?;
            let general = state.twin.property.clone().ok_or_else(|| {
                TransportError::Rejected("device twin has not been started".to_string())
            })?;
            (general, state.twin.subscriptions.clone())
        };

        let mut delivered = 0;
        for (key, value) in delta.iter() {
            match subscriptions.iter().find(|sub| sub.key == key) {
                Some(sub) => {
                    trace!(key, "Delivering desired property to subscription");
                    sub.callback.on_property(key, value, &sub.context);
                }
                None => {
                    trace!(key, "Delivering desired property to twin handler");
                    general.handler.on_property(key, value, &general.context);
                }
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Parse a desired-property document and deliver it
    pub fn deliver_desired_json(&self, document: &str) -> Result<usize> {
        let delta = TwinDelta::from_json(document)?;
        Ok(self.deliver_delta(&delta)?)
    }

    /// Deliver a cloud-to-device message; `None` when no handler is set
    pub fn deliver_message(
        &self,
        message: &Message,
    ) -> std::result::Result<Option<MessageDisposition>, TransportError> {
        let registration = self.open_state()?.message.clone();
        Ok(registration.map(|r| r.handler.on_message(message, &r.context)))
    }

    /// Invoke a direct method; `None` when the device did not subscribe
    pub fn invoke_method(
        &self,
        method_name: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<DeviceMethodResponse>, TransportError> {
        let registration = self.open_state()?.method.clone();
        Ok(registration.map(|r| r.handler.on_method(method_name, payload, &r.context)))
    }

    fn ack_twin(&self, status: StatusCode) -> std::result::Result<(), TransportError> {
        let registration = self.state()?.twin.status.clone();
        if let Some(r) = registration {
            r.handler.on_status(status, &r.context);
        }
        Ok(())
    }
}

impl DeviceTransport for LoopbackTransport {
    fn open(&self) -> std::result::Result<(), TransportError> {
        self.state()?.open = true;
        debug!("Loopback transport opened");
        Ok(())
    }

    fn close(&self) -> std::result::Result<(), TransportError> {
        self.state()?.open = false;
        debug!("Loopback transport closed");
        Ok(())
    }

    fn set_option(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        if name.is_empty() {
            return Err(TransportError::InvalidArgument(
                "option name must not be empty".to_string(),
            ));
        }
        self.state()?.options.insert(name.to_string(), value);
        Ok(())
    }

    fn send_event(
        &self,
        message: Message,
        callback: Option<Arc<dyn StatusCallback>>,
        context: CallbackContext,
    ) -> std::result::Result<(), TransportError> {
        self.open_state()?.sent.push(message);
        if let Some(callback) = callback {
            callback.on_status(StatusCode::OkEmpty, &context);
        }
        Ok(())
    }

    fn set_message_callback(
        &self,
        callback: Arc<dyn MessageCallback>,
        context: CallbackContext,
    ) -> std::result::Result<(), TransportError> {
        self.state()?.message = Some(Registration::new(callback, context));
        Ok(())
    }

    fn start_device_twin(
        &self,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
        property_callback: Arc<dyn PropertyCallback>,
        property_context: CallbackContext,
    ) -> std::result::Result<(), TransportError> {
        {
            let mut state = self.open_state()?;
            state.twin_starts += 1;
            state.twin.status = Some(Registration::new(status_callback, status_context));
            state.twin.property = Some(Registration::new(property_callback, property_context));
        }
        self.ack_twin(StatusCode::Ok)
    }

    fn subscribe_to_desired_properties(
        &self,
        subscriptions: Vec<DesiredSubscription>,
    ) -> std::result::Result<(), TransportError> {
        {
            let mut state = self.open_state()?;
            if state.twin.property.is_none() {
                return Err(TransportError::Rejected(
                    "device twin has not been started".to_string(),
                ));
            }
            for subscription in subscriptions {
                let existing = state
                    .twin
                    .subscriptions
                    .iter()
                    .position(|sub| sub.key == subscription.key);
                match existing {
                    Some(index) => state.twin.subscriptions[index] = subscription,
                    None => state.twin.subscriptions.push(subscription),
                }
            }
        }
        self.ack_twin(StatusCode::Ok)
    }

    fn send_reported_properties(
        &self,
        properties: Vec<Property>,
    ) -> std::result::Result<(), TransportError> {
        {
            let mut state = self.open_state()?;
            if state.twin.property.is_none() {
                return Err(TransportError::Rejected(
                    "device twin has not been started".to_string(),
                ));
            }
            state.reported.extend(properties);
        }
        self.ack_twin(StatusCode::OkEmpty)
    }

    fn subscribe_to_device_method(
        &self,
        method_callback: Arc<dyn DeviceMethodCallback>,
        method_context: CallbackContext,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
    ) -> std::result::Result<(), TransportError> {
        self.open_state()?.method = Some(Registration::new(method_callback, method_context));
        status_callback.on_status(StatusCode::Ok, &status_context);
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("LoopbackTransport");
        if let Ok(state) = self.state.lock() {
            s.field("open", &state.open)
                .field("sent", &state.sent.len())
                .field("reported", &state.reported.len())
                .field("twin_starts", &state.twin_starts);
        }
        s.finish()
    }
}
