//! Device client with diagnostic sampling
//!
//! [`DiagnosticDeviceClient`] wraps a [`DeviceTransport`] and owns the
//! per-connection sampling state. Outbound events pass through the
//! [`DiagnosticDecorator`]; desired-property traffic passes through the
//! [`TwinUpdateInterceptor`] so the cloud can steer sampling with the
//! reserved keys `diag_sample_rate` and `diag_enable`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use twin_diag_core::{
//!     CallbackContext, DiagnosticConfig, DiagnosticDeviceClient, LoopbackTransport,
//!     Message, SamplingAuthority, StatusCode, TwinValue,
//! };
//!
//! let config = DiagnosticConfig::new(SamplingAuthority::Server, 0);
//! let client = DiagnosticDeviceClient::new(
//!     "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=c2VjcmV0",
//!     LoopbackTransport::new(),
//!     &config,
//! )?;
//!
//! client.open()?;
//! client.start_device_twin(
//!     Arc::new(|_: StatusCode, _: &CallbackContext| {}),
//!     None,
//!     Arc::new(|key: &str, value: &TwinValue, _: &CallbackContext| {
//!         println!("{} = {}", key, value);
//!     }),
//!     None,
//! )?;
//!
//! client
//!     .transport()
//!     .deliver_desired_json(r#"{"diag_enable":"true","diag_sample_rate":100}"#)?;
//! assert_eq!(client.policy().rate_percentage(), 100);
//!
//! client.send_event(Message::new("23.5"), None, None)?;
//! assert!(client.transport().sent_messages()[0].diagnostic_envelope().is_some());
//! # Ok::<(), twin_diag_core::DiagError>(())
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::callback::{
    CallbackContext, DeviceMethodCallback, MessageCallback, PropertyCallback, StatusCallback,
};
use crate::config::DiagnosticConfig;
use crate::connection::ConnectionIdentity;
use crate::decorator::DiagnosticDecorator;
use crate::error::Result;
use crate::interceptor::TwinUpdateInterceptor;
use crate::message::Message;
use crate::policy::SamplingPolicy;
use crate::relay::{TwinStart, TwinStatusRelay};
use crate::transport::{DesiredSubscription, DeviceTransport};
use crate::value::Property;

/// A device session with the diagnostic interception layer in front of the transport
pub struct DiagnosticDeviceClient<T: DeviceTransport> {
    identity: ConnectionIdentity,
    transport: T,
    policy: Arc<SamplingPolicy>,
    decorator: DiagnosticDecorator,
    interceptor: Arc<TwinUpdateInterceptor>,
    relay: Arc<TwinStatusRelay>,
}

impl<T: DeviceTransport> DiagnosticDeviceClient<T> {
    /// Create a client over `transport`
    ///
    /// Fails when the connection string is malformed or the configuration
    /// is out of range. Nothing is sent until [`open`](Self::open).
    pub fn new(connection_string: &str, transport: T, config: &DiagnosticConfig) -> Result<Self> {
        let identity = ConnectionIdentity::parse(connection_string)?;
        let policy = Arc::new(config.build_policy()?);
        let decorator = DiagnosticDecorator::with_strategy(Arc::clone(&policy), config.strategy.build());
        let interceptor = Arc::new(TwinUpdateInterceptor::new(Arc::clone(&policy)));

        debug!(
            device_id = %identity.device_id,
            authority = %config.authority,
            rate = config.initial_rate_percentage,
            strategy = %config.strategy,
            "Created diagnostic device client"
        );

        Ok(Self {
            identity,
            transport,
            policy,
            decorator,
            interceptor,
            relay: Arc::new(TwinStatusRelay::new()),
        })
    }

    /// Open the transport and register the interception handlers for twin traffic
    pub fn open(&self) -> Result<()> {
        self.transport.open()?;

        let status: Arc<dyn StatusCallback> = self.relay.clone();
        let property: Arc<dyn PropertyCallback> = self.interceptor.clone();
        self.transport.start_device_twin(status, None, property, None)?;

        info!(
            host = %self.identity.host_name,
            device_id = %self.identity.device_id,
            policy = ?self.policy,
            "Diagnostic device client opened"
        );
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.transport.close()?;
        info!(device_id = %self.identity.device_id, "Diagnostic device client closed");
        Ok(())
    }

    pub fn set_option(&self, name: &str, value: serde_json::Value) -> Result<()> {
        Ok(self.transport.set_option(name, value)?)
    }

    /// Send a device-to-cloud event, attaching a diagnostic envelope when sampled
    pub fn send_event(
        &self,
        message: Message,
        callback: Option<Arc<dyn StatusCallback>>,
        context: CallbackContext,
    ) -> Result<()> {
        let message = self.decorator.decorate(message);
        Ok(self.transport.send_event(message, callback, context)?)
    }

    pub fn set_message_callback(
        &self,
        callback: Arc<dyn MessageCallback>,
        context: CallbackContext,
    ) -> Result<()> {
        Ok(self.transport.set_message_callback(callback, context)?)
    }

    /// Register the application's twin handlers
    ///
    /// The first call installs them behind the interception layer and
    /// never reaches the transport. Every later call is handed to the
    /// transport unchanged, so those handlers receive unfiltered twin
    /// traffic including the reserved diagnostic keys.
    pub fn start_device_twin(
        &self,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
        property_callback: Arc<dyn PropertyCallback>,
        property_context: CallbackContext,
    ) -> Result<TwinStart> {
        Ok(self.relay.start_twin(
            &self.transport,
            &self.interceptor,
            status_callback,
            status_context,
            property_callback,
            property_context,
        )?)
    }

    pub fn subscribe_to_desired_properties(
        &self,
        subscriptions: Vec<DesiredSubscription>,
    ) -> Result<()> {
        Ok(self.transport.subscribe_to_desired_properties(subscriptions)?)
    }

    pub fn send_reported_properties(&self, properties: Vec<Property>) -> Result<()> {
        Ok(self.transport.send_reported_properties(properties)?)
    }

    pub fn subscribe_to_device_method(
        &self,
        method_callback: Arc<dyn DeviceMethodCallback>,
        method_context: CallbackContext,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
    ) -> Result<()> {
        Ok(self.transport.subscribe_to_device_method(
            method_callback,
            method_context,
            status_callback,
            status_context,
        )?)
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn policy(&self) -> &Arc<SamplingPolicy> {
        &self.policy
    }

    pub fn decorator(&self) -> &DiagnosticDecorator {
        &self.decorator
    }

    pub fn interceptor(&self) -> &Arc<TwinUpdateInterceptor> {
        &self.interceptor
    }

    pub fn relay(&self) -> &Arc<TwinStatusRelay> {
        &self.relay
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: DeviceTransport> std::fmt::Debug for DiagnosticDeviceClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticDeviceClient")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .field("strategy", &self.decorator.strategy_name())
            .field("relay", &self.relay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::StatusCode;
    use crate::error::DiagError;
    use crate::policy::SamplingAuthority;
    use crate::transport::{MockDeviceTransport, TransportError};
    use crate::value::TwinValue;
    use serde_json::json;

    const CONNECTION_STRING: &str =
        "HostName=iothub.device.com;DeviceId=java;SharedAccessKey=NMNxZNArh+abc=";

    fn client(
        transport: MockDeviceTransport,
        authority: SamplingAuthority,
        rate: u8,
    ) -> DiagnosticDeviceClient<MockDeviceTransport> {
        DiagnosticDeviceClient::new(
            CONNECTION_STRING,
            transport,
            &DiagnosticConfig::new(authority, rate),
        )
        .unwrap()
    }

    fn noop_status() -> Arc<dyn StatusCallback> {
        Arc::new(|_: StatusCode, _: &CallbackContext| {})
    }

    fn noop_property() -> Arc<dyn PropertyCallback> {
        Arc::new(|_: &str, _: &TwinValue, _: &CallbackContext| {})
    }

    #[test]
    fn test_new_rejects_bad_input() {
        let err = DiagnosticDeviceClient::new(
            "HostName=h",
            MockDeviceTransport::new(),
            &DiagnosticConfig::new(SamplingAuthority::Device, 20),
        )
        .unwrap_err();
        assert!(matches!(err, DiagError::InvalidConnectionString(_)));
        assert!(err.is_user_error());

        let err = DiagnosticDeviceClient::new(
            CONNECTION_STRING,
            MockDeviceTransport::new(),
            &DiagnosticConfig::new(SamplingAuthority::Device, 101),
        )
        .unwrap_err();
        assert!(matches!(err, DiagError::Config(_)));
    }

    #[test]
    fn test_open_wires_interception_once() {
        let mut transport = MockDeviceTransport::new();
        transport.expect_open().times(1).returning(|| Ok(()));
        transport
            .expect_start_device_twin()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let client = client(transport, SamplingAuthority::Server, 0);
        client.open().unwrap();

        // The application's first registration is captured, not sent
        let outcome = client
            .start_device_twin(noop_status(), None, noop_property(), None)
            .unwrap();
        assert_eq!(outcome, TwinStart::Captured);
        assert!(client.interceptor().has_user_handler());
        assert!(client.relay().is_started());
    }

    #[test]
    fn test_open_failure_propagates() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_open()
            .returning(|| Err(TransportError::Connection("refused".to_string())));
        transport.expect_start_device_twin().never();

        let client = client(transport, SamplingAuthority::Server, 0);
        let err = client.open().unwrap_err();
        assert!(matches!(
            err,
            DiagError::Transport(TransportError::Connection(_))
        ));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_send_event_decorates_when_sampled() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_send_event()
            .withf(|message, callback, _| {
                message.diagnostic_envelope().is_some() && callback.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let client = client(transport, SamplingAuthority::Device, 100);
        client.send_event(Message::new("payload"), None, None).unwrap();
    }

    #[test]
    fn test_send_event_untouched_when_not_sampling() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_send_event()
            .withf(|message, _, _| {
                *message == Message::new("payload").with_property("temp", "21")
            })
            .times(2)
            .returning(|_, _, _| Ok(()));

        // Server authority starts switched off
        let client = client(transport, SamplingAuthority::Server, 100);
        let message = Message::new("payload").with_property("temp", "21");
        client.send_event(message.clone(), None, None).unwrap();
        assert_eq!(client.interceptor().policy().rate_percentage(), 100);

        assert!(!client.policy().needs_sampling());
        client.send_event(message, None, None).unwrap();
    }

    #[test]
    fn test_second_start_bypasses_to_transport() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_start_device_twin()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let client = client(transport, SamplingAuthority::Server, 0);
        assert_eq!(
            client
                .start_device_twin(noop_status(), None, noop_property(), None)
                .unwrap(),
            TwinStart::Captured
        );
        assert_eq!(
            client
                .start_device_twin(noop_status(), None, noop_property(), None)
                .unwrap(),
            TwinStart::Bypassed
        );
    }

    #[test]
    fn test_pass_through_operations() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_set_option()
            .withf(|name, value| name == "SetMinimumPollingInterval" && *value == json!(10))
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_subscribe_to_desired_properties()
            .withf(|subs| subs.len() == 1 && subs[0].key == "HomeTemp(F)")
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_send_reported_properties()
            .withf(|props| props == &vec![Property::new("diag_sample_rate", 50i64)])
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_subscribe_to_device_method()
            .times(1)
            .returning(|_, _, _, _| Err(TransportError::NotOpen));
        transport.expect_close().times(1).returning(|| Ok(()));

        let client = client(transport, SamplingAuthority::Server, 0);
        client
            .set_option("SetMinimumPollingInterval", json!(10))
            .unwrap();
        client
            .subscribe_to_desired_properties(vec![DesiredSubscription::new(
                "HomeTemp(F)",
                noop_property(),
                None,
            )])
            .unwrap();
        client
            .send_reported_properties(vec![Property::new("diag_sample_rate", 50i64)])
            .unwrap();

        let result = client.subscribe_to_device_method(
            Arc::new(|_: &str, _: &serde_json::Value, _: &CallbackContext| {
                crate::callback::DeviceMethodResponse {
                    status: 200,
                    payload: json!(null),
                }
            }),
            None,
            noop_status(),
            None,
        );
        assert!(matches!(
            result,
            Err(DiagError::Transport(TransportError::NotOpen))
        ));

        client.close().unwrap();
    }
}
