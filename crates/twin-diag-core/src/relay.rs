//! Twin status relay and the one-time twin-start latch
//!
//! The client registers its own status and property handlers with the
//! transport. The application's handlers are captured by the first
//! [`TwinStatusRelay::start_twin`] call and invoked behind the internal ones.
//!
//! The latch fires once. Every later `start_twin` call goes straight to the
//! transport with the caller's handlers, so those handlers see raw twin
//! traffic, reserved diagnostic keys included, and the captured registration
//! stays as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::callback::{CallbackContext, PropertyCallback, Registration, StatusCallback, StatusCode};
use crate::interceptor::TwinUpdateInterceptor;
use crate::transport::{DeviceTransport, TransportError};

/// What a `start_twin` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinStart {
    /// Handlers captured behind the interception layer
    Captured,
    /// Handlers passed directly to the transport, bypassing interception
    Bypassed,
}

/// Forwards twin status acknowledgements to the application
#[derive(Default)]
pub struct TwinStatusRelay {
    started: AtomicBool,
    user: OnceLock<Registration<dyn StatusCallback>>,
}

impl TwinStatusRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the latch has fired
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn has_user_handler(&self) -> bool {
        self.user.get().is_some()
    }

    /// Capture the application's handlers on the first call, bypass afterwards
    pub fn start_twin<T: DeviceTransport + ?Sized>(
        &self,
        transport: &T,
        interceptor: &TwinUpdateInterceptor,
        status_callback: Arc<dyn StatusCallback>,
        status_context: CallbackContext,
        property_callback: Arc<dyn PropertyCallback>,
        property_context: CallbackContext,
    ) -> Result<TwinStart, TransportError> {
        let first = self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if first {
            let status_installed = self
                .user
                .set(Registration::new(status_callback, status_context))
                .is_ok();
            let property_installed =
                interceptor.register_user(property_callback, property_context);
            if !(status_installed && property_installed) {
                warn!(
                    status_installed,
                    property_installed, "Twin handler slot already filled, keeping earlier handler"
                );
            }
            debug!("Captured application twin handlers");
            return Ok(TwinStart::Captured);
        }

        debug!("Twin already started, passing handlers directly to transport");
        transport.start_device_twin(
            status_callback,
            status_context,
            property_callback,
            property_context,
        )?;
        Ok(TwinStart::Bypassed)
    }

    /// Hand a status to the application's handler, if one was captured
    pub fn relay_status(&self, status: StatusCode, _delivery_context: &CallbackContext) {
        debug!(%status, "Device twin operation acknowledged");
        if let Some(registration) = self.user.get() {
            registration
                .handler
                .on_status(status, &registration.context);
        }
    }
}

impl StatusCallback for TwinStatusRelay {
    fn on_status(&self, status: StatusCode, context: &CallbackContext) {
        self.relay_status(status, context);
    }
}

impl std::fmt::Debug for TwinStatusRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinStatusRelay")
            .field("started", &self.is_started())
            .field("has_user_handler", &self.has_user_handler())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::context;
    use crate::policy::{RatePercentage, SamplingAuthority, SamplingPolicy};
    use crate::transport::MockDeviceTransport;
    use crate::value::TwinValue;
    use std::sync::Mutex;

    fn interceptor() -> TwinUpdateInterceptor {
        TwinUpdateInterceptor::new(Arc::new(SamplingPolicy::new(
            SamplingAuthority::Server,
            RatePercentage::ZERO,
        )))
    }

    fn status_recorder() -> (Arc<dyn StatusCallback>, Arc<Mutex<Vec<(StatusCode, Option<&'static str>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn StatusCallback> =
            Arc::new(move |status: StatusCode, ctx: &CallbackContext| {
                let tag = ctx.as_ref().and_then(|c| c.downcast_ref::<&'static str>()).copied();
                sink.lock().unwrap().push((status, tag));
            });
        (handler, seen)
    }

    fn noop_property() -> Arc<dyn PropertyCallback> {
        Arc::new(|_: &str, _: &TwinValue, _: &CallbackContext| {})
    }

    #[test]
    fn test_status_without_user_is_noop() {
        let relay = TwinStatusRelay::new();
        relay.relay_status(StatusCode::Ok, &None);
        assert!(!relay.has_user_handler());
    }

    #[test]
    fn test_first_start_captures_without_transport_call() {
        let mut transport = MockDeviceTransport::new();
        transport.expect_start_device_twin().never();

        let relay = TwinStatusRelay::new();
        let interceptor = interceptor();
        let (status, seen) = status_recorder();

        let outcome = relay
            .start_twin(&transport, &interceptor, status, context("app"), noop_property(), None)
            .unwrap();

        assert_eq!(outcome, TwinStart::Captured);
        assert!(relay.is_started());
        assert!(interceptor.has_user_handler());

        relay.on_status(StatusCode::OkEmpty, &None);
        assert_eq!(*seen.lock().unwrap(), vec![(StatusCode::OkEmpty, Some("app"))]);
    }

    #[test]
    fn test_captured_property_handler_receives_updates() {
        let transport = MockDeviceTransport::new();
        let relay = TwinStatusRelay::new();
        let interceptor = interceptor();
        let (status, _) = status_recorder();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let property: Arc<dyn PropertyCallback> =
            Arc::new(move |key: &str, _: &TwinValue, ctx: &CallbackContext| {
                let tag = ctx.as_ref().and_then(|c| c.downcast_ref::<&'static str>()).copied();
                sink.lock().unwrap().push((key.to_string(), tag));
            });

        let outcome = relay
            .start_twin(&transport, &interceptor, status, None, property, context("app"))
            .unwrap();
        assert_eq!(outcome, TwinStart::Captured);

        interceptor.handle_property_update("custom", &TwinValue::text("value"), &None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("custom".to_string(), Some("app"))]
        );
    }

    #[test]
    fn test_later_starts_bypass_interception() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_start_device_twin()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let relay = TwinStatusRelay::new();
        let interceptor = interceptor();
        let (first, first_seen) = status_recorder();
        let (second, second_seen) = status_recorder();

        relay
            .start_twin(&transport, &interceptor, first, None, noop_property(), None)
            .unwrap();
        let outcome = relay
            .start_twin(&transport, &interceptor, second, None, noop_property(), None)
            .unwrap();

        assert_eq!(outcome, TwinStart::Bypassed);

        // The captured registration is unchanged by the bypassed call
        relay.relay_status(StatusCode::Ok, &None);
        assert_eq!(first_seen.lock().unwrap().len(), 1);
        assert!(second_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bypass_propagates_transport_error() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_start_device_twin()
            .returning(|_, _, _, _| Err(TransportError::NotOpen));

        let relay = TwinStatusRelay::new();
        let interceptor = interceptor();
        let (status, _) = status_recorder();
        relay
            .start_twin(&transport, &interceptor, Arc::clone(&status), None, noop_property(), None)
            .unwrap();

        let result = relay.start_twin(&transport, &interceptor, status, None, noop_property(), None);
        assert!(matches!(result, Err(TransportError::NotOpen)));
    }
}
