//! Channel registry.
//!
//! Maps logical channel names ("led.ch0.brightness", "shutter.enable") to a
//! bound [`Endpoint`] plus the channel's declared type and access. The registry
//! is built once at startup and shared by `Arc`; the set of channels is fixed
//! after construction while values live in the endpoints.
//!
//! All writes go through [`ChannelRegistry::write`], which rejects unknown
//! channels and values that cannot be coerced to the declared type before the
//! endpoint is touched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{Access, ChannelValue, Endpoint, ValueType};
use crate::hardware::epics::{ChannelAccess, LiveEndpoint};
use crate::hardware::mock::SimulatedEndpoint;

struct Channel {
    value_type: ValueType,
    access: Access,
    endpoint: Arc<dyn Endpoint>,
}

/// Set of named channels and their endpoints.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channel_names())
            .finish()
    }
}

impl ChannelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every configured channel bound to a [`SimulatedEndpoint`].
    pub fn simulated(settings: &Settings) -> AppResult<Self> {
        let mut registry = Self::new();
        for spec in &settings.hardware.channels {
            let endpoint =
                SimulatedEndpoint::new(spec.value_type).labeled(settings.hardware.pv_name(spec));
            registry.register_with_access(&spec.name, Arc::new(endpoint), spec.value_type, spec.access)?;
        }
        tracing::info!(channels = registry.len(), "Simulated channel registry ready");
        Ok(registry)
    }

    /// Registry with every configured channel bound to a live PV through `client`.
    pub fn live(settings: &Settings, client: Arc<dyn ChannelAccess>) -> AppResult<Self> {
        let mut registry = Self::new();
        for spec in &settings.hardware.channels {
            let endpoint =
                LiveEndpoint::new(settings.hardware.pv_name(spec), spec.value_type, client.clone());
            registry.register_with_access(&spec.name, Arc::new(endpoint), spec.value_type, spec.access)?;
        }
        tracing::info!(
            channels = registry.len(),
            pv_prefix = %settings.hardware.pv_prefix,
            "Live channel registry ready"
        );
        Ok(registry)
    }

    /// Add a read/write channel.
    pub fn register(
        &mut self,
        name: &str,
        endpoint: Arc<dyn Endpoint>,
        value_type: ValueType,
    ) -> AppResult<()> {
        self.register_with_access(name, endpoint, value_type, Access::ReadWrite)
    }

    /// Add a channel with explicit access. Fails with `DuplicateChannel` if the name exists.
    pub fn register_with_access(
        &mut self,
        name: &str,
        endpoint: Arc<dyn Endpoint>,
        value_type: ValueType,
        access: Access,
    ) -> AppResult<()> {
        if self.channels.contains_key(name) {
            return Err(DaqError::DuplicateChannel(name.to_string()));
        }
        tracing::debug!(channel = name, endpoint = %endpoint.describe(), %value_type, "Registering channel");
        self.channels.insert(
            name.to_string(),
            Channel {
                value_type,
                access,
                endpoint,
            },
        );
        Ok(())
    }

    /// Coerce `value` to the channel's type and write it.
    ///
    /// Returns the value actually written.
    pub async fn write(&self, name: &str, value: ChannelValue) -> AppResult<ChannelValue> {
        let channel = self.channel(name)?;
        if !channel.access.writable() {
            return Err(DaqError::ChannelAccessDenied {
                channel: name.to_string(),
                operation: "write",
            });
        }
        let coerced = channel
            .value_type
            .coerce(value)
            .ok_or_else(|| DaqError::TypeMismatch {
                channel: name.to_string(),
                expected: channel.value_type,
                value,
            })?;

        tracing::debug!(channel = name, value = %coerced, "write");
        channel
            .endpoint
            .write(coerced)
            .await
            .map_err(|e| DaqError::endpoint(name, format!("{e:#}")))?;
        Ok(coerced)
    }

    /// Read a channel and coerce the reading to its declared type.
    pub async fn read(&self, name: &str) -> AppResult<ChannelValue> {
        let channel = self.channel(name)?;
        if !channel.access.readable() {
            return Err(DaqError::ChannelAccessDenied {
                channel: name.to_string(),
                operation: "read",
            });
        }
        let raw = channel
            .endpoint
            .read()
            .await
            .map_err(|e| DaqError::endpoint(name, format!("{e:#}")))?;
        channel
            .value_type
            .coerce(raw)
            .ok_or_else(|| DaqError::TypeMismatch {
                channel: name.to_string(),
                expected: channel.value_type,
                value: raw,
            })
    }

    /// Read every readable channel. Channels whose read fails are omitted.
    pub async fn snapshot(&self) -> BTreeMap<String, ChannelValue> {
        let mut values = BTreeMap::new();
        for name in self.channel_names() {
            match self.read(&name).await {
                Ok(value) => {
                    values.insert(name, value);
                }
                Err(DaqError::ChannelAccessDenied { .. }) => {}
                Err(e) => tracing::warn!(channel = %name, error = %e, "Snapshot read failed"),
            }
        }
        values
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Declared type of a channel.
    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.channels.get(name).map(|c| c.value_type)
    }

    /// Access of a channel.
    pub fn access(&self, name: &str) -> Option<Access> {
        self.channels.get(name).map(|c| c.access)
    }

    /// Endpoint description for a channel.
    pub fn describe(&self, name: &str) -> Option<String> {
        self.channels.get(name).map(|c| c.endpoint.describe())
    }

    /// Channel names in sorted order.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True if no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn channel(&self, name: &str) -> AppResult<&Channel> {
        self.channels
            .get(name)
            .ok_or_else(|| DaqError::UnknownChannel(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::channels::{LED_BRIGHTNESS, SHUTTER_ENABLE};

    fn registry_with_led() -> (ChannelRegistry, SimulatedEndpoint) {
        let led = SimulatedEndpoint::new(ValueType::Float);
        let mut registry = ChannelRegistry::new();
        registry
            .register(LED_BRIGHTNESS, Arc::new(led.clone()), ValueType::Float)
            .unwrap();
        (registry, led)
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let (mut registry, _) = registry_with_led();
        let err = registry
            .register(
                LED_BRIGHTNESS,
                Arc::new(SimulatedEndpoint::new(ValueType::Float)),
                ValueType::Float,
            )
            .unwrap_err();
        assert!(matches!(err, DaqError::DuplicateChannel(name) if name == LED_BRIGHTNESS));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_write_coerces_to_declared_type() {
        let (registry, led) = registry_with_led();
        let written = registry
            .write(LED_BRIGHTNESS, ChannelValue::Integer(128))
            .await
            .unwrap();
        assert_eq!(written, ChannelValue::Float(128.0));
        assert_eq!(led.value(), ChannelValue::Float(128.0));
    }

    #[tokio::test]
    async fn test_unknown_channel_does_not_mutate() {
        let (registry, led) = registry_with_led();
        let err = registry
            .write("led.ch7.brightness", ChannelValue::Float(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::UnknownChannel(_)));
        assert!(!registry.contains("led.ch7.brightness"));
        assert_eq!(registry.len(), 1);
        assert!(led.history().is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_rejected_before_endpoint() {
        let shutter = SimulatedEndpoint::new(ValueType::Boolean);
        let mut registry = ChannelRegistry::new();
        registry
            .register(SHUTTER_ENABLE, Arc::new(shutter.clone()), ValueType::Boolean)
            .unwrap();

        let err = registry
            .write(SHUTTER_ENABLE, ChannelValue::Integer(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::TypeMismatch { .. }));
        assert!(shutter.history().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_failure_is_wrapped() {
        let (registry, led) = registry_with_led();
        led.fail_writes_with("IOC offline");
        let err = registry
            .write(LED_BRIGHTNESS, ChannelValue::Float(5.0))
            .await
            .unwrap_err();
        match err {
            DaqError::Endpoint { channel, message } => {
                assert_eq!(channel, LED_BRIGHTNESS);
                assert_eq!(message, "IOC offline");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_access_enforced() {
        let mut registry = ChannelRegistry::new();
        registry
            .register_with_access(
                "led.info",
                Arc::new(SimulatedEndpoint::new(ValueType::Integer)),
                ValueType::Integer,
                Access::ReadOnly,
            )
            .unwrap();

        assert!(registry.read("led.info").await.is_ok());
        let err = registry
            .write("led.info", ChannelValue::Integer(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::ChannelAccessDenied { operation: "write", .. }));
    }

    #[tokio::test]
    async fn test_simulated_registry_from_settings() {
        let registry = ChannelRegistry::simulated(&Settings::default()).unwrap();
        assert_eq!(registry.len(), 16);
        assert_eq!(registry.value_type(SHUTTER_ENABLE), Some(ValueType::Boolean));
        assert_eq!(
            registry.describe(LED_BRIGHTNESS).as_deref(),
            Some("simulated:LEDS:CH0:brig")
        );

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.get(SHUTTER_ENABLE), Some(&ChannelValue::Boolean(false)));
        assert_eq!(snapshot.len(), 16);
    }
}
