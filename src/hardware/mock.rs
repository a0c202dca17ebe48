//! Simulated Endpoints
//!
//! Provides an in-memory endpoint so plans can run without the rig connected.
//! A simulated endpoint never blocks: writes land in local memory and reads
//! return the last written value.
//!
//! # Fault injection
//!
//! Tests that exercise the abort path can make an endpoint fail:
//!
//! ```rust,ignore
//! let shutter = SimulatedEndpoint::new(ValueType::Boolean);
//! shutter.fail_after(1);            // first write succeeds, the rest fail
//! shutter.fail_writes_with("IOC offline");
//! shutter.fail_reads_with("caget timed out");
//! ```

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::hardware::capabilities::{ChannelValue, Endpoint, ValueType};

#[derive(Debug, Default)]
struct Faults {
    message: Option<String>,
    /// Successful writes allowed before faults apply.
    allowed_writes: Option<usize>,
    read_message: Option<String>,
}

#[derive(Debug)]
struct SimState {
    value: ChannelValue,
    history: Vec<ChannelValue>,
    faults: Faults,
}

/// In-memory endpoint that stores the last written value.
///
/// Cloning shares the underlying state, so a test can keep a handle to an
/// endpoint after handing it to the registry.
#[derive(Debug, Clone)]
pub struct SimulatedEndpoint {
    label: String,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedEndpoint {
    /// New endpoint holding the zero value of `value_type`.
    pub fn new(value_type: ValueType) -> Self {
        Self::with_initial(ChannelValue::zero(value_type))
    }

    /// New endpoint holding `value`.
    pub fn with_initial(value: ChannelValue) -> Self {
        Self {
            label: "simulated".to_string(),
            state: Arc::new(RwLock::new(SimState {
                value,
                history: Vec::new(),
                faults: Faults::default(),
            })),
        }
    }

    /// Attach a label shown by `describe()` (e.g. the PV name it stands in for).
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = format!("simulated:{}", label.into());
        self
    }

    /// Current value without going through the async trait.
    pub fn value(&self) -> ChannelValue {
        self.state.read().map(|s| s.value).unwrap_or_else(|p| p.into_inner().value)
    }

    /// Every value written so far, oldest first.
    pub fn history(&self) -> Vec<ChannelValue> {
        match self.state.read() {
            Ok(s) => s.history.clone(),
            Err(p) => p.into_inner().history.clone(),
        }
    }

    /// Make every subsequent write fail with `message`.
    pub fn fail_writes_with(&self, message: impl Into<String>) {
        self.with_state(|s| s.faults.message = Some(message.into()));
    }

    /// Make every subsequent read fail with `message`. Writes are unaffected.
    pub fn fail_reads_with(&self, message: impl Into<String>) {
        self.with_state(|s| s.faults.read_message = Some(message.into()));
    }

    /// Let `n` more writes succeed, then fail the rest.
    pub fn fail_after(&self, n: usize) {
        self.with_state(|s| {
            s.faults.allowed_writes = Some(n);
            if s.faults.message.is_none() {
                s.faults.message = Some("simulated write fault".to_string());
            }
        });
    }

    /// Clear any injected faults.
    pub fn heal(&self) {
        self.with_state(|s| s.faults = Faults::default());
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl Endpoint for SimulatedEndpoint {
    async fn read(&self) -> Result<ChannelValue> {
        self.with_state(|s| match &s.faults.read_message {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(s.value),
        })
    }

    async fn write(&self, value: ChannelValue) -> Result<()> {
        self.with_state(|s| {
            if let Some(message) = &s.faults.message {
                match s.faults.allowed_writes.as_mut() {
                    Some(0) | None => return Err(anyhow!("{message}")),
                    Some(n) => *n -= 1,
                }
            }
            s.value = value;
            s.history.push(value);
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_write_then_read() {
        let led = SimulatedEndpoint::new(ValueType::Float);
        assert_eq!(led.read().await.unwrap(), ChannelValue::Float(0.0));

        led.write(ChannelValue::Float(128.0)).await.unwrap();
        assert_eq!(led.read().await.unwrap(), ChannelValue::Float(128.0));
        assert_eq!(led.history(), vec![ChannelValue::Float(128.0)]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let shutter = SimulatedEndpoint::new(ValueType::Boolean);
        let handle = shutter.clone();

        shutter.write(ChannelValue::Boolean(true)).await.unwrap();
        assert_eq!(handle.value(), ChannelValue::Boolean(true));
    }

    #[tokio::test]
    async fn test_fail_after() {
        let led = SimulatedEndpoint::new(ValueType::Float);
        led.fail_after(1);

        led.write(ChannelValue::Float(1.0)).await.unwrap();
        let err = led.write(ChannelValue::Float(2.0)).await.unwrap_err();
        assert!(err.to_string().contains("simulated write fault"));
        // Failed write leaves the last good value in place
        assert_eq!(led.value(), ChannelValue::Float(1.0));

        led.heal();
        led.write(ChannelValue::Float(3.0)).await.unwrap();
        assert_eq!(led.value(), ChannelValue::Float(3.0));
    }

    #[tokio::test]
    async fn test_fail_reads_leaves_writes_working() {
        let led = SimulatedEndpoint::new(ValueType::Float);
        led.fail_reads_with("caget timed out");

        led.write(ChannelValue::Float(7.0)).await.unwrap();
        let err = led.read().await.unwrap_err();
        assert_eq!(err.to_string(), "caget timed out");
        assert_eq!(led.value(), ChannelValue::Float(7.0));

        led.heal();
        assert_eq!(led.read().await.unwrap(), ChannelValue::Float(7.0));
    }

    #[tokio::test]
    async fn test_fail_writes_with_message() {
        let led = SimulatedEndpoint::new(ValueType::Float).labeled("LEDS:CH0:brig");
        led.fail_writes_with("IOC offline");

        let err = led.write(ChannelValue::Float(1.0)).await.unwrap_err();
        assert_eq!(err.to_string(), "IOC offline");
        assert_eq!(led.describe(), "simulated:LEDS:CH0:brig");
    }
}
