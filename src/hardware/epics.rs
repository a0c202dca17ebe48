//! Live endpoints backed by EPICS channel access.
//!
//! The channel-access protocol itself is an external collaborator. This module
//! only defines the boundary ([`ChannelAccess`]) and binds registry channels to
//! process variables through it ([`LiveEndpoint`]).
//!
//! [`CaToolsClient`] is the stock client: it shells out to the `caput` and
//! `caget` tools shipped with EPICS base, so no native client library is needed
//! on the control PC.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::hardware::capabilities::{ChannelValue, Endpoint, ValueType};

/// Named process-variable I/O.
///
/// `get` returns the raw textual reading; the endpoint parses it against the
/// channel's declared type.
#[async_trait]
pub trait ChannelAccess: Send + Sync {
    /// Write `value` to the process variable `pv`.
    async fn put(&self, pv: &str, value: &ChannelValue) -> Result<()>;
    /// Read `pv` as text.
    async fn get(&self, pv: &str) -> Result<String>;
}

/// Endpoint that forwards reads and writes to a process variable.
pub struct LiveEndpoint {
    pv: String,
    value_type: ValueType,
    client: Arc<dyn ChannelAccess>,
}

impl LiveEndpoint {
    /// Bind `pv` through `client`; readings are parsed as `value_type`.
    pub fn new(pv: impl Into<String>, value_type: ValueType, client: Arc<dyn ChannelAccess>) -> Self {
        Self {
            pv: pv.into(),
            value_type,
            client,
        }
    }

    /// Full PV name.
    pub fn pv(&self) -> &str {
        &self.pv
    }
}

#[async_trait]
impl Endpoint for LiveEndpoint {
    async fn read(&self) -> Result<ChannelValue> {
        let raw = self.client.get(&self.pv).await?;
        self.value_type
            .parse(&raw)
            .ok_or_else(|| anyhow!("PV {} returned '{}', not a {}", self.pv, raw.trim(), self.value_type))
    }

    async fn write(&self, value: ChannelValue) -> Result<()> {
        self.client.put(&self.pv, &value).await
    }

    fn describe(&self) -> String {
        format!("pv:{}", self.pv)
    }
}

/// [`ChannelAccess`] client built on the EPICS base command-line tools.
#[derive(Debug, Clone)]
pub struct CaToolsClient {
    caput: PathBuf,
    caget: PathBuf,
    timeout: Duration,
}

impl Default for CaToolsClient {
    fn default() -> Self {
        Self {
            caput: PathBuf::from("caput"),
            caget: PathBuf::from("caget"),
            timeout: Duration::from_secs(5),
        }
    }
}

impl CaToolsClient {
    /// Client using the given tool paths and per-call timeout.
    pub fn new(caput: impl Into<PathBuf>, caget: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            caput: caput.into(),
            caget: caget.into(),
            timeout,
        }
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, mut command: Command, pv: &str) -> Result<String> {
        command.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow!("channel access to {} timed out after {:?}", pv, self.timeout))?
            .with_context(|| format!("failed to launch channel access tool for {}", pv))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "channel access to {} failed ({}): {}",
                pv,
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ChannelAccess for CaToolsClient {
    async fn put(&self, pv: &str, value: &ChannelValue) -> Result<()> {
        let mut command = Command::new(&self.caput);
        command.arg("-t").arg(pv).arg(value.to_wire());
        tracing::trace!(pv, value = %value, "caput");
        self.run(command, pv).await.map(|_| ())
    }

    async fn get(&self, pv: &str) -> Result<String> {
        let mut command = Command::new(&self.caget);
        command.arg("-t").arg(pv);
        let reading = self.run(command, pv).await?;
        tracing::trace!(pv, reading = reading.trim(), "caget");
        Ok(reading)
    }
}
