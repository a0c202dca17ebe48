//! Hardware abstraction: channel values, endpoints and the channel registry.
//!
//! - [`capabilities`]: `ChannelValue`, `ValueType`, `Access`, the `Endpoint` trait
//! - [`mock`]: in-memory simulated endpoint
//! - [`epics`]: live endpoint over EPICS channel access
//! - [`registry`]: name -> endpoint mapping used by the run engine

pub mod capabilities;
pub mod epics;
pub mod mock;
pub mod registry;

pub use capabilities::{Access, ChannelValue, Endpoint, ValueType};
pub use epics::{CaToolsClient, ChannelAccess, LiveEndpoint};
pub use mock::SimulatedEndpoint;
pub use registry::ChannelRegistry;
