//! Core library for sidekick-daq.
//!
//! Drives the Sidekick LED/shutter rig with sequenced channel writes: a
//! channel registry bound to live or simulated endpoints, action plans built
//! from templates or CSV tables, and a run engine that executes them in strict
//! order and always restores the declared rest state.

pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod metadata;
