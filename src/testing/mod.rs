//! Testing utilities and mock implementations
//!
//! Mock transport for exercising the publish scheduler without an MQTT
//! broker.

pub mod mocks;

pub use mocks::*;
