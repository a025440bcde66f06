//! Fleet tracker device simulator
//!
//! Simulates a cellular asset tracker talking to a cloud MQTT bridge:
//! one-time activation against the fleet server, JWT-authenticated TLS
//! connections, a config subscription, and a publish duty cycle that
//! suspends the radio between transmissions.
//!
//! # Overview
//!
//! - [`activation`] - one-time device registration against the fleet server
//! - [`auth`] - short-lived JWT connection credentials
//! - [`transport`] - managed MQTT session with suspend/resume
//! - [`listener`] - inbound configuration handling
//! - [`scheduler`] - the publish duty cycle
//!
//! # Quick Start
//!
//! ```no_run
//! use trackersim::auth::{CredentialIssuer, SigningAlgorithm};
//!
//! let issuer = CredentialIssuer::new(
//!     "my-project",
//!     "./rsa_private.pem",
//!     SigningAlgorithm::Rs256,
//!     60,
//! );
//! let credential = issuer.issue().unwrap();
//! assert!(!credential.token.is_empty());
//! ```

pub mod activation;
pub mod auth;
pub mod config;
pub mod error;
pub mod listener;
pub mod observability;
pub mod scheduler;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use activation::DeviceIdentity;
pub use auth::{Credential, CredentialIssuer, SigningAlgorithm};
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use listener::{ConfigListener, ConfigUpdate};
pub use scheduler::PublishScheduler;
pub use telemetry::{PositionRecord, SimulatedPositions, TelemetrySource};
pub use transport::mqtt::{ConnectionState, DeviceClient};
pub use transport::Transport;
