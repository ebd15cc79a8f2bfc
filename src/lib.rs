//! Voltbridge: an evcc to Domoticz state bridge
//!
//! Connects an evcc charging controller's HTTP/WebSocket API to a
//! home-automation hub's virtual-device registry. Live site, loadpoint,
//! vehicle and battery state is normalized into one canonical shape,
//! merged across partial stream frames, and mirrored onto persistent
//! devices; device commands travel the other way as controller REST
//! writes.
//!
//! The crate is organized around the reconciliation pipeline:
//! [`schema`] normalizes the two wire shapes, [`merge`] folds partial
//! frames into snapshots, [`identity`] maps external ids to stable unit
//! numbers, [`devices`] projects snapshots onto registry updates, and
//! [`bridge`] drives the whole loop under the [`scheduler`]'s policy.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod devices;
pub mod error;
pub mod identity;
pub mod logging;
pub mod merge;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod stream;
pub mod transport;

pub use bridge::{Bridge, HostCommand};
pub use config::Config;
pub use error::{Result, VoltbridgeError};
pub use state::CanonicalState;

/// Application version, set by the build script
pub const VERSION: &str = env!("APP_VERSION");
