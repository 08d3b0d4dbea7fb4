//! # Tally Core
//!
//! Core types for the tally platform bootstrap: the layered configuration
//! model, the time source abstraction, and the startup error taxonomy.
//!
//! Everything here is a leaf dependency. The composition root in
//! `tally-platform` selects and publishes these objects; consumers retrieve
//! them from the resource registry without knowing how they were built.
//!
//! ## Design principles
//!
//! - Configuration is parsed once, validated before any I/O, and immutable
//!   afterwards.
//! - Time flows through the [`clock::Clock`] trait so test mode can swap in
//!   a caller-driven clock.
//! - Startup errors are fatal and carry the failing step's name; there is
//!   no partial bring-up.

pub mod clock;
pub mod config;
pub mod error;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock, TimeSource};
pub use config::{DatabaseConfig, ExtensionSettings, NamingConfig, PlatformConfig, ServerConfig};
pub use error::{
    BootstrapError, ConfigurationError, ConnectivityError, PlatformError, WiringError,
};
