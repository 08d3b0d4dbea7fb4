//! # Tally Platform
//!
//! The process bootstrap and shared-resource composition subsystem. This
//! crate assembles, in a fixed dependency order, the long-lived
//! infrastructure every other subsystem depends on - time source, pooled
//! database connections, transaction policy, event buses, notification
//! queue, extension host - and publishes them through a shared registry.
//!
//! It implements no transaction logic, no bus, no scheduler, and no
//! pooling: it only orders the construction of those pieces and hands out
//! references.
//!
//! ## Usage
//!
//! ```ignore
//! use tally_core::config::PlatformConfig;
//! use tally_platform::{Platform, names};
//!
//! let config = PlatformConfig::load(None)?;
//! let platform = Platform::initialize(config).await?;
//!
//! let clock: Arc<TimeSource> = platform.registry().get(names::CLOCK)?;
//!
//! platform.shutdown().await?;
//! ```

pub mod bootstrap;
pub mod installers;
pub mod lifecycle;
pub mod naming;
pub mod registry;

// Re-export commonly used items
pub use bootstrap::Platform;
pub use lifecycle::{HookFn, LifecycleCoordinator, ShutdownHook, wait_for_signal};
pub use naming::NamingService;
pub use registry::{RegistryHandle, ServiceRegistry, names};
