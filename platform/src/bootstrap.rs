//! The composition root.
//!
//! [`Platform::initialize`] constructs the platform's long-lived shared
//! resources in a fixed dependency order and publishes them through the
//! resource registry. Later steps dereference what earlier steps
//! registered, so the order is load-bearing:
//!
//! 1. time source;
//! 2. database access configuration, transaction policy, notification sink;
//! 3. the parsed configuration objects themselves;
//! 4. primary and authorization pools (two factory calls - never a shared
//!    handle) published through the bridge, then second-phase wiring;
//! 5. lifecycle hook infrastructure;
//! 6. the two event buses;
//! 7. the notification queue;
//! 8. the extension host with its dedicated pool;
//! 9. the naming service, eagerly.
//!
//! Initialization is single-threaded and strictly sequential. Any step
//! failure aborts the whole attempt: pools opened so far are released in
//! reverse order and a [`BootstrapError`] naming the failing step is
//! returned. There is no partial bring-up and no re-entry into this path.

use crate::installers::{
    install_buses, install_extension_host, install_naming_service, install_notification_queue,
};
use crate::lifecycle::LifecycleCoordinator;
use crate::registry::{RegistryHandle, ServiceRegistry, names};
use std::sync::Arc;
use tally_core::clock::TimeSource;
use tally_core::config::PlatformConfig;
use tally_core::error::{BootstrapError, PlatformError};
use tally_database::bridge::{MetricsObserver, PublishedDataSource};
use tally_database::pool::{ConnectionPool, PgPoolFactory, PoolFactory, PoolRole, PoolSettings};
use tally_database::transaction::{NotificationSink, RetryLimit, TransactionPolicy};

/// Attach a step name to a failed result.
fn step<T, E: Into<PlatformError>>(
    name: &'static str,
    result: Result<T, E>,
) -> Result<T, (&'static str, PlatformError)> {
    result.map_err(|e| (name, e.into()))
}

/// The initialized platform: the frozen registry plus the lifecycle
/// coordinator that tears it down.
///
/// Owned by the process entry point and passed by reference to every
/// consumer; there is no ambient global registry, so tests construct
/// independent platforms in isolation.
pub struct Platform {
    registry: RegistryHandle,
    lifecycle: Arc<LifecycleCoordinator>,
}

impl Platform {
    /// Initialize against real Postgres pools.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] naming the failing step; pools opened
    /// during the attempt are released before this returns.
    pub async fn initialize(config: PlatformConfig) -> Result<Self, BootstrapError> {
        Self::initialize_with_factory(config, Arc::new(PgPoolFactory)).await
    }

    /// [`initialize`](Self::initialize) with an explicit pool factory.
    ///
    /// This is the seam tests use to substitute a recording factory; the
    /// step sequence is identical.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] naming the failing step; pools opened
    /// during the attempt are released before this returns.
    pub async fn initialize_with_factory(
        config: PlatformConfig,
        factory: Arc<dyn PoolFactory>,
    ) -> Result<Self, BootstrapError> {
        tracing::info!("bootstrapping platform");
        let drain_timeout = config.server.drain_timeout();
        let mut opened: Vec<Arc<dyn ConnectionPool>> = Vec::new();

        match Self::run_steps(config, &factory, &mut opened).await {
            Ok(platform) => {
                tracing::info!(
                    resources = platform.registry.names().len(),
                    "platform ready"
                );
                Ok(platform)
            }
            Err((failed_step, source)) => {
                tracing::error!(
                    step = failed_step,
                    error = %source,
                    pools_to_release = opened.len(),
                    "bootstrap failed; releasing pools from this attempt"
                );
                for pool in opened.iter().rev() {
                    if let Err(e) = pool.close(drain_timeout).await {
                        tracing::error!(error = %e, "pool release failed during abort");
                    }
                }
                Err(BootstrapError {
                    step: failed_step,
                    source,
                })
            }
        }
    }

    async fn run_steps(
        config: PlatformConfig,
        factory: &Arc<dyn PoolFactory>,
        opened: &mut Vec<Arc<dyn ConnectionPool>>,
    ) -> Result<Self, (&'static str, PlatformError)> {
        let mut registry = ServiceRegistry::new();

        // 1. time source
        let clock = Arc::new(TimeSource::select(config.server.test_mode));
        step(
            "time source",
            registry.register(names::CLOCK, Arc::clone(&clock)),
        )?;
        tracing::info!(test_mode = config.server.test_mode, "time source selected");

        // 2. database access configuration and the transaction policy
        // chain. Validation runs before any pool is opened.
        step(
            "database configuration",
            config.database.validate_at("database"),
        )?;
        let settings = Arc::new(PoolSettings::from_config(&config.database));
        let sink = NotificationSink::default();
        let policy = Arc::new(TransactionPolicy::new(sink.clone(), RetryLimit::default()));
        step(
            "database configuration",
            registry.register(names::DATABASE_SETTINGS, Arc::clone(&settings)),
        )?;
        step(
            "database configuration",
            registry.register(names::NOTIFICATION_SINK, Arc::new(sink)),
        )?;
        step(
            "database configuration",
            registry.register(names::TRANSACTION_POLICY, Arc::clone(&policy)),
        )?;

        // 3. the configuration objects themselves
        let config = Arc::new(config);
        step(
            "configuration publication",
            registry.register(names::PLATFORM_CONFIG, Arc::clone(&config)),
        )?;

        // 4. primary and authorization pools. Same settings, separate
        // factory calls: the pools must be distinct objects so their
        // shutdown sequences stay independent.
        let main_pool = step(
            "primary pool",
            factory.create_pool(&settings, PoolRole::Primary).await,
        )?;
        opened.push(Arc::clone(&main_pool));
        let auth_pool = step(
            "authorization pool",
            factory.create_pool(&settings, PoolRole::Auth).await,
        )?;
        opened.push(Arc::clone(&auth_pool));

        let main_source = Arc::new(PublishedDataSource::publish(
            &settings,
            Arc::clone(&main_pool),
            names::MAIN_DATA_SOURCE,
        ));
        let auth_source = Arc::new(PublishedDataSource::publish(
            &settings,
            Arc::clone(&auth_pool),
            names::AUTH_DATA_SOURCE,
        ));
        step(
            "data source publication",
            registry.register(names::MAIN_DATA_SOURCE, Arc::clone(&main_source)),
        )?;
        step(
            "data source publication",
            registry.register(names::AUTH_DATA_SOURCE, Arc::clone(&auth_source)),
        )?;
        // Second-phase wiring: inject instrumentation into the published
        // proxies before anything can resolve them.
        step(
            "data source publication",
            main_source.complete_wiring(Arc::new(MetricsObserver)),
        )?;
        step(
            "data source publication",
            auth_source.complete_wiring(Arc::new(MetricsObserver)),
        )?;

        // 5. lifecycle hooks, in acquisition order
        let lifecycle = Arc::new(LifecycleCoordinator::new(config.server.drain_timeout()));
        let main_hook_pool = Arc::clone(&main_pool);
        lifecycle.register_fn(names::MAIN_DATA_SOURCE, move |drain| {
            let pool = Arc::clone(&main_hook_pool);
            async move { pool.close(drain).await.map_err(|e| e.to_string()) }
        });
        let auth_hook_pool = Arc::clone(&auth_pool);
        lifecycle.register_fn(names::AUTH_DATA_SOURCE, move |drain| {
            let pool = Arc::clone(&auth_hook_pool);
            async move { pool.close(drain).await.map_err(|e| e.to_string()) }
        });
        step(
            "lifecycle",
            registry.register(names::LIFECYCLE, Arc::clone(&lifecycle)),
        )?;

        // 6-9. subsystem installers, each reading what the steps before
        // it registered.
        step("event buses", install_buses(&mut registry, &lifecycle))?;
        step(
            "notification queue",
            install_notification_queue(&mut registry, &lifecycle),
        )?;
        step(
            "extension subsystem",
            install_extension_host(&mut registry, &lifecycle, factory, &config, opened).await,
        )?;
        step(
            "naming service",
            install_naming_service(&mut registry, &config),
        )?;

        Ok(Self {
            registry: registry.freeze(),
            lifecycle,
        })
    }

    /// The frozen registry.
    #[must_use]
    pub const fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// The lifecycle coordinator owning the shutdown sequence.
    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<LifecycleCoordinator> {
        &self.lifecycle
    }

    /// Release every owned resource in reverse acquisition order.
    ///
    /// # Errors
    ///
    /// Returns the collected failure descriptions; forced closures are
    /// reported here, never swallowed.
    pub async fn shutdown(&self) -> Result<(), Vec<String>> {
        tracing::info!("shutting platform down");
        self.lifecycle.shutdown().await
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
