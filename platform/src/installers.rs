//! Subsystem installers.
//!
//! Each installer configures and registers one subsystem. The contract is
//! the same for all of them: the resources they need are already in the
//! registry when they run (the composition root guarantees the order),
//! they read but never mutate earlier registrations, they register what
//! later steps consume, and they add a shutdown hook for anything they
//! acquire. Each runs exactly once per process.

use crate::lifecycle::LifecycleCoordinator;
use crate::naming::NamingService;
use crate::registry::{ServiceRegistry, names};
use std::sync::Arc;
use tally_core::clock::{Clock, TimeSource};
use tally_core::config::PlatformConfig;
use tally_core::error::PlatformError;
use tally_database::bridge::PublishedDataSource;
use tally_database::pool::{ConnectionPool, PoolFactory, PoolRole, PoolSettings};
use tally_database::transaction::TransactionPolicy;
use tally_events::bus::{EventBus, PlatformBus};
use tally_events::notification::NotificationQueue;
use tally_extensions::ExtensionHost;

/// Install the two event buses: one in-process, one persistent. Same
/// mechanism, different wiring parameter.
///
/// Requires the clock, the primary data source, and the transaction
/// policy to be registered. Registers `bus.main` and `bus.external` and a
/// shutdown hook for each.
///
/// # Errors
///
/// Returns [`PlatformError::Wiring`] when a prerequisite is missing.
pub fn install_buses(
    registry: &mut ServiceRegistry,
    lifecycle: &LifecycleCoordinator,
) -> Result<(), PlatformError> {
    let clock: Arc<TimeSource> = registry.get(names::CLOCK)?;
    let data_source: Arc<PublishedDataSource> = registry.get(names::MAIN_DATA_SOURCE)?;
    let policy: Arc<TransactionPolicy> = registry.get(names::TRANSACTION_POLICY)?;

    let main_bus = Arc::new(PlatformBus::in_process(
        names::MAIN_BUS,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let external_bus = Arc::new(PlatformBus::persistent(
        names::EXTERNAL_BUS,
        clock as Arc<dyn Clock>,
        data_source,
        policy,
    ));

    for bus in [&main_bus, &external_bus] {
        let hook_bus = Arc::clone(bus);
        lifecycle.register_fn(bus.name().to_string(), move |_drain| {
            let bus = Arc::clone(&hook_bus);
            async move {
                bus.shut_down();
                Ok(())
            }
        });
    }

    registry.register(names::MAIN_BUS, main_bus)?;
    registry.register(names::EXTERNAL_BUS, external_bus)?;
    tracing::info!("event buses installed");
    Ok(())
}

/// Install the notification queue over the clock, the primary data
/// source, and the shared transaction policy.
///
/// # Errors
///
/// Returns [`PlatformError::Wiring`] when a prerequisite is missing.
pub fn install_notification_queue(
    registry: &mut ServiceRegistry,
    lifecycle: &LifecycleCoordinator,
) -> Result<(), PlatformError> {
    let clock: Arc<TimeSource> = registry.get(names::CLOCK)?;
    let data_source: Arc<PublishedDataSource> = registry.get(names::MAIN_DATA_SOURCE)?;
    let policy: Arc<TransactionPolicy> = registry.get(names::TRANSACTION_POLICY)?;

    let queue = Arc::new(NotificationQueue::new(
        clock as Arc<dyn Clock>,
        data_source,
        policy,
    ));

    let hook_queue = Arc::clone(&queue);
    lifecycle.register_fn(names::NOTIFICATION_QUEUE, move |_drain| {
        let queue = Arc::clone(&hook_queue);
        async move {
            queue.shut_down();
            Ok(())
        }
    });

    registry.register(names::NOTIFICATION_QUEUE, queue)?;
    tracing::info!("notification queue installed");
    Ok(())
}

/// Install the extension host with its own dedicated pool.
///
/// The pool comes from a dedicated factory call so it is fully isolated
/// from the primary and authorization pools; it is appended to `opened`
/// so a later step's failure still releases it. A disabled subsystem
/// registers an inert host - the name stays resolvable.
///
/// # Errors
///
/// Returns [`PlatformError::Configuration`] for a broken dedicated
/// database section and [`PlatformError::Connectivity`] when the pool
/// cannot be opened.
pub async fn install_extension_host(
    registry: &mut ServiceRegistry,
    lifecycle: &LifecycleCoordinator,
    factory: &Arc<dyn PoolFactory>,
    config: &PlatformConfig,
    opened: &mut Vec<Arc<dyn ConnectionPool>>,
) -> Result<(), PlatformError> {
    let settings = &config.extensions;
    if !settings.enabled {
        tracing::info!("extension subsystem disabled; registering inert host");
        registry.register(names::EXTENSION_HOST, Arc::new(ExtensionHost::disabled()))?;
        return Ok(());
    }

    let database = settings.database_or(&config.database);
    let key_prefix = if settings.database.is_some() {
        "extensions.database"
    } else {
        "database"
    };
    database.validate_at(key_prefix)?;

    let pool = factory
        .create_pool(&PoolSettings::from_config(database), PoolRole::Extension)
        .await?;
    opened.push(Arc::clone(&pool));

    let host = Arc::new(ExtensionHost::new(settings, pool));
    let hook_host = Arc::clone(&host);
    lifecycle.register_fn(names::EXTENSION_HOST, move |drain| {
        let host = Arc::clone(&hook_host);
        async move { host.shut_down(drain).await.map_err(|e| e.to_string()) }
    });

    registry.register(names::EXTENSION_HOST, host)?;
    tracing::info!(bundle_dir = %settings.bundle_dir, "extension host installed");
    Ok(())
}

/// Install the naming service as an eagerly-constructed singleton holding
/// a snapshot of every name published so far.
///
/// # Errors
///
/// Returns [`PlatformError::Wiring`] if the name is already taken.
pub fn install_naming_service(
    registry: &mut ServiceRegistry,
    config: &PlatformConfig,
) -> Result<(), PlatformError> {
    let service = Arc::new(NamingService::new(&config.naming, registry.names()));
    registry.register(names::NAMING_SERVICE, service)?;
    tracing::info!("naming service installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)] // Test code: assertions on fixtures

    use super::*;
    use std::time::Duration;
    use tally_core::error::WiringError;

    #[test]
    fn bus_installer_requires_its_prerequisites() {
        let mut registry = ServiceRegistry::new();
        let lifecycle = LifecycleCoordinator::new(Duration::from_millis(50));

        match install_buses(&mut registry, &lifecycle) {
            Err(PlatformError::Wiring(WiringError::UnknownName { name })) => {
                assert_eq!(name, names::CLOCK);
            }
            other => panic!("expected missing clock, got {other:?}"),
        }
        // Nothing was registered and no hook was added
        assert!(!registry.contains(names::MAIN_BUS));
        assert_eq!(lifecycle.hook_count(), 0);
    }

    #[test]
    fn queue_installer_requires_its_prerequisites() {
        let mut registry = ServiceRegistry::new();
        let lifecycle = LifecycleCoordinator::new(Duration::from_millis(50));
        registry
            .register(names::CLOCK, Arc::new(TimeSource::select(true)))
            .expect("register clock");

        match install_notification_queue(&mut registry, &lifecycle) {
            Err(PlatformError::Wiring(WiringError::UnknownName { name })) => {
                assert_eq!(name, names::MAIN_DATA_SOURCE);
            }
            other => panic!("expected missing data source, got {other:?}"),
        }
    }
}
