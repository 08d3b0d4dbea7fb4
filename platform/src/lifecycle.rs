//! Lifecycle coordination.
//!
//! Bootstrap registers a shutdown hook for every resource it acquires, in
//! acquisition order. [`LifecycleCoordinator::shutdown`] runs the hooks
//! **sequentially in reverse registration order** - later resources
//! depend on earlier ones, so they must go first. Each hook is bounded:
//! the hook receives the configured drain timeout, and the coordinator
//! adds a grace backstop on top so a hook that ignores its bound cannot
//! hang shutdown. Failures and timeouts are collected and reported, never
//! swallowed.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Backstop added over the drain timeout for hooks that ignore it.
const GRACE: Duration = Duration::from_secs(1);

/// A resource that needs ordered release at shutdown.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Resource name for logging and the release log.
    fn name(&self) -> &str;

    /// Release the resource, draining for at most `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure (e.g. a forced pool closure).
    async fn shutdown(&self, drain_timeout: Duration) -> Result<(), String>;
}

type HookFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// [`ShutdownHook`] from a closure, for resources without a dedicated
/// hook type.
pub struct HookFn {
    name: String,
    run: Arc<dyn Fn(Duration) -> HookFuture + Send + Sync>,
}

impl HookFn {
    /// Wrap an async closure as a named hook.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |drain| Box::pin(f(drain))),
        }
    }
}

#[async_trait]
impl ShutdownHook for HookFn {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self, drain_timeout: Duration) -> Result<(), String> {
        (self.run)(drain_timeout).await
    }
}

/// Ordered startup/shutdown callbacks for the platform's owned resources.
pub struct LifecycleCoordinator {
    hooks: Mutex<Vec<Arc<dyn ShutdownHook>>>,
    drain_timeout: Duration,
    released: Mutex<Vec<String>>,
    completed: AtomicBool,
}

impl LifecycleCoordinator {
    /// Create a coordinator with the per-resource drain bound.
    #[must_use]
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            drain_timeout,
            released: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
        }
    }

    /// Register a hook. Call in acquisition order; release runs in the
    /// reverse.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub fn register(&self, hook: Arc<dyn ShutdownHook>) {
        info!(resource = hook.name(), "shutdown hook registered");
        self.hooks
            .lock()
            .expect("lifecycle lock poisoned - indicates a panic in another thread")
            .push(hook);
    }

    /// Register an async closure as a hook.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.register(Arc::new(HookFn::new(name, f)));
    }

    /// Number of registered hooks.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks
            .lock()
            .expect("lifecycle lock poisoned - indicates a panic in another thread")
            .len()
    }

    /// Release every resource, newest first.
    ///
    /// Runs at most once; subsequent calls are no-ops. Each hook gets the
    /// drain timeout plus a grace backstop; a hook that exceeds both is
    /// abandoned and reported.
    ///
    /// # Errors
    ///
    /// Returns the collected failure descriptions, one per hook that
    /// failed or timed out.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub async fn shutdown(&self) -> Result<(), Vec<String>> {
        if self.completed.swap(true, Ordering::SeqCst) {
            warn!("shutdown already performed; ignoring repeat call");
            return Ok(());
        }

        let hooks: Vec<Arc<dyn ShutdownHook>> = self
            .hooks
            .lock()
            .expect("lifecycle lock poisoned - indicates a panic in another thread")
            .clone();
        info!(
            resources = hooks.len(),
            drain_timeout_ms = self.drain_timeout.as_millis(),
            "releasing resources in reverse acquisition order"
        );

        let mut errors = Vec::new();
        for hook in hooks.iter().rev() {
            let name = hook.name();
            info!(resource = name, "releasing");

            let bounded = tokio::time::timeout(
                self.drain_timeout.saturating_add(GRACE),
                hook.shutdown(self.drain_timeout),
            );
            match bounded.await {
                Ok(Ok(())) => info!(resource = name, "released"),
                Ok(Err(reason)) => {
                    error!(resource = name, %reason, "release failed");
                    errors.push(format!("{name}: {reason}"));
                }
                Err(_) => {
                    error!(resource = name, "release exceeded drain bound; abandoned");
                    errors.push(format!(
                        "{name}: exceeded drain bound of {:?}",
                        self.drain_timeout
                    ));
                }
            }

            self.released
                .lock()
                .expect("lifecycle lock poisoned - indicates a panic in another thread")
                .push(name.to_string());
        }

        if errors.is_empty() {
            info!("all resources released");
            Ok(())
        } else {
            error!(failures = errors.len(), "shutdown completed with failures");
            Err(errors)
        }
    }

    /// Hook names in the order they were released.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn release_order(&self) -> Vec<String> {
        self.released
            .lock()
            .expect("lifecycle lock poisoned - indicates a panic in another thread")
            .clone()
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("hooks", &self.hook_count())
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

/// Wait for SIGTERM or Ctrl+C.
///
/// # Errors
///
/// Returns the I/O error from registering the signal handler.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
