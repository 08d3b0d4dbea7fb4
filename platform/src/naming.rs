//! Naming service.
//!
//! The eagerly-constructed directory of published resource names,
//! installed as the final bootstrap step so it sees every registration.
//! External integrations resolve platform resources through it instead of
//! holding a registry handle.

use tally_core::config::NamingConfig;
use tally_core::error::WiringError;

/// Directory of published platform resource names.
#[derive(Debug, Clone)]
pub struct NamingService {
    export: bool,
    directory: Vec<String>,
}

impl NamingService {
    /// Snapshot the published names into a directory.
    #[must_use]
    pub fn new(config: &NamingConfig, mut published: Vec<String>) -> Self {
        published.sort();
        tracing::info!(
            entries = published.len(),
            export = config.export,
            "naming service constructed"
        );
        Self {
            export: config.export,
            directory: published,
        }
    }

    /// Check that `name` is published.
    ///
    /// # Errors
    ///
    /// Returns [`WiringError::UnknownName`] for unpublished names.
    pub fn resolve(&self, name: &str) -> Result<(), WiringError> {
        if self.directory.iter().any(|entry| entry == name) {
            Ok(())
        } else {
            Err(WiringError::UnknownName {
                name: name.to_string(),
            })
        }
    }

    /// Every published name, sorted.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.directory
    }

    /// Whether the directory is exported for external lookup.
    #[must_use]
    pub const fn is_exported(&self) -> bool {
        self.export
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_sorted_and_resolvable() {
        let service = NamingService::new(
            &NamingConfig::default(),
            vec!["clock".to_string(), "bus.main".to_string()],
        );

        assert_eq!(service.names(), &["bus.main", "clock"]);
        assert!(service.resolve("clock").is_ok());
        assert!(matches!(
            service.resolve("missing"),
            Err(WiringError::UnknownName { .. })
        ));
    }

    #[test]
    fn export_flag_comes_from_configuration() {
        let service = NamingService::new(&NamingConfig { export: false }, Vec::new());
        assert!(!service.is_exported());
    }
}
