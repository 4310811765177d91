//! Config & mode resolution (component E).
//!
//! Both compatibility level and mode resolve the same way: a subject-level
//! setting wins if present, otherwise the global setting, otherwise a
//! built-in default. Metadata and rule sets resolve per-field rather than as
//! a whole record — a subject can override `default_metadata` while still
//! inheriting the global `default_rule_set`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{CompatibilityLevel, Config, Mode};
use crate::storage::Storage;
use crate::{Error, Result};

/// The effective configuration for a subject after merging subject, global
/// and built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub compatibility_level: CompatibilityLevel,
    pub compatibility_group: Option<String>,
    pub metadata: HashMap<String, String>,
    pub rule_set: Option<serde_json::Value>,
}

/// Resolves compatibility level, mode, metadata and rule sets for a subject
/// against whatever [`Storage`] backend is in use.
pub struct ConfigResolver {
    storage: Arc<dyn Storage>,
}

impl ConfigResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn effective_config(&self, subject: &str) -> Result<EffectiveConfig> {
        let subject_cfg = self.storage.get_config(Some(subject)).await?;
        let global_cfg = self.storage.get_config(None).await?;

        let compatibility_level = subject_cfg
            .as_ref()
            .and_then(|c| c.compatibility_level)
            .or_else(|| global_cfg.as_ref().and_then(|c| c.compatibility_level))
            .unwrap_or_default();

        let compatibility_group = subject_cfg
            .as_ref()
            .and_then(|c| c.compatibility_group.clone())
            .or_else(|| global_cfg.as_ref().and_then(|c| c.compatibility_group.clone()));

        let mut metadata = global_cfg
            .as_ref()
            .and_then(|c| c.default_metadata.clone())
            .unwrap_or_default();
        if let Some(over) = global_cfg.as_ref().and_then(|c| c.override_metadata.clone()) {
            metadata.extend(over);
        }
        if let Some(sub_default) = subject_cfg.as_ref().and_then(|c| c.default_metadata.clone()) {
            metadata.extend(sub_default);
        }
        if let Some(sub_override) = subject_cfg.as_ref().and_then(|c| c.override_metadata.clone()) {
            metadata.extend(sub_override);
        }

        let rule_set = subject_cfg
            .as_ref()
            .and_then(|c| c.override_rule_set.clone())
            .or_else(|| subject_cfg.as_ref().and_then(|c| c.default_rule_set.clone()))
            .or_else(|| global_cfg.as_ref().and_then(|c| c.override_rule_set.clone()))
            .or_else(|| global_cfg.as_ref().and_then(|c| c.default_rule_set.clone()));

        Ok(EffectiveConfig {
            compatibility_level,
            compatibility_group,
            metadata,
            rule_set,
        })
    }

    pub async fn effective_mode(&self, subject: &str) -> Result<Mode> {
        if let Some(m) = self.storage.get_mode(Some(subject)).await? {
            return Ok(m);
        }
        Ok(self.storage.get_mode(None).await?.unwrap_or_default())
    }

    /// The compatibility level set directly on `subject`, ignoring the global
    /// default — what `GET /config/{subject}` exposes without
    /// `defaultToGlobal`. Errors with `NoSubjectCompat` when nothing is set at
    /// the subject level, even if a global default would apply.
    pub async fn subject_compatibility_level(&self, subject: &str) -> Result<CompatibilityLevel> {
        self.storage
            .get_config(Some(subject))
            .await?
            .and_then(|c| c.compatibility_level)
            .ok_or_else(|| Error::NoSubjectCompat(subject.to_string()))
    }

    /// The mode set directly on `subject`, ignoring the global default.
    /// Errors with `NoSubjectMode` when nothing is set at the subject level.
    pub async fn subject_mode(&self, subject: &str) -> Result<Mode> {
        self.storage
            .get_mode(Some(subject))
            .await?
            .ok_or_else(|| Error::NoSubjectMode(subject.to_string()))
    }

    pub async fn set_subject_config(&self, subject: &str, config: Config) -> Result<()> {
        self.storage.set_config(Some(subject), config).await
    }

    pub async fn set_global_config(&self, config: Config) -> Result<()> {
        self.storage.set_config(None, config).await
    }

    pub async fn delete_subject_config(&self, subject: &str) -> Result<()> {
        self.storage.delete_config(Some(subject)).await
    }

    pub async fn set_subject_mode(&self, subject: &str, mode: Mode) -> Result<()> {
        self.storage.set_mode(Some(subject), mode).await
    }

    pub async fn set_global_mode(&self, mode: Mode) -> Result<()> {
        self.storage.set_mode(None, mode).await
    }

    pub async fn delete_subject_mode(&self, subject: &str) -> Result<()> {
        self.storage.delete_mode(Some(subject)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn subject_compat_overrides_global() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .set_config(
                None,
                Config {
                    compatibility_level: Some(CompatibilityLevel::Full),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        storage
            .set_config(
                Some("events-value"),
                Config {
                    compatibility_level: Some(CompatibilityLevel::None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolver = ConfigResolver::new(storage);
        let effective = resolver.effective_config("events-value").await.unwrap();
        assert_eq!(effective.compatibility_level, CompatibilityLevel::None);

        let other = resolver.effective_config("other-value").await.unwrap();
        assert_eq!(other.compatibility_level, CompatibilityLevel::Full);
    }

    #[tokio::test]
    async fn mode_falls_back_to_global_default() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let resolver = ConfigResolver::new(storage.clone());
        assert_eq!(resolver.effective_mode("s").await.unwrap(), Mode::ReadWrite);
        storage.set_mode(None, Mode::ReadOnly).await.unwrap();
        assert_eq!(resolver.effective_mode("s").await.unwrap(), Mode::ReadOnly);
        storage.set_mode(Some("s"), Mode::Import).await.unwrap();
        assert_eq!(resolver.effective_mode("s").await.unwrap(), Mode::Import);
    }

    #[tokio::test]
    async fn subject_compat_without_a_subject_row_is_an_error() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .set_config(
                None,
                Config {
                    compatibility_level: Some(CompatibilityLevel::Full),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolver = ConfigResolver::new(storage.clone());
        let err = resolver.subject_compatibility_level("events-value").await.unwrap_err();
        assert!(matches!(err, crate::Error::NoSubjectCompat(_)));
        assert_eq!(err.code().0, 40408);

        storage
            .set_config(
                Some("events-value"),
                Config {
                    compatibility_level: Some(CompatibilityLevel::Backward),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            resolver.subject_compatibility_level("events-value").await.unwrap(),
            CompatibilityLevel::Backward
        );
    }

    #[tokio::test]
    async fn subject_mode_without_a_subject_row_is_an_error() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set_mode(None, Mode::ReadOnly).await.unwrap();

        let resolver = ConfigResolver::new(storage.clone());
        let err = resolver.subject_mode("events-value").await.unwrap_err();
        assert!(matches!(err, crate::Error::NoSubjectMode(_)));
        assert_eq!(err.code().0, 40409);

        storage.set_mode(Some("events-value"), Mode::Import).await.unwrap();
        assert_eq!(resolver.subject_mode("events-value").await.unwrap(), Mode::Import);
    }
}
