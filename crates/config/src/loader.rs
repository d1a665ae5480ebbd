use std::path::Path;

use anyhow::Context;

use crate::{Config, StorageConfig};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse configuration in {}", path.display()))?;

    config.validate()?;

    log::debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

/// Settings that are valid but probably not what the operator wants.
pub(crate) fn warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    let StorageConfig::Redis(redis) = &config.rate_limits.storage else {
        warnings.push(
            "Rate limit buckets are stored in memory and are not shared between processes. \
             Configure rate_limits.storage with type = \"redis\" to share them."
                .to_string(),
        );

        return warnings;
    };

    if redis.response_timeout.is_none() {
        warnings.push("rate_limits.storage.response_timeout is unset, evaluations may block indefinitely".to_string());
    }

    if redis.pool.timeout_wait.is_none() {
        warnings.push(
            "rate_limits.storage.pool.timeout_wait is unset, callers wait forever when the pool is exhausted"
                .to_string(),
        );
    }

    warnings
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_config() {
        let file = write_config(indoc! {r#"
            [rate_limits]
            expiry_multiplier = 3
            reservation = "queued"

            [rate_limits.storage]
            type = "redis"
            url = "redis://localhost:6379/2"

            [telemetry]
            service_name = "turnstile-test"
        "#});

        let config = load(file.path()).unwrap();

        assert_eq!(config.rate_limits.expiry_multiplier, 3);
        assert_eq!(config.telemetry.service_name(), "turnstile-test");
        assert!(warnings(&config).is_empty());
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let file = write_config(indoc! {r#"
            [rate_limits]
            burst = 10
        "#});

        assert!(load(file.path()).is_err());
    }

    #[test]
    fn load_rejects_invalid_multiplier() {
        let file = write_config(indoc! {r#"
            [rate_limits]
            expiry_multiplier = 10
        "#});

        let error = load(file.path()).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"rate_limits.expiry_multiplier must be between 2 and 5, got 10");
    }

    #[test]
    fn missing_file() {
        let error = load("/definitely/not/here/turnstile.toml").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"failed to read configuration from /definitely/not/here/turnstile.toml");
    }

    #[test]
    fn loaded_config_reports_its_warnings() {
        let file = write_config(indoc! {r#"
            [rate_limits.storage]
            type = "redis"
            url = "redis://localhost:6379/0"

            [rate_limits.storage.pool]
            max_size = 4
        "#});

        let mut config = load(file.path()).unwrap();
        assert!(config.warnings().is_empty());

        let crate::StorageConfig::Redis(redis) = &mut config.rate_limits.storage else {
            unreachable!("expected redis storage");
        };

        redis.response_timeout = None;

        insta::assert_debug_snapshot!(config.warnings(), @r#"
        [
            "rate_limits.storage.response_timeout is unset, evaluations may block indefinitely",
        ]
        "#);
    }

    #[test]
    fn memory_storage_warns() {
        let config = Config::default();

        insta::assert_debug_snapshot!(warnings(&config), @r#"
        [
            "Rate limit buckets are stored in memory and are not shared between processes. Configure rate_limits.storage with type = \"redis\" to share them.",
        ]
        "#);
    }
}
