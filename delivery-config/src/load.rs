use std::io;
use std::path::{Path, PathBuf};

use config::{ConfigError, File, Source};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::{Environment, EnvironmentError};
use crate::shared::ValidationError;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// File extensions tried, in order, for each configuration layer.
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Prefix of environment variables overriding file values, e.g. `APP_TOPIC`.
const ENV_PREFIX: &str = "APP";

/// Separator of nested keys in override variables, e.g. `APP_CONSUMER__MAX_RECORDS`.
const ENV_NESTING_SEPARATOR: &str = "__";

/// A configuration root that can be loaded with [`load_config`].
pub trait Config: DeserializeOwned {
    /// Checks the values after all layers were merged.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Failure to produce a validated configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("configuration directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),

    /// No file with a supported extension exists for a layer.
    #[error("no `{stem}` configuration file in `{}` (tried {})", directory.display(), EXTENSIONS.join(", "))]
    MissingFile { stem: String, directory: PathBuf },

    /// A layer file exists but cannot be parsed.
    #[error("failed to parse `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// The merged layers do not match the configuration type.
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T: Config>() -> Result<T, LoadConfigError> {
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);

    load_config_from(&directory, Environment::load()?)
}

/// Loads `T` from `directory` and validates it.
///
/// Layers, from lowest to highest precedence: `base.<ext>`, `<environment>.<ext>` and `APP_`
/// prefixed environment variables with `__` between nested keys.
pub fn load_config_from<T: Config>(
    directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError> {
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let mut builder = config::Config::builder();
    for stem in ["base", environment.as_str()] {
        let path = layer_file(directory, stem)?;

        // Parse each file on its own so a syntax error names the offending file.
        File::from(path.as_path())
            .collect()
            .map_err(|source| LoadConfigError::Parse {
                path: path.clone(),
                source,
            })?;

        builder = builder.add_source(File::from(path));
    }

    let config: T = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_NESTING_SEPARATOR),
        )
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(LoadConfigError::Deserialize)?;

    config.validate()?;

    Ok(config)
}

/// Returns the first existing `<stem>.<ext>` file in `directory`.
fn layer_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::MissingFile {
            stem: stem.to_owned(),
            directory: directory.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde::Deserialize;

    use super::*;
    use crate::shared::ConsumerConfig;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        topic: String,
        #[serde(default)]
        consumer: ConsumerConfig,
    }

    impl Config for TestConfig {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.topic.is_empty() {
                return Err(ValidationError::EmptyTopic);
            }
            self.consumer.validate()
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "delivery-config-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = scratch_dir("overrides");
        fs::write(
            dir.join("base.yaml"),
            "topic: orders\nconsumer:\n  max_records: 10\n",
        )
        .unwrap();
        fs::write(dir.join("dev.yml"), "consumer:\n  max_records: 25\n").unwrap();

        let config: TestConfig = load_config_from(&dir, Environment::Dev).unwrap();

        assert_eq!(config.topic, "orders");
        assert_eq!(config.consumer.max_records, 25);
        assert_eq!(
            config.consumer.idle_poll_interval_ms,
            ConsumerConfig::DEFAULT_IDLE_POLL_INTERVAL_MS
        );
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let dir = scratch_dir("missing");
        fs::write(dir.join("base.json"), r#"{ "topic": "orders" }"#).unwrap();

        let err = load_config_from::<TestConfig>(&dir, Environment::Prod).unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingFile { stem, .. } if stem == "prod"));
    }

    #[test]
    fn unparsable_file_is_named() {
        let dir = scratch_dir("unparsable");
        fs::write(dir.join("base.json"), "{ not json").unwrap();
        fs::write(dir.join("dev.json"), "{}").unwrap();

        let err = load_config_from::<TestConfig>(&dir, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::Parse { path, .. } if path.ends_with("base.json")));
    }

    #[test]
    fn invalid_values_are_rejected_after_merge() {
        let dir = scratch_dir("invalid");
        fs::write(dir.join("base.yaml"), "topic: orders\n").unwrap();
        fs::write(dir.join("dev.yaml"), "topic: \"\"\n").unwrap();

        let err = load_config_from::<TestConfig>(&dir, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::Invalid(ValidationError::EmptyTopic)));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = std::env::temp_dir().join("delivery-config-does-not-exist");

        let err = load_config_from::<TestConfig>(&dir, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingDirectory(_)));
    }
}
