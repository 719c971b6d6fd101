use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Variable selecting the environment-specific configuration layer.
const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Deployment environment, also the stem of its configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported environment `{0}`, expected `dev` or `prod`")]
pub struct EnvironmentError(String);

impl Environment {
    /// Reads [`ENVIRONMENT_VAR`], falling back to [`Environment::Dev`] when it is unset.
    pub fn load() -> Result<Environment, EnvironmentError> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = EnvironmentError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.eq_ignore_ascii_case("dev") {
            Ok(Environment::Dev)
        } else if name.eq_ignore_ascii_case("prod") {
            Ok(Environment::Prod)
        } else {
            Err(EnvironmentError(name.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("Dev".parse::<Environment>(), Ok(Environment::Dev));
        assert_eq!(
            "staging".parse::<Environment>(),
            Err(EnvironmentError("staging".to_owned()))
        );
    }

    #[test]
    fn display_is_the_file_stem() {
        assert_eq!(Environment::Prod.to_string(), "prod");
        assert_eq!(Environment::default().as_str(), "dev");
    }
}
