//! Layered load: defaults < config file(s) < environment. Grounded on the
//! teacher's `ConfigurationManagerBuilder` source-list-then-merge shape,
//! built on the `config` crate instead of hand-rolled merging since OPAL's
//! config is static per-process rather than a live multi-source manager.

use std::path::Path;

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Loads `T` from an optional TOML file plus environment variables prefixed
/// `env_prefix` (double underscore as the nesting separator, e.g.
/// `OPAL_POLICY_SOURCE__GIT__REPO_URL`). Missing files are treated as empty,
/// not an error, matching the teacher's `FileSource::read_config`.
pub fn load<T: DeserializeOwned>(file_path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();
    if let Some(path) = file_path {
        builder = builder.add_source(File::from(path).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .separator("__")
            .try_parsing(true),
    );
    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: String,
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "name = \"opal\"\nport = 7002").unwrap();
        let sample: Sample = load(Some(file.path()), "OPAL_TEST_LOADS_FROM_FILE").unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "opal".to_string(),
                port: 7002
            }
        );
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let sample: Sample = load(
            Some(Path::new("/nonexistent/opal.toml")),
            "OPAL_TEST_MISSING_FILE_IS_NOT_AN_ERROR",
        )
        .unwrap();
        assert_eq!(sample.name, "");
    }
}
