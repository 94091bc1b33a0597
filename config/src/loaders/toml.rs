//! Load the configuration from a file or a `String` written in [Toml format](https://en.wikipedia.org/wiki/TOML)

use std::{fs, io, path::Path};

use thiserror::Error;

use crate::config::{Config, ValidationError};

/// Error type denoting the different errors this module can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration file could not be read
    #[error("failed to read configuration file: {0}")]
    Io(#[from] io::Error),
    /// The contents are not a valid configuration
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration parsed but holds unusable values
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Just like `std::result::Result` but with the error param fixed to `Error` type in this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Load configuration from a file written in Toml format.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    log::debug!("Loading config from `{}`", path.to_string_lossy());

    let contents = fs::read_to_string(path)?;
    from_str(&contents)
}

/// Load configuration from a string written in Toml format.
pub fn from_str(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;

    Ok(config)
}
