//! SEN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SentryError>;

/// Top-level error type for the proximity sentry.
#[derive(Debug, Error)]
pub enum SentryError {
    #[error("[SEN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SEN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SEN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SEN-2001] failed to spawn {sensor} process `{command}`: {source}")]
    SensorSpawn {
        sensor: &'static str,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[SEN-2002] {sensor} output read failure: {source}")]
    SensorIo {
        sensor: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("[SEN-2003] scan failed: {details}")]
    ScanFailed { details: String },

    #[error("[SEN-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SEN-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SEN-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SEN-3101] alert presentation failed: {details}")]
    Presentation { details: String },

    #[error("[SEN-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SentryError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SEN-1001",
            Self::MissingConfig { .. } => "SEN-1002",
            Self::ConfigParse { .. } => "SEN-1003",
            Self::SensorSpawn { .. } => "SEN-2001",
            Self::SensorIo { .. } => "SEN-2002",
            Self::ScanFailed { .. } => "SEN-2003",
            Self::Serialization { .. } => "SEN-2101",
            Self::Io { .. } => "SEN-3002",
            Self::ChannelClosed { .. } => "SEN-3003",
            Self::Presentation { .. } => "SEN-3101",
            Self::Runtime { .. } => "SEN-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SensorSpawn { .. }
                | Self::SensorIo { .. }
                | Self::ScanFailed { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Presentation { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for SentryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SentryError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for SentryError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SentryError;

    #[test]
    fn codes_are_stable_and_prefixed() {
        let err = SentryError::InvalidConfig {
            details: "approach_delta must be >= 1".to_string(),
        };
        assert_eq!(err.code(), "SEN-1001");
        assert!(err.to_string().starts_with("[SEN-1001]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn sensor_failures_are_retryable() {
        let err = SentryError::SensorIo {
            sensor: "bluetooth",
            source: std::io::Error::other("pipe closed"),
        };
        assert_eq!(err.code(), "SEN-2002");
        assert!(err.is_retryable());

        let scan = SentryError::ScanFailed {
            details: "iw exited with status 240".to_string(),
        };
        assert!(scan.is_retryable());
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("input is malformed");
        let err = SentryError::from(parse_err);
        assert_eq!(err.code(), "SEN-2101");
    }
}
