//! Reader configuration using Figment
//!
//! Settings are layered, later sources winning:
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`)
//! 3. Environment variables prefixed with `RDB_READER_`
//! 4. Command-line flags
//!
//! Integer settings accept decimal or `0x`-prefixed hex, so both
//! `RDB_READER_SHM_KEY=33072` and `shm_key = "0x8130"` work.
//!
//! # Example
//! ```no_run
//! use rdb_shm_reader::config::{ConfigOverrides, ReaderConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReaderConfig::load(None, &ConfigOverrides::default())?;
//! println!("Reading segment {}", config.segment_source());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReaderError, ReaderResult};
use crate::layout::{flags, DEFAULT_SHM_KEY, MAX_BUFFERS};
use crate::logging::LogFormat;
use crate::shm::SegmentSource;
use crate::storage::ImageFileFormat;

/// Prefix of environment variables read by [`ReaderConfig::load`].
pub const ENV_PREFIX: &str = "RDB_READER_";

/// Complete reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// System V key of the segment
    #[serde(default = "default_shm_key", deserialize_with = "flexible_u32")]
    pub shm_key: u32,
    /// Map this file instead of attaching by key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shm_file: Option<PathBuf>,
    /// Flag bits that mark a buffer as ready for this reader
    #[serde(default = "default_check_mask", deserialize_with = "flexible_u32")]
    pub check_mask: u32,
    /// Only ever read this buffer slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_buffer: Option<usize>,
    /// Debug logging and buffer-state dumps around each pass
    #[serde(default)]
    pub verbose: bool,
    /// Directory receiving extracted images
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Encoding of extracted images
    #[serde(default)]
    pub image_format: ImageFileFormat,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Delay between attach attempts in milliseconds
    #[serde(default = "default_attach_retry")]
    pub attach_retry_ms: u64,
    /// Delay between buffer polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn default_shm_key() -> u32 {
    DEFAULT_SHM_KEY
}

fn default_check_mask() -> u32 {
    flags::READY_TC
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_attach_retry() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    1
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            shm_key: default_shm_key(),
            shm_file: None,
            check_mask: default_check_mask(),
            force_buffer: None,
            verbose: false,
            output_dir: default_output_dir(),
            image_format: ImageFileFormat::default(),
            log_format: LogFormat::default(),
            attach_retry_ms: default_attach_retry(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Settings given on the command line; `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigOverrides {
    /// `--key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shm_key: Option<u32>,
    /// `--shm-file`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shm_file: Option<PathBuf>,
    /// `--check-mask`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_mask: Option<u32>,
    /// `--force-buffer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_buffer: Option<usize>,
    /// `--verbose`; only ever turns verbosity on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    /// `--output-dir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// `--format`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_format: Option<ImageFileFormat>,
    /// `--log-format`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
}

impl ReaderConfig {
    /// Layer defaults, `file`, the environment and `overrides`, then validate.
    ///
    /// A `file` that was named explicitly must exist.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> ReaderResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(ReaderConfig::default()));

        if let Some(path) = file {
            if !path.is_file() {
                return Err(ReaderError::Configuration(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: ReaderConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        config.validate().map_err(ReaderError::Configuration)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if let Some(index) = self.force_buffer {
            if index >= MAX_BUFFERS {
                return Err(format!(
                    "Invalid force_buffer {}. Must be below {}",
                    index, MAX_BUFFERS
                ));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err("Invalid poll_interval_ms 0. Must be at least 1".to_string());
        }

        if self.check_mask & flags::LOCK != 0 {
            return Err(format!(
                "Invalid check_mask {:#x}. The lock bit {:#x} cannot mark readiness",
                self.check_mask,
                flags::LOCK
            ));
        }

        Ok(())
    }

    /// Segment the reader attaches to.
    pub fn segment_source(&self) -> SegmentSource {
        match &self.shm_file {
            Some(path) => SegmentSource::File { path: path.clone() },
            None => SegmentSource::SysV { key: self.shm_key },
        }
    }
}

/// Parse a `u32` given in decimal or `0x`-prefixed hex.
pub fn parse_u32(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|e| format!("'{}' is not a valid 32-bit number: {}", text, e))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u32),
    Text(String),
}

fn flexible_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => parse_u32(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.shm_key, 0x8130);
        assert_eq!(config.check_mask, flags::READY_TC);
        assert_eq!(config.attach_retry_ms, 100);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.image_format, ImageFileFormat::Png);
        assert!(config.validate().is_ok());
        assert_eq!(config.segment_source(), SegmentSource::SysV { key: 0x8130 });
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("33072"), Ok(33072));
        assert_eq!(parse_u32("0x8130"), Ok(0x8130));
        assert_eq!(parse_u32("0XFF"), Ok(255));
        assert!(parse_u32("0xZZ").is_err());
        assert!(parse_u32("-1").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let forced = ReaderConfig {
            force_buffer: Some(2),
            ..ReaderConfig::default()
        };
        assert!(forced.validate().is_err());

        let no_poll = ReaderConfig {
            poll_interval_ms: 0,
            ..ReaderConfig::default()
        };
        assert!(no_poll.validate().is_err());

        let lock_mask = ReaderConfig {
            check_mask: flags::LOCK | flags::READY_TC,
            ..ReaderConfig::default()
        };
        assert!(lock_mask.validate().is_err());

        let zero_mask = ReaderConfig {
            check_mask: 0,
            force_buffer: Some(1),
            ..ReaderConfig::default()
        };
        assert!(zero_mask.validate().is_ok());
    }

    #[test]
    fn test_layering_file_env_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "reader.toml",
                r#"
                    shm_key = "0x9000"
                    check_mask = 4
                    output_dir = "frames"
                    image_format = "tiff"
                "#,
            )?;
            jail.set_env("RDB_READER_CHECK_MASK", "6");
            jail.set_env("RDB_READER_POLL_INTERVAL_MS", "5");

            let overrides = ConfigOverrides {
                output_dir: Some(PathBuf::from("cli-frames")),
                verbose: Some(true),
                ..ConfigOverrides::default()
            };
            let config = ReaderConfig::load(Some(Path::new("reader.toml")), &overrides)
                .map_err(|e| e.to_string())?;

            assert_eq!(config.shm_key, 0x9000);
            assert_eq!(config.check_mask, 6);
            assert_eq!(config.poll_interval_ms, 5);
            assert_eq!(config.image_format, ImageFileFormat::Tiff);
            assert_eq!(config.output_dir, PathBuf::from("cli-frames"));
            assert!(config.verbose);
            assert_eq!(config.force_buffer, None);
            Ok(())
        });
    }

    #[test]
    fn test_hex_key_from_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("RDB_READER_SHM_KEY", "0x8131");
            jail.set_env("RDB_READER_SHM_FILE", "/dev/shm/rdb");

            let config =
                ReaderConfig::load(None, &ConfigOverrides::default()).map_err(|e| e.to_string())?;
            assert_eq!(config.shm_key, 0x8131);
            assert_eq!(
                config.segment_source(),
                SegmentSource::File {
                    path: PathBuf::from("/dev/shm/rdb")
                }
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let result = ReaderConfig::load(Some(Path::new("absent.toml")), &ConfigOverrides::default());
            assert!(matches!(result, Err(ReaderError::Configuration(_))));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fail_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("RDB_READER_FORCE_BUFFER", "3");
            let result = ReaderConfig::load(None, &ConfigOverrides::default());
            assert!(matches!(result, Err(ReaderError::Configuration(_))));
            Ok(())
        });
    }
}
