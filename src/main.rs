//! CLI Entry Point for rdb_shm_reader
//!
//! Attaches to the simulator's shared memory segment and writes every camera image it
//! publishes to the output directory. Runs until terminated.
//!
//! # Usage
//!
//! Read the default segment, images as PNG into the current directory:
//! ```bash
//! rdb_shm_reader
//! ```
//!
//! Read a file-backed segment with debug logging and buffer dumps:
//! ```bash
//! rdb_shm_reader --shm-file /dev/shm/rdb -v -o frames --format tiff
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rdb_shm_reader::config::{parse_u32, ConfigOverrides, ReaderConfig};
use rdb_shm_reader::logging::{self, LogFormat};
use rdb_shm_reader::storage::ImageFileFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rdb_shm_reader")]
#[command(about = "Extract camera images from RDB frames in shared memory", long_about = None)]
struct Cli {
    /// Shared memory key, decimal or 0x-prefixed hex [default: 0x8130]
    #[arg(short = 'k', long = "key", value_parser = parse_u32)]
    key: Option<u32>,

    /// Flag bits marking a buffer as ready for this reader [default: 0x2]
    #[arg(short = 'c', long, value_parser = parse_u32)]
    check_mask: Option<u32>,

    /// Only read this buffer slot
    #[arg(short = 'f', long, value_parser = clap::value_parser!(u8).range(0..2))]
    force_buffer: Option<u8>,

    /// Debug logging plus buffer-state dumps around each pass
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Map this file instead of attaching by key
    #[arg(long)]
    shm_file: Option<PathBuf>,

    /// Directory receiving extracted images
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Image file format
    #[arg(long, value_enum)]
    format: Option<ImageFileFormat>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            shm_key: self.key,
            shm_file: self.shm_file.clone(),
            check_mask: self.check_mask,
            force_buffer: self.force_buffer.map(usize::from),
            verbose: self.verbose.then_some(true),
            output_dir: self.output_dir.clone(),
            image_format: self.format,
            log_format: self.log_format,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ReaderConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    tracing::info!(
        segment = %config.segment_source(),
        check_mask = format!("{:#x}", config.check_mask),
        force_buffer = ?config.force_buffer,
        output_dir = %config.output_dir.display(),
        format = config.image_format.extension(),
        "Starting RDB shared memory reader"
    );

    rdb_shm_reader::run(&config).with_context(|| {
        format!("Reader stopped on segment {}", config.segment_source())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let err = Cli::try_parse_from(["rdb_shm_reader", "-x"])
            .err()
            .expect("unknown flag should not parse");
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_force_buffer_limited_to_two_slots() {
        let err = Cli::try_parse_from(["rdb_shm_reader", "-f", "2"])
            .err()
            .expect("slot 2 should not parse");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["rdb_shm_reader", "-f", "1"]).unwrap();
        assert_eq!(cli.overrides().force_buffer, Some(1));
    }

    #[test]
    fn test_short_flags_map_to_overrides() {
        let cli = Cli::try_parse_from(["rdb_shm_reader", "-k", "0x8130", "-c", "4", "-v"]).unwrap();

        assert_eq!(
            cli.overrides(),
            ConfigOverrides {
                shm_key: Some(0x8130),
                check_mask: Some(4),
                verbose: Some(true),
                ..ConfigOverrides::default()
            }
        );
    }

    #[test]
    fn test_no_flags_leave_configuration_untouched() {
        let cli = Cli::try_parse_from(["rdb_shm_reader"]).unwrap();
        assert_eq!(cli.overrides(), ConfigOverrides::default());
    }

    #[test]
    fn test_long_options_select_formats() {
        let cli = Cli::try_parse_from([
            "rdb_shm_reader",
            "--key",
            "33072",
            "--format",
            "tiff",
            "--log-format",
            "json",
            "--shm-file",
            "/dev/shm/rdb",
        ])
        .unwrap();
        let overrides = cli.overrides();

        assert_eq!(overrides.shm_key, Some(0x8130));
        assert_eq!(overrides.image_format, Some(ImageFileFormat::Tiff));
        assert_eq!(overrides.log_format, Some(LogFormat::Json));
        assert_eq!(overrides.shm_file, Some(PathBuf::from("/dev/shm/rdb")));
    }
}
