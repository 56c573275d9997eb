//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use mkflash::{DeviceKind, Flasher, ProgramImage, SessionConfig, port::BOOTLOADER_BAUD};
use rust_i18n::t;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, get_port, use_fancy_output};

/// Arguments of `mkflash flash`.
pub(crate) struct FlashArgs<'a> {
    /// HEX file to flash.
    pub(crate) hex: &'a Path,
    /// Device named on the command line.
    pub(crate) device: Option<DeviceKind>,
    /// Skip the device identity check.
    pub(crate) no_device_check: bool,
    /// Reject records with a wrong checksum.
    pub(crate) strict_checksum: bool,
    /// Accept an image without data.
    pub(crate) allow_empty: bool,
}

/// Device the image must be flashed to.
///
/// The command line wins, then the file name, then the configuration.
pub(crate) fn expected_device(
    args: &FlashArgs<'_>,
    config: &Config,
) -> Option<DeviceKind> {
    if args.no_device_check {
        return None;
    }
    args.device
        .or_else(|| DeviceKind::from_image_name(args.hex))
        .or_else(|| config.flash.device_kind())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &mut Config, args: &FlashArgs<'_>) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("flash.loading_image", path = args.hex.display())
        );
    }

    let defaults = config.flash.hex_options();
    let options = defaults
        .with_strict_checksum(args.strict_checksum || defaults.strict_checksum)
        .with_allow_empty(args.allow_empty || defaults.allow_empty);
    let image = ProgramImage::from_file(args.hex, options)
        .with_context(|| t!("error.load_image", path = args.hex.display().to_string()))?;

    let expected = expected_device(args, config);
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("ℹ").blue(),
            t!(
                "flash.image_summary",
                bytes = image.total_bytes(),
                segments = image.segments().len()
            )
        );
        match expected {
            Some(kind) => eprintln!(
                "{} {}",
                style("ℹ").blue(),
                t!("flash.expected_device", device = kind.to_string())
            ),
            None if !args.no_device_check => {
                warn!("{}", t!("flash.device_unknown"));
            },
            None => {},
        }
    }

    let port = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.port.connection.baud)
        .unwrap_or(BOOTLOADER_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("🔌").cyan(),
            t!("common.using_port", port = port, baud = baud)
        );
    }

    let session = config
        .flash
        .apply_timeouts(SessionConfig::default().with_baud(baud));
    let mut flasher = mkflash::create_flasher(&port, session)
        .with_context(|| t!("error.open_port", port = port.clone()))?;

    let result = run_session(cli, flasher.as_mut(), &image, expected);
    flasher.close();
    result?;

    if !cli.quiet {
        eprintln!("\n{} {}", style("🎉").green().bold(), t!("flash.completed"));
    }
    Ok(())
}

/// Connect and flash; the caller closes the port on every outcome.
fn run_session(
    cli: &Cli,
    flasher: &mut dyn Flasher,
    image: &ProgramImage,
    expected: Option<DeviceKind>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} {}", style("⏳").yellow(), t!("common.waiting_device"));
    }
    let profile = flasher.connect(expected)?;
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!("common.connected", device = profile.to_string())
        );
    }

    let pb = progress_bar(cli.quiet);
    pb.set_message(t!("flash.programming").to_string());
    flasher.flash_image(image, &mut |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })?;
    pb.finish_with_message(t!("common.complete").to_string());
    Ok(())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
