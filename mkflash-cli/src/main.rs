//! mkflash CLI - Command-line tool for flashing MikroKopter boards.
//!
//! ## Features
//!
//! - Flash Intel HEX firmware through the MikroKopter serial bootloader
//! - Inspect HEX images without hardware
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support
//! - Internationalization (i18n) support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use mkflash::DeviceKind;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod help;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// mkflash - Flash MikroKopter FlightCtrl and NaviCtrl boards.
///
/// Environment variables:
///   MKFLASH_PORT              - Default serial port
///   MKFLASH_BAUD              - Baud rate (default: 57600)
///   MKFLASH_DEVICE            - Expected device (mega644, mega1284, str911)
///   MKFLASH_LANG              - Language/locale (en, zh-CN)
///   MKFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "mkflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MKFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate of the bootloader link [default: 57600].
    #[arg(short, long, global = true, env = "MKFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Language/locale for messages (e.g., en, zh-CN).
    #[arg(long, global = true, env = "MKFLASH_LANG")]
    pub(crate) lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MKFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    pub(crate) confirm_port: bool,

    /// Offer all available ports, including unrecognized ones.
    #[arg(long, global = true)]
    pub(crate) list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Devices selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Device {
    /// ATmega644 FlightCtrl.
    Mega644,
    /// ATmega1284 FlightCtrl.
    Mega1284,
    /// STR911 NaviCtrl.
    Str911,
}

impl From<Device> for DeviceKind {
    fn from(device: Device) -> Self {
        match device {
            Device::Mega644 => DeviceKind::Mega644,
            Device::Mega1284 => DeviceKind::Mega1284,
            Device::Str911 => DeviceKind::Str911,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Flash an Intel HEX firmware image.
    Flash {
        /// Path to the HEX file.
        hex: PathBuf,

        /// Expected device (inferred from the file name if not given).
        #[arg(long, value_enum, env = "MKFLASH_DEVICE")]
        device: Option<Device>,

        /// Flash whatever device answers.
        #[arg(long, conflicts_with = "device")]
        no_device_check: bool,

        /// Reject HEX records with a wrong checksum.
        #[arg(long)]
        strict_checksum: bool,

        /// Accept an image without program data.
        #[arg(long)]
        allow_empty: bool,
    },

    /// Show information about a HEX file.
    Info {
        /// Path to the HEX file.
        hex: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Block size used to compute the block count.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
        block_size: Option<u16>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors that carry their own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing input.
    #[error("{0}")]
    Usage(String),
    /// Configuration could not be used.
    #[error("{0}")]
    Config(String),
    /// No port or no bootloader.
    #[error("{0}")]
    NoDevice(String),
    /// The user aborted a prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::NoDevice(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

fn library_exit_code(err: &mkflash::Error) -> i32 {
    match err {
        mkflash::Error::NoResponse { .. } | mkflash::Error::NoPortFound => 4,
        mkflash::Error::Serial(e) if e.kind() == serialport::ErrorKind::NoDevice => 4,
        mkflash::Error::Config(_) => 3,
        e if e.is_image_error() => 5,
        _ => 1,
    }
}

/// Map an error chain to the process exit code.
pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(lib) = cause.downcast_ref::<mkflash::Error>() {
            return library_exit_code(lib);
        }
    }
    1
}

/// Find `--lang` before clap runs so help text can be localized.
fn early_lang(args: &[String]) -> Option<String> {
    let mut lang = None;
    for (i, arg) in args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            lang = Some(val.to_string());
        } else if arg == "--lang" {
            lang = args.get(i + 1).cloned();
        }
    }
    lang.or_else(|| env::var("MKFLASH_LANG").ok())
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) if !path.exists() => Err(CliError::Config(
            rust_i18n::t!("error.config_not_found", path = path.display().to_string()).to_string(),
        )
        .into()),
        Some(path) => Ok(Config::load_from_path(path)),
        None => Ok(Config::load()),
    }
}

/// Get serial port from CLI args, configuration or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli)?;

    match &cli.command {
        Commands::Flash {
            hex,
            device,
            no_device_check,
            strict_checksum,
            allow_empty,
        } => commands::flash::cmd_flash(
            cli,
            &mut config,
            &commands::flash::FlashArgs {
                hex,
                device: device.map(DeviceKind::from),
                no_device_check: *no_device_check,
                strict_checksum: *strict_checksum,
                allow_empty: *allow_empty,
            },
        ),
        Commands::Info {
            hex,
            json,
            block_size,
        } => commands::info::cmd_info(&config, hex, *json, *block_size),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() {
    let raw_args: Vec<String> = env::args().collect();

    let locale = early_lang(&raw_args).unwrap_or_else(help::detect_locale);
    rust_i18n::set_locale(&locale);

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let wants_help = raw_args.iter().any(|a| a == "-h" || a == "--help");
    if wants_help || raw_args.len() <= 1 {
        help::print_localized_help(&raw_args);
        std::process::exit(0);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "mkflash v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for_error(&err));
    }
}
