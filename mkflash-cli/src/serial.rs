//! Serial port selection.
//!
//! An explicit `--port` or configured port always wins. Otherwise the
//! detected ports are narrowed to known USB bridges (built-in list plus
//! remembered adapters) and the user is asked only when that still leaves
//! a choice. MKUSB adapters (FTDI) are listed first.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    mkflash::{BridgeKind, DetectedPort, detect_ports},
    log::{debug, error, info},
    rust_i18n::t,
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports, not only recognized bridges.
    pub list_all_ports: bool,
    /// Never prompt.
    pub non_interactive: bool,
    /// Ask for confirmation even for a single recognized port.
    pub confirm_port: bool,
}

/// Selected port and whether it matched a known adapter.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a built-in or remembered adapter.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    choose_port(detect_ports(), options, config)
}

/// Pick a port from the detected list.
fn choose_port(
    ports: Vec<DetectedPort>,
    options: &SerialOptions,
    config: &Config,
) -> Result<SelectedPort> {
    if ports.is_empty() {
        if options.non_interactive {
            return Err(usage_err(t!("serial.no_ports_found").as_ref()));
        }
        return Err(CliError::NoDevice(t!("serial.no_ports_found").to_string()).into());
    }

    let mut candidates: Vec<DetectedPort> = if options.list_all_ports {
        ports
    } else {
        let known: Vec<DetectedPort> = ports
            .iter()
            .filter(|p| is_known_device(p, config))
            .cloned()
            .collect();
        if known.is_empty() { ports } else { known }
    };
    sort_candidates(&mut candidates, config);

    if options.non_interactive {
        return match candidates.len() {
            1 => Ok(into_selected(candidates, 0, config)),
            0 => Err(usage_err(t!("serial.no_ports_available").as_ref())),
            _ => Err(usage_err(t!("serial.multiple_ports").as_ref())),
        };
    }

    if candidates.len() == 1 {
        let selected = into_selected(candidates, 0, config);
        if selected.is_known && !options.confirm_port {
            info!(
                "Auto-selected port: {} [{}]",
                selected.port.name,
                selected.port.bridge.name()
            );
            return Ok(selected);
        }
        ensure_interactive_terminal()?;
        return confirm_single_port(selected);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(candidates, config)
}

/// Known adapters first, MKUSB (FTDI) ahead of other bridges.
fn sort_candidates(ports: &mut [DetectedPort], config: &Config) {
    ports.sort_by_key(|p| {
        (
            !is_known_device(p, config),
            !p.bridge.is_preferred(),
        )
    });
}

fn into_selected(ports: Vec<DetectedPort>, index: usize, config: &Config) -> SelectedPort {
    let mut ports = ports;
    let port = ports.swap_remove(index);
    SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(t!("serial.interactive_requires_tty").to_string()).into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()
            } else {
                CliError::Usage(t!("serial.prompt_failed").to_string()).into()
            }
        },
    }
}

/// Resolve a user-given port name against the detected ports.
///
/// Unlisted names are still used as given; the open will fail later if the
/// port does not exist.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>, config: &Config) -> SelectedPort {
    let found = ports
        .iter()
        .position(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(name))
        });

    match found {
        Some(index) => into_selected(ports, index, config),
        None => SelectedPort {
            port: DetectedPort {
                name: name.to_string(),
                bridge: BridgeKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            },
            is_known: false,
        },
    }
}

/// Check if a port matches a built-in bridge or a remembered adapter.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    port.bridge.is_known() || port.matches_usb(&config.port.known_usb())
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let bridge = if port.bridge.is_known() {
        format!(" [{}]", style(port.bridge.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{bridge}{product}")
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len())
    );
    eprintln!("{}", style(t!("serial.known_devices_hint")).dim());

    // Keep labels on one line in narrow terminals.
    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            console::truncate_str(&port_label(port, config), max_item_width, "\u{2026}")
                .into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) if index < ports.len() => Ok(into_selected(ports, index, config)),
        Some(index) => Err(anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()),
    }
}

/// Confirm use of a single port.
fn confirm_single_port(selected: SelectedPort) -> Result<SelectedPort> {
    let product_info = selected
        .port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(
            t!(
                "serial.confirm_use",
                port = selected.port.name.clone(),
                info = product_info
            )
            .to_string(),
        )
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(selected)
    } else {
        Err(CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into())
    }
}

/// Offer to remember an unrecognized USB adapter.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if port.matches_usb(&config.port.known_usb()) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.remember_prompt").to_string())
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
