//! Configuration file support for mkflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MKFLASH_*)
//! 3. Local config file (./mkflash.toml, ports from ./mkflash_ports.toml)
//! 4. Global config file (<config dir>/mkflash/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mkflash::{DeviceKind, HexOptions, SessionConfig};

const LOCAL_CONFIG: &str = "mkflash.toml";
const LOCAL_PORTS: &str = "mkflash_ports.toml";

/// USB adapter identification for port matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate of the bootloader link.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Remembered USB adapters, auto-selected without prompting.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl PortConfig {
    /// Remembered adapters as `(vid, pid)` pairs.
    pub fn known_usb(&self) -> Vec<(u16, u16)> {
        self.usb_device
            .iter()
            .map(|d| (d.vid, d.pid))
            .collect()
    }
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Expected device when the file name does not tell.
    pub device: Option<String>,
    /// Reject HEX records with a wrong checksum.
    #[serde(default)]
    pub strict_checksum: bool,
    /// Accept images without program data.
    #[serde(default)]
    pub allow_empty: bool,
    /// How long to wait for the bootloader, in seconds.
    pub discovery_timeout_secs: Option<u64>,
    /// How long to wait for each reply, in seconds.
    pub response_timeout_secs: Option<u64>,
}

impl FlashConfig {
    /// Configured expected device, if the name is valid.
    pub fn device_kind(&self) -> Option<DeviceKind> {
        let name = self.device.as_deref()?;
        let kind = DeviceKind::from_name(name);
        if kind.is_none() {
            warn!("Ignoring unknown device '{name}' in configuration");
        }
        kind
    }

    /// HEX parser options from configuration.
    pub fn hex_options(&self) -> HexOptions {
        HexOptions::default()
            .with_strict_checksum(self.strict_checksum)
            .with_allow_empty(self.allow_empty)
    }

    /// Apply configured timeouts to a session configuration.
    pub fn apply_timeouts(&self, mut session: SessionConfig) -> SessionConfig {
        if let Some(secs) = self.discovery_timeout_secs {
            session = session.with_discovery_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.response_timeout_secs {
            session = session.with_response_timeout(Duration::from_secs(secs));
        }
        session
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.merge_ports(ports_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        read_toml(path)
    }

    /// Load remembered ports from the local or global ports file.
    fn load_ports_config() -> Option<PortConfig> {
        if let Some(config) = read_toml(Path::new(LOCAL_PORTS)) {
            debug!("Loaded ports config from {LOCAL_PORTS}");
            return Some(config);
        }

        let global_path = Self::global_config_dir()?.join("ports.toml");
        let config = read_toml(&global_path)?;
        debug!("Loaded ports config from {}", global_path.display());
        Some(config)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mkflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        self.merge_ports(other.port);

        if other.flash.device.is_some() {
            self.flash.device = other.flash.device;
        }
        self.flash.strict_checksum |= other.flash.strict_checksum;
        self.flash.allow_empty |= other.flash.allow_empty;
        if other.flash.discovery_timeout_secs.is_some() {
            self.flash.discovery_timeout_secs = other.flash.discovery_timeout_secs;
        }
        if other.flash.response_timeout_secs.is_some() {
            self.flash.response_timeout_secs = other.flash.response_timeout_secs;
        }
    }

    fn merge_ports(&mut self, other: PortConfig) {
        if other.connection.serial.is_some() {
            self.port.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.port.connection.baud = other.connection.baud;
        }
        for device in other.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Remember a USB adapter for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.port.usb_device.push(device);
        self.save_ports(&path)
    }

    fn save_ports(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(&self.port)?;
        fs::write(path, content)?;
        info!("Saved USB device to {}", path.display());
        Ok(())
    }
}

/// Read and parse a TOML file; missing or invalid files yield `None`.
fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                None
            },
        },
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.flash.device.is_none());
        assert!(!config.flash.strict_checksum);
        assert!(!config.flash.allow_empty);
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.port.connection.baud = Some(38400);

        let mut other = Config::default();
        other.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.port.connection.baud = Some(57600);
        other.flash.device = Some("mega1284".to_string());
        other.flash.discovery_timeout_secs = Some(30);

        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(57600));
        assert_eq!(base.flash.device.as_deref(), Some("mega1284"));
        assert_eq!(base.flash.discovery_timeout_secs, Some(30));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.flash.strict_checksum = true;

        base.merge(Config::default());

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert!(base.flash.strict_checksum);
    }

    #[test]
    fn test_config_merge_usb_devices_dedup() {
        let mut base = Config::default();
        base.port.usb_device.push(UsbDevice { vid: 0x0403, pid: 0x6001 });

        let mut other = Config::default();
        other.port.usb_device.push(UsbDevice { vid: 0x0403, pid: 0x6001 });
        other.port.usb_device.push(UsbDevice { vid: 0x10C4, pid: 0xEA60 });

        base.merge(other);
        assert_eq!(base.port.known_usb(), vec![(0x0403, 0x6001), (0x10C4, 0xEA60)]);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port.connection]
serial = "/dev/ttyUSB0"
baud = 57600

[[port.usb_device]]
vid = 1027
pid = 24577

[flash]
device = "str911"
strict_checksum = true
discovery_timeout_secs = 20
response_timeout_secs = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.port.connection.baud, Some(57600));
        assert_eq!(config.port.known_usb(), vec![(0x0403, 0x6001)]);
        assert_eq!(config.flash.device_kind(), Some(DeviceKind::Str911));
        assert!(config.flash.strict_checksum);
        assert!(!config.flash.allow_empty);

        let session = config.flash.apply_timeouts(SessionConfig::default());
        assert_eq!(session.discovery_timeout, Duration::from_secs(20));
        assert_eq!(session.response.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_device_is_ignored() {
        let config: Config = toml::from_str("[flash]\ndevice = \"z80\"\n").unwrap();
        assert_eq!(config.flash.device_kind(), None);
    }

    #[test]
    fn test_hex_options_from_config() {
        let flash = FlashConfig {
            strict_checksum: true,
            allow_empty: true,
            ..FlashConfig::default()
        };
        let options = flash.hex_options();
        assert!(options.strict_checksum);
        assert!(options.allow_empty);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[port.connection]\nserial = \"/dev/ttyUSB1\"\n[flash]\ndevice = \"mega644\"\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.flash.device_kind(), Some(DeviceKind::Mega644));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[port.connection\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("mkflash"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }

    #[test]
    fn test_save_ports_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.toml");
        let mut config = Config::default();
        config.port.usb_device.push(UsbDevice { vid: 0x0403, pid: 0x6015 });
        config.save_ports(&path).unwrap();

        let loaded: PortConfig = read_toml(&path).unwrap();
        assert_eq!(loaded.known_usb(), vec![(0x0403, 0x6015)]);
    }
}
