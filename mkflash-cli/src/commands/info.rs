//! Image info and port listing command implementations.

use {
    crate::config::Config,
    anyhow::{Context, Result},
    console::style,
    mkflash::{DeviceKind, ProgramImage, auto_detect_port, detect_ports, image::AddressSegment},
    rust_i18n::t,
    serde::Serialize,
    std::path::Path,
};

/// Summary of a parsed HEX image.
#[derive(Debug, Serialize)]
pub(crate) struct ImageReport<'a> {
    source: &'a str,
    total_bytes: u32,
    segments: &'a [AddressSegment],
    device: Option<DeviceKind>,
    block_size: Option<u16>,
    blocks: Option<usize>,
    padded_len: Option<usize>,
}

impl<'a> ImageReport<'a> {
    pub(crate) fn new(image: &'a ProgramImage, block_size: Option<u16>) -> Result<Self> {
        let blocks = block_size
            .map(|size| image.block_count(size))
            .transpose()?;
        let padded_len = block_size
            .map(|size| image.padded_len(size))
            .transpose()?;
        Ok(Self {
            source: image.source(),
            total_bytes: image.total_bytes(),
            segments: image.segments(),
            device: DeviceKind::from_image_name(image.source()),
            block_size,
            blocks,
            padded_len,
        })
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(
    config: &Config,
    hex: &Path,
    json: bool,
    block_size: Option<u16>,
) -> Result<()> {
    if !json {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("flash.loading_image", path = hex.display())
        );
    }

    let image = ProgramImage::from_file(hex, config.flash.hex_options())
        .with_context(|| t!("error.load_image", path = hex.display().to_string()))?;
    let report = ImageReport::new(&image, block_size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    eprintln!("\n{}", style(t!("info.header")).bold().underlined());
    eprintln!("  {}", t!("info.total_bytes", bytes = report.total_bytes));
    let device = report
        .device
        .map_or_else(|| t!("info.unknown").to_string(), |kind| kind.to_string());
    eprintln!("  {}", t!("info.device", device = device));

    if let (Some(size), Some(blocks), Some(padded)) =
        (report.block_size, report.blocks, report.padded_len)
    {
        eprintln!(
            "  {}",
            t!("info.blocks", blocks = blocks, size = size, padded = padded)
        );
    }

    eprintln!(
        "\n{}",
        style(t!("info.segments_header")).bold().underlined()
    );
    for segment in report.segments {
        eprintln!(
            "  {} 0x{:06X} ({})",
            style("•").dim(),
            segment.base_offset,
            t!("info.segment_line", line = segment.line)
        );
    }

    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return Ok(());
    }

    for port in &detected {
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", style(port.bridge.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{bridge}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_detected",
                port = style(&auto_port.name).cyan().bold().to_string()
            )
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkflash::HexOptions;

    const IMAGE: &str = ":0A00000000010203040506070809C9\n:00000001FF\n";

    #[test]
    fn test_report_with_block_size() {
        let image = ProgramImage::parse_str(IMAGE, HexOptions::default()).unwrap();
        let report = ImageReport::new(&image, Some(4)).unwrap();
        assert_eq!(report.total_bytes, 10);
        assert_eq!(report.blocks, Some(3));
        assert_eq!(report.padded_len, Some(12));
        assert_eq!(report.device, None);
    }

    #[test]
    fn test_report_json_shape() {
        let image = ProgramImage::parse_str(IMAGE, HexOptions::default()).unwrap();
        let report = ImageReport::new(&image, None).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["total_bytes"], 10);
        assert!(value["blocks"].is_null());
        assert_eq!(value["segments"][0]["base_offset"], 0);
    }

    #[test]
    fn test_info_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Flight-Ctrl_MEGA644p_V2_14b.hex");
        std::fs::write(&path, IMAGE).unwrap();

        let image = ProgramImage::from_file(&path, HexOptions::default()).unwrap();
        let report = ImageReport::new(&image, Some(256)).unwrap();
        assert_eq!(report.device, Some(DeviceKind::Mega644));
        assert_eq!(report.blocks, Some(1));
        assert!(cmd_info(&Config::default(), &path, true, Some(256)).is_ok());
    }
}
