use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vidcap_core::{
    Callback, ChannelHandle, ConfigOption, ConfigureFlags, ConfigureParams, DriverRegistry, GatewayConfig,
    OpenFlags, Section, StreamMessage, VideoHeader,
};
use vidcap_gateway::sim::{SimController, SimDevice, SimProvider};
use vidcap_gateway::Gateway;

const BUFFER_COUNT: usize = 4;
const FRAME_INTERVAL_US: u32 = 33_333;

/// Enumerates the configured drivers, then runs a short capture on one of
/// them.
///
/// # Environment
///   - `VIDCAP_CONFIG`: JSON config path (first argument wins)
///   - `VIDCAP_DEVICE`: device index to capture from (default 0)
///   - `VIDCAP_FRAMES`: frames to capture before tearing down (default 30)
///
/// Without a config the probe runs against a built-in registry of
/// test-pattern devices.
pub async fn run() -> Result<()> {
    let config = load_config()?;
    let device: usize = env_or("VIDCAP_DEVICE", 0);
    let frames: u64 = env_or("VIDCAP_FRAMES", 30);

    // ── Every registered descriptor is served by the test-pattern driver ──
    let mut primary = SimProvider::new();
    let mut legacy = SimProvider::new();
    for descriptor in config.registry.descriptors() {
        debug!("{} -> {}", descriptor, config.artifact_path(descriptor).display());
        primary = primary.device(descriptor, SimDevice::new(format!("Test pattern ({descriptor})")));
        legacy = legacy.device(descriptor, SimDevice::new(format!("Test pattern ({descriptor})")).host_pinning());
    }
    let controllers = [primary.controller(), legacy.controller()];
    let mut gateway = Gateway::from_config(&config, primary, legacy);

    let count = gateway.num_devs();
    info!("{} capture device(s) available", count);
    for index in 0..count {
        match gateway.driver_description(index) {
            Ok(desc) => info!("  [{}] {}", index, serde_json::to_string(&desc)?),
            Err(e) => warn!("  [{}] unavailable: {}", index, e),
        }
    }
    if count == 0 {
        return Ok(());
    }

    let channel = gateway
        .open(device, OpenFlags::IN)
        .with_context(|| format!("opening capture device {device}"))?;
    info!("Opened device {} as {}", device, channel);

    let result = capture(&mut gateway, channel, &controllers, frames).await;
    gateway.close(channel).context("closing capture channel")?;
    result
}

fn load_config() -> Result<GatewayConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VIDCAP_CONFIG").ok())
        .map(PathBuf::from);

    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            GatewayConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            info!("No config given, using the built-in test-pattern registry");
            Ok(GatewayConfig {
                registry: DriverRegistry::new()
                    .with_slot(Section::Primary, 0, "vidsim32.dll")
                    .with_slot(Section::Legacy, 0, "vidsim32.dll")
                    .with_slot(Section::Legacy, 1, "vidsim.drv"),
                ..Default::default()
            })
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Reads the current format as `(width, height, bits per pixel)`.
fn current_format(gateway: &mut Gateway, channel: ChannelHandle) -> Result<(u32, u32, u32)> {
    let mut size = 0u32;
    gateway
        .configure(
            channel,
            ConfigOption::Format,
            ConfigureFlags::GET | ConfigureFlags::QUERYSIZE,
            ConfigureParams::new().return_value(&mut size),
        )
        .context("querying format size")?;

    let mut format = vec![0u8; size as usize];
    gateway
        .configure(
            channel,
            ConfigOption::Format,
            ConfigureFlags::GET | ConfigureFlags::CURRENT,
            ConfigureParams::new().data1(&mut format),
        )
        .context("reading format")?;

    let fields: Vec<u32> = format
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    match fields.as_slice() {
        [width, height, bits, ..] => Ok((*width, *height, *bits)),
        _ => bail!("driver returned a {}-byte format", format.len()),
    }
}

fn error_text(gateway: &mut Gateway, channel: ChannelHandle, code: u32) -> String {
    let mut text = [0u8; 128];
    match gateway.get_error_text(channel, code, &mut text) {
        Ok(()) => {
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            String::from_utf8_lossy(&text[..end]).into_owned()
        }
        Err(e) => format!("error {code} ({e})"),
    }
}

async fn capture(
    gateway: &mut Gateway,
    channel: ChannelHandle,
    controllers: &[SimController],
    frames: u64,
) -> Result<()> {
    let caps = gateway.channel_caps(channel).context("reading channel caps")?;
    debug!("Channel caps: {:?}", caps);

    let (width, height, bits) = current_format(gateway, channel)?;
    let frame_bytes = (width * height * bits / 8) as usize;
    info!("Format {}x{} @ {} bpp ({} bytes/frame)", width, height, bits, frame_bytes);

    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.stream_init(channel, FRAME_INTERVAL_US, Callback::window(tx))?;

    let headers: Vec<VideoHeader> = (0..BUFFER_COUNT)
        .map(|i| VideoHeader::with_user_data(frame_bytes, i as u64))
        .collect();
    for header in &headers {
        gateway.stream_prepare_header(channel, header)?;
        gateway.stream_add_buffer(channel, header)?;
    }
    gateway.stream_start(channel)?;
    info!("Streaming {} frame(s) through {} buffer(s)", frames, BUFFER_COUNT);

    let mut ticker = tokio::time::interval(Duration::from_micros(u64::from(FRAME_INTERVAL_US)));
    let tick_limit = frames * 2 + BUFFER_COUNT as u64;
    let mut ticks = 0u64;
    let mut captured = 0u64;

    while captured < frames {
        tokio::select! {
            _ = ticker.tick() => {
                ticks += 1;
                if ticks > tick_limit {
                    bail!("driver stopped delivering frames after {captured}");
                }
                for controller in controllers {
                    controller.complete_next();
                }
            }
            Some(msg) = rx.recv() => match msg.message {
                StreamMessage::Data => {
                    let Some(header) = headers.iter().find(|h| h.id().0 as u64 == msg.param1) else {
                        warn!("Data for unknown header {:#x}", msg.param1);
                        continue;
                    };
                    captured += 1;
                    debug!(
                        "frame {} in buffer {} ({} bytes @ {} ms)",
                        captured,
                        header.user_data(),
                        header.bytes_used(),
                        header.time_captured_ms()
                    );
                    gateway.stream_add_buffer(channel, header)?;
                }
                StreamMessage::Error => {
                    let text = error_text(gateway, channel, msg.param1 as u32);
                    warn!("Stream error: {} ({} skipped)", text, msg.param2);
                }
                other => debug!("{:?} on {}", other, msg.channel),
            }
        }
    }

    gateway.stream_stop(channel)?;
    gateway.stream_reset(channel)?;
    while rx.try_recv().is_ok() {}

    let position = gateway.stream_get_position(channel)?;
    let report = gateway.stream_get_error(channel)?;
    info!(
        "Captured {} frame(s); position {} {:?}, {} skipped",
        captured, position.value, position.format, report.frames_skipped
    );
    if let Some(err) = report.error {
        warn!("Last stream error: {}", err);
    }

    gateway.stream_fini(channel)?;
    for header in &headers {
        gateway.stream_unprepare_header(channel, header)?;
    }
    Ok(())
}
