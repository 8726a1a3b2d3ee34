use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use vidcap_core::config::artifact_path;
use vidcap_core::errors::write_text;
use vidcap_core::{
    ChannelCaps, ChannelHandle, ChannelMode, ConfigOption, ConfigureFlags, ConfigureParams, DescriptorSource,
    DriverDescription, DvError, DvResult, GatewayConfig, HeaderFlags, OpenFlags, OpenParams, StorageFlags, VideoHeader,
};

use crate::driver::{DriverInstance, DriverMessage, DriverProvider, ProviderKind};
use crate::enumeration::{Enumeration, Route};
use crate::lock::{unpin_header, PageLocker, QuotaLocker};

pub(crate) struct ChannelEntry {
    pub(crate) provider: ProviderKind,
    pub(crate) flags: OpenFlags,
    pub(crate) instance: Box<dyn DriverInstance>,
    pub(crate) stream: Option<StreamSession>,
    /// Headers the host pinned for this channel and has not yet unpinned.
    pub(crate) pinned: Vec<VideoHeader>,
}

/// Headers handed to the driver since `stream_init`.
#[derive(Default)]
pub(crate) struct StreamSession {
    pub(crate) headers: Vec<VideoHeader>,
}

impl StreamSession {
    pub(crate) fn track(&mut self, header: &VideoHeader) {
        self.prune();
        if !self.headers.iter().any(|h| h.same_as(header)) {
            self.headers.push(header.clone());
        }
    }

    /// Forgets headers the driver has returned.
    pub(crate) fn prune(&mut self) {
        self.headers.retain(VideoHeader::is_in_queue);
    }

    pub(crate) fn pending(&self) -> usize {
        self.headers.iter().filter(|h| h.is_in_queue()).count()
    }
}

/// Validated relay from channel operations to driver instances.
///
/// Owns the channel table, the cached device enumeration, and the page
/// locker used when a driver cannot pin buffers itself.
pub struct Gateway {
    descriptors: Box<dyn DescriptorSource>,
    primary: Box<dyn DriverProvider>,
    legacy: Box<dyn DriverProvider>,
    pub(crate) locker: Box<dyn PageLocker>,
    driver_dir: PathBuf,
    enumeration: Option<Enumeration>,
    pub(crate) channels: HashMap<ChannelHandle, ChannelEntry>,
    next_handle: u32,
}

impl Gateway {
    pub fn new(
        descriptors: impl DescriptorSource + 'static,
        primary: impl DriverProvider + 'static,
        legacy: impl DriverProvider + 'static,
    ) -> Self {
        Self {
            descriptors: Box::new(descriptors),
            primary: Box::new(primary),
            legacy: Box::new(legacy),
            locker: Box::new(QuotaLocker::unlimited()),
            driver_dir: PathBuf::from("."),
            enumeration: None,
            channels: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Builds a gateway over the configured registry, driver directory, and
    /// lock budget.
    pub fn from_config(
        config: &GatewayConfig,
        primary: impl DriverProvider + 'static,
        legacy: impl DriverProvider + 'static,
    ) -> Self {
        Self::new(config.registry.clone(), primary, legacy)
            .with_driver_dir(config.driver_dir.clone())
            .with_locker(QuotaLocker::new(config.lock_budget_bytes))
    }

    pub fn with_locker(mut self, locker: impl PageLocker + 'static) -> Self {
        self.locker = Box::new(locker);
        self
    }

    pub fn with_shared_locker(self, locker: Arc<QuotaLocker>) -> Self {
        self.with_locker(locker)
    }

    pub fn with_driver_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.driver_dir = dir.into();
        self
    }

    fn provider(&self, kind: ProviderKind) -> &dyn DriverProvider {
        match kind {
            ProviderKind::Primary => self.primary.as_ref(),
            ProviderKind::Legacy => self.legacy.as_ref(),
        }
    }

    pub(crate) fn entry(
        channels: &mut HashMap<ChannelHandle, ChannelEntry>,
        channel: ChannelHandle,
    ) -> DvResult<&mut ChannelEntry> {
        if channel.is_null() {
            return Err(DvError::InvalidHandle);
        }
        channels.get_mut(&channel).ok_or(DvError::InvalidHandle)
    }

    // MARK: - Core primitive

    /// Forwards `message` to the driver bound to `channel` and returns its
    /// status unchanged.
    pub fn send(&mut self, channel: ChannelHandle, message: DriverMessage<'_>) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        let opcode = message.opcode();
        let status = entry.instance.send(message);
        if let Err(e) = status {
            debug!("{} message {:#x} -> {:?}", channel, opcode, e);
        }
        status
    }

    pub fn is_open(&self, channel: ChannelHandle) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn channel_provider(&self, channel: ChannelHandle) -> Option<ProviderKind> {
        self.channels.get(&channel).map(|e| e.provider)
    }

    pub fn channel_mode(&self, channel: ChannelHandle) -> Option<ChannelMode> {
        self.channels.get(&channel).and_then(|e| ChannelMode::from_flags(e.flags))
    }

    // MARK: - Enumeration

    fn enumeration(&mut self) -> &Enumeration {
        self.enumeration
            .get_or_insert_with(|| Enumeration::scan(self.descriptors.as_ref()))
    }

    /// Number of configured devices. Scanned once, then served from cache.
    ///
    /// The cache belongs to this gateway. A process holding more than one
    /// `Gateway` gets one scan per gateway, and `refresh` on one does not
    /// reach the others.
    pub fn num_devs(&mut self) -> usize {
        self.enumeration().total()
    }

    /// Rescans the registry.
    pub fn refresh(&mut self) -> usize {
        self.enumeration = None;
        self.num_devs()
    }

    fn route(&mut self, device_index: usize) -> DvResult<(Route, String)> {
        let enumeration = self.enumeration();
        if enumeration.total() == 0 {
            return Err(DvError::BadInstall);
        }
        let route = enumeration.route(device_index)?;
        let descriptor = self
            .descriptors
            .lookup(route.section(), &route.key())
            .ok_or(DvError::BadInstall)?;
        Ok((route, descriptor))
    }

    // MARK: - Open / Close

    pub fn open(&mut self, device_index: usize, flags: OpenFlags) -> DvResult<ChannelHandle> {
        let (route, descriptor) = self.route(device_index)?;
        let key = route.key();
        let mut params = OpenParams::new(flags);

        let Some(instance) = self.provider(route.provider).open(&key, &descriptor, &mut params) else {
            let err = self.diagnose_open_failure(&descriptor, &params);
            warn!("Open of device {} ({}) failed: {}", device_index, descriptor, err);
            return Err(err);
        };

        let handle = self.allocate_handle();
        self.channels.insert(
            handle,
            ChannelEntry { provider: route.provider, flags, instance, stream: None, pinned: Vec::new() },
        );
        info!(
            "Opened {} on device {} ({} {}, {:?})",
            handle, device_index, route.provider, descriptor, flags
        );
        Ok(handle)
    }

    fn diagnose_open_failure(&self, descriptor: &str, params: &OpenParams) -> DvError {
        if let Some(err) = params.error {
            return err;
        }
        if artifact_path(&self.driver_dir, descriptor).exists() {
            DvError::BadInstall
        } else {
            DvError::NotDetected
        }
    }

    fn allocate_handle(&mut self) -> ChannelHandle {
        loop {
            let handle = ChannelHandle::from_raw(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            if !handle.is_null() && !self.channels.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Closes `channel`. Buffers still queued with the driver are the
    /// driver's business here; only `stream_fini` refuses them.
    ///
    /// Headers the host pinned for the channel are unpinned and lose
    /// `PREPARED`, whether or not the driver agrees to close.
    pub fn close(&mut self, channel: ChannelHandle) -> DvResult<()> {
        if channel.is_null() {
            return Err(DvError::InvalidHandle);
        }
        let mut entry = self.channels.remove(&channel).ok_or(DvError::InvalidHandle)?;
        for header in entry.pinned.drain(..) {
            debug!("{}: unpinning header {:?} at close", channel, header.id());
            unpin_header(self.locker.as_ref(), &header);
            header.remove_flags(HeaderFlags::PREPARED);
        }
        if entry.instance.close() {
            info!("Closed {}", channel);
            Ok(())
        } else {
            warn!("Driver refused to close {}", channel);
            Err(DvError::NonSpecific)
        }
    }

    /// Closes every open channel.
    pub fn close_all(&mut self) {
        let handles: Vec<_> = self.channels.keys().copied().collect();
        for handle in handles {
            let _ = self.close(handle);
        }
    }

    // MARK: - Description

    /// Name and version line for a device index, routed like `open`.
    pub fn driver_description(&mut self, device_index: usize) -> DvResult<DriverDescription> {
        let (route, descriptor) = self.route(device_index)?;
        let info = self.provider(route.provider).describe(&descriptor).unwrap_or_default();
        Ok(DriverDescription {
            name: info.description.unwrap_or(descriptor),
            version: info.file_version.map(|v| format!("Version:  {v}")),
        })
    }

    // MARK: - Channel configuration

    pub fn channel_caps(&mut self, channel: ChannelHandle) -> DvResult<ChannelCaps> {
        let mut caps = ChannelCaps::default();
        self.send(channel, DriverMessage::GetChannelCaps(&mut caps))?;
        Ok(caps)
    }

    pub fn configure(
        &mut self,
        channel: ChannelHandle,
        option: ConfigOption,
        flags: ConfigureFlags,
        params: ConfigureParams<'_>,
    ) -> DvResult<()> {
        Self::entry(&mut self.channels, channel)?;
        params.validate(flags)?;
        self.send(channel, DriverMessage::Configure { option, flags, params })
    }

    pub fn configure_storage(&mut self, channel: ChannelHandle, ident: &str, flags: StorageFlags) -> DvResult<()> {
        self.send(channel, DriverMessage::ConfigureStorage { ident, flags })
    }

    // MARK: - Error text

    /// Writes the text for `code` into `text`, NUL-terminated and truncated
    /// to fit.
    ///
    /// System codes are answered locally. Driver-defined codes are asked of
    /// the driver behind `channel`, which must not be null.
    pub fn get_error_text(&mut self, channel: ChannelHandle, code: u32, text: &mut [u8]) -> DvResult<()> {
        if let Some(first) = text.first_mut() {
            *first = 0;
        }
        if DvError::is_system_code(code) {
            if text.len() <= 1 {
                return Err(DvError::SizeField);
            }
            let err = DvError::from_code(code).ok_or(DvError::BadErrorNum)?;
            write_text(&err.to_string(), text);
            Ok(())
        } else if DvError::is_user_code(code) && !channel.is_null() {
            let status = self.send(channel, DriverMessage::GetErrorText { code, text: &mut *text });
            if let Some(last) = text.last_mut() {
                *last = 0;
            }
            status
        } else {
            Err(DvError::BadErrorNum)
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, SimProvider};
    use vidcap_core::errors::DV_ERR_USER_MSG;
    use vidcap_core::{DriverRegistry, FileVersion, Section};

    fn one_legacy_device() -> Gateway {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "vidsim.drv");
        let legacy = SimProvider::new().device("vidsim.drv", SimDevice::new("Test pattern"));
        Gateway::new(registry, SimProvider::new(), legacy)
    }

    fn text_of(buf: &[u8]) -> &str {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        std::str::from_utf8(&buf[..end]).unwrap()
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vidcap-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn send_on_null_or_unknown_channel_is_invalid_handle() {
        let mut gw = one_legacy_device();
        assert_eq!(gw.send(ChannelHandle::NULL, DriverMessage::StreamStart), Err(DvError::InvalidHandle));
        assert_eq!(
            gw.send(ChannelHandle::from_raw(77), DriverMessage::StreamStart),
            Err(DvError::InvalidHandle)
        );
    }

    #[test]
    fn open_single_device_succeeds() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).expect("opens");
        assert!(!ch.is_null());
        assert_eq!(gw.channel_provider(ch), Some(ProviderKind::Legacy));
        assert_eq!(gw.channel_mode(ch), Some(ChannelMode::In));
    }

    #[test]
    fn open_out_of_range_is_bad_device_id() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Legacy, 0, "a.drv")
            .with_slot(Section::Legacy, 1, "b.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new());
        assert_eq!(gw.num_devs(), 2);
        assert_eq!(gw.open(5, OpenFlags::IN), Err(DvError::BadDeviceId));
    }

    #[test]
    fn open_without_devices_is_bad_install() {
        let mut gw = Gateway::new(DriverRegistry::new(), SimProvider::new(), SimProvider::new());
        assert_eq!(gw.open(0, OpenFlags::IN), Err(DvError::BadInstall));
    }

    #[test]
    fn open_of_empty_legacy_slot_is_bad_install() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Legacy, 0, "a.drv")
            .with_slot(Section::Legacy, 2, "b.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new());
        assert_eq!(gw.open(1, OpenFlags::IN), Err(DvError::BadInstall));
    }

    #[test]
    fn open_propagates_driver_error() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "busy.drv");
        let legacy = SimProvider::new().device("busy.drv", SimDevice::new("Busy").open_error(DvError::Allocated));
        let mut gw = Gateway::new(registry, SimProvider::new(), legacy);
        assert_eq!(gw.open(0, OpenFlags::IN), Err(DvError::Allocated));
    }

    #[test]
    fn open_diagnoses_missing_artifact() {
        let dir = scratch_dir("missing");
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "gone.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new()).with_driver_dir(&dir);
        assert_eq!(gw.open(0, OpenFlags::IN), Err(DvError::NotDetected));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn open_diagnoses_present_but_refused_artifact() {
        let dir = scratch_dir("present");
        std::fs::write(dir.join("dead.drv"), b"MZ").unwrap();
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "dead.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new()).with_driver_dir(&dir);
        assert_eq!(gw.open(0, OpenFlags::IN), Err(DvError::BadInstall));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn open_diagnosis_ignores_descriptor_arguments() {
        let dir = scratch_dir("args");
        std::fs::write(dir.join("bt848.drv"), b"MZ").unwrap();
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "bt848.drv irq=5 port=0x300");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new()).with_driver_dir(&dir);
        assert_eq!(gw.open(0, OpenFlags::IN), Err(DvError::BadInstall));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mirrored_slot_zero_is_skipped_by_open() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Primary, 0, "vidsim32.dll")
            .with_slot(Section::Legacy, 0, "vidsim32.dll")
            .with_slot(Section::Legacy, 1, "bt848.drv");
        let primary = SimProvider::new().device("vidsim32.dll", SimDevice::new("Primary"));
        let legacy = SimProvider::new().device("bt848.drv", SimDevice::new("BT848"));
        let mut gw = Gateway::new(registry, primary, legacy);

        assert_eq!(gw.num_devs(), 2);
        let first = gw.open(0, OpenFlags::IN).unwrap();
        let second = gw.open(1, OpenFlags::IN).unwrap();
        assert_eq!(gw.channel_provider(first), Some(ProviderKind::Primary));
        assert_eq!(gw.channel_provider(second), Some(ProviderKind::Legacy));
        assert_eq!(gw.driver_description(1).unwrap().name, "BT848");
    }

    #[test]
    fn enumeration_is_cached_until_refresh() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "a.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new());
        assert_eq!(gw.num_devs(), 1);

        let grown = DriverRegistry::new()
            .with_slot(Section::Legacy, 0, "a.drv")
            .with_slot(Section::Legacy, 1, "b.drv");
        gw.descriptors = Box::new(grown);
        assert_eq!(gw.num_devs(), 1);
        assert_eq!(gw.refresh(), 2);
    }

    #[test]
    fn close_invalidates_handle() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        assert!(gw.close(ch).is_ok());
        assert!(!gw.is_open(ch));
        assert_eq!(gw.close(ch), Err(DvError::InvalidHandle));
        assert_eq!(gw.close(ChannelHandle::NULL), Err(DvError::InvalidHandle));
        assert_eq!(gw.stream_start(ch), Err(DvError::InvalidHandle));
    }

    #[test]
    fn close_reports_driver_refusal() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "sticky.drv");
        let legacy = SimProvider::new().device("sticky.drv", SimDevice::new("Sticky").refuse_close());
        let mut gw = Gateway::new(registry, SimProvider::new(), legacy);
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        assert_eq!(gw.close(ch), Err(DvError::NonSpecific));
        assert!(!gw.is_open(ch));
    }

    #[test]
    fn handles_are_never_reused_while_open() {
        let mut gw = one_legacy_device();
        let a = gw.open(0, OpenFlags::IN).unwrap();
        let b = gw.open(0, OpenFlags::OUT).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn driver_description_reports_version() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "vidsim.drv");
        let legacy = SimProvider::new()
            .device("vidsim.drv", SimDevice::new("Test pattern").version(FileVersion::new(1, 1, 0, 12)));
        let mut gw = Gateway::new(registry, SimProvider::new(), legacy);
        let desc = gw.driver_description(0).unwrap();
        assert_eq!(desc.name, "Test pattern");
        assert_eq!(desc.version.as_deref(), Some("Version:  1.1.0.12"));
    }

    #[test]
    fn driver_description_falls_back_to_descriptor() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "unknown.drv");
        let mut gw = Gateway::new(registry, SimProvider::new(), SimProvider::new());
        let desc = gw.driver_description(0).unwrap();
        assert_eq!(desc.name, "unknown.drv");
        assert_eq!(desc.version, None);
    }

    #[test]
    fn error_text_for_system_codes() {
        let mut gw = one_legacy_device();
        let mut buf = [0xFFu8; 64];
        gw.get_error_text(ChannelHandle::NULL, DvError::StillPlaying.code(), &mut buf).unwrap();
        assert_eq!(text_of(&buf), "Video buffer is still in use by the driver.");

        let mut small = [0xFFu8; 6];
        gw.get_error_text(ChannelHandle::NULL, DvError::Flags.code(), &mut small).unwrap();
        assert_eq!(&small, b"Inval\0");
    }

    #[test]
    fn error_text_needs_room() {
        let mut gw = one_legacy_device();
        let mut one = [0xFFu8; 1];
        assert_eq!(
            gw.get_error_text(ChannelHandle::NULL, DvError::NoMemory.code(), &mut one),
            Err(DvError::SizeField)
        );
        assert_eq!(one, [0]);
    }

    #[test]
    fn user_error_text_without_channel_is_bad_error_num() {
        let mut gw = one_legacy_device();
        let mut buf = [0u8; 32];
        assert_eq!(gw.get_error_text(ChannelHandle::NULL, 12345, &mut buf), Err(DvError::BadErrorNum));
        assert_eq!(gw.get_error_text(ChannelHandle::NULL, 500, &mut buf), Err(DvError::BadErrorNum));
        assert_eq!(gw.get_error_text(ChannelHandle::NULL, 0, &mut buf), Err(DvError::BadErrorNum));
    }

    #[test]
    fn user_error_text_is_asked_of_driver() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        let mut buf = [0xFFu8; 64];
        gw.get_error_text(ch, DV_ERR_USER_MSG, &mut buf).unwrap();
        assert_eq!(text_of(&buf), "Simulated frame was dropped.");
        assert_eq!(gw.get_error_text(ch, DV_ERR_USER_MSG + 9, &mut buf), Err(DvError::BadErrorNum));
    }

    #[test]
    fn channel_caps_are_filled_by_driver() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        let caps = gw.channel_caps(ch).unwrap();
        assert!(caps.flags.contains(vidcap_core::CapsFlags::CAN_SCALE));
        assert_eq!(gw.channel_caps(ChannelHandle::NULL), Err(DvError::InvalidHandle));
    }

    #[test]
    fn configure_validates_before_relaying() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();

        let flags = ConfigureFlags::GET | ConfigureFlags::CURRENT | ConfigureFlags::QUERYSIZE;
        assert_eq!(
            gw.configure(ch, ConfigOption::Format, flags, ConfigureParams::new()),
            Err(DvError::NonSpecific)
        );

        let mut data = [0u8; 4];
        let mut params = ConfigureParams::new().data1(&mut data);
        params.size1 = 16;
        assert_eq!(gw.configure(ch, ConfigOption::Format, ConfigureFlags::SET, params), Err(DvError::Config1));

        assert_eq!(
            gw.configure(ChannelHandle::NULL, ConfigOption::Format, ConfigureFlags::GET, ConfigureParams::new()),
            Err(DvError::InvalidHandle)
        );
    }

    #[test]
    fn configure_set_then_get_round_trips_through_driver() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();

        let mut format = *b"\x40\x01\x00\x00\xf0\x00\x00\x00\x10\x00\x00\x00";
        gw.configure(ch, ConfigOption::Format, ConfigureFlags::SET, ConfigureParams::new().data1(&mut format))
            .unwrap();

        let mut size = 0u32;
        gw.configure(
            ch,
            ConfigOption::Format,
            ConfigureFlags::GET | ConfigureFlags::CURRENT | ConfigureFlags::QUERYSIZE,
            ConfigureParams::new().return_value(&mut size),
        )
        .unwrap();
        assert_eq!(size, 12);

        let mut out = [0u8; 12];
        gw.configure(
            ch,
            ConfigOption::Format,
            ConfigureFlags::GET | ConfigureFlags::CURRENT,
            ConfigureParams::new().data1(&mut out),
        )
        .unwrap();
        assert_eq!(out, format);

        assert!(gw
            .configure(ch, ConfigOption::SourceRect, ConfigureFlags::QUERY, ConfigureParams::new())
            .is_ok());
        assert_eq!(
            gw.configure(ch, ConfigOption::Palette, ConfigureFlags::QUERY, ConfigureParams::new()),
            Err(DvError::NotSupported)
        );
    }

    #[test]
    fn configure_storage_is_relayed() {
        let mut gw = one_legacy_device();
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        assert!(gw.configure_storage(ch, "capture-app", StorageFlags::SAVE).is_ok());
        assert_eq!(
            gw.configure_storage(ChannelHandle::NULL, "capture-app", StorageFlags::LOAD),
            Err(DvError::InvalidHandle)
        );
    }

    #[test]
    fn from_config_uses_registry_and_budget() {
        let json = r#"{
            "lockBudgetBytes": 1,
            "registry": { "drivers": { "msvideo": "vidsim.drv" } }
        }"#;
        let config = GatewayConfig::from_json_str(json).unwrap();
        let legacy = SimProvider::new().device("vidsim.drv", SimDevice::new("Test pattern").host_pinning());
        let mut gw = Gateway::from_config(&config, SimProvider::new(), legacy);
        let ch = gw.open(0, OpenFlags::IN).unwrap();
        let header = VideoHeader::new(64);
        assert_eq!(gw.stream_prepare_header(ch, &header), Err(DvError::NoMemory));
    }

    #[test]
    fn drop_closes_open_channels() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "vidsim.drv");
        let legacy = SimProvider::new().device("vidsim.drv", SimDevice::new("Test pattern"));
        let controller = legacy.controller();
        let mut gw = Gateway::new(registry, SimProvider::new(), legacy);
        gw.open(0, OpenFlags::IN).unwrap();
        assert_eq!(controller.open_instances(), 1);
        drop(gw);
        assert_eq!(controller.open_instances(), 0);
    }
}
