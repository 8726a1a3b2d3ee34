use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errors::DvError;

/// Interface version announced to drivers at open time.
pub const VIDEO_API_VERSION: u32 = 4;

/// Four-character open type for capture drivers.
pub const OPEN_TYPE_VCAP: [u8; 4] = *b"vcap";

// MARK: - ChannelHandle

/// Opaque handle naming an open channel. Zero is the null handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(u32);

impl ChannelHandle {
    pub const NULL: Self = Self(0);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

// MARK: - Open

bitflags! {
    /// Channel kinds requested at open time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Video source into the capture hardware.
        const EXTERNAL_IN  = 0x0001;
        /// Monitor output of the capture hardware.
        const EXTERNAL_OUT = 0x0002;
        /// Frame buffer into system memory.
        const IN           = 0x0004;
        /// Frame buffer out of system memory.
        const OUT          = 0x0008;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    ExternalIn,
    ExternalOut,
    In,
    Out,
}

impl ChannelMode {
    /// The mode named by the lowest set mode bit.
    pub fn from_flags(flags: OpenFlags) -> Option<Self> {
        [
            (OpenFlags::EXTERNAL_IN, Self::ExternalIn),
            (OpenFlags::EXTERNAL_OUT, Self::ExternalOut),
            (OpenFlags::IN, Self::In),
            (OpenFlags::OUT, Self::Out),
        ]
        .into_iter()
        .find(|(bit, _)| flags.contains(*bit))
        .map(|(_, mode)| mode)
    }

    pub fn flag(&self) -> OpenFlags {
        match self {
            Self::ExternalIn => OpenFlags::EXTERNAL_IN,
            Self::ExternalOut => OpenFlags::EXTERNAL_OUT,
            Self::In => OpenFlags::IN,
            Self::Out => OpenFlags::OUT,
        }
    }
}

impl std::fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExternalIn => write!(f, "external-in"),
            Self::ExternalOut => write!(f, "external-out"),
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
        }
    }
}

/// Parameters handed to a driver when a channel is opened.
///
/// The driver may record why it refused the open in `error`; the gateway
/// reports that code verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    pub fcc_type: [u8; 4],
    pub version: u32,
    pub flags: OpenFlags,
    pub error: Option<DvError>,
}

impl OpenParams {
    pub fn new(flags: OpenFlags) -> Self {
        Self {
            fcc_type: OPEN_TYPE_VCAP,
            version: VIDEO_API_VERSION,
            flags,
            error: None,
        }
    }
}

// MARK: - ChannelCaps

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CapsFlags: u32 {
        const OVERLAY      = 0x0001;
        const SRC_CAN_CLIP = 0x0002;
        const DST_CAN_CLIP = 0x0004;
        const CAN_SCALE    = 0x0008;
    }
}

/// Channel capabilities. Rectangle fields give the granularity, in pixels,
/// the channel accepts for source and destination rectangles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCaps {
    pub flags: CapsFlags,
    pub src_rect_x_mod: u32,
    pub src_rect_y_mod: u32,
    pub src_rect_width_mod: u32,
    pub src_rect_height_mod: u32,
    pub dst_rect_x_mod: u32,
    pub dst_rect_y_mod: u32,
    pub dst_rect_width_mod: u32,
    pub dst_rect_height_mod: u32,
}

// MARK: - Streaming

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    #[default]
    Milliseconds,
    Frames,
}

/// Current position of a running stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    pub format: TimeFormat,
    pub value: u64,
}

/// Most recent stream error and the frames dropped since the last query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamErrorReport {
    pub error: Option<DvError>,
    pub frames_skipped: u32,
}

// MARK: - Configure

bitflags! {
    /// Direction and query bits for `configure`. Combined freely by the
    /// caller: e.g. `GET | MAX | QUERYSIZE`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ConfigureFlags: u32 {
        const QUERYSIZE = 0x0001;
        const CURRENT   = 0x0010;
        const NOMINAL   = 0x0020;
        const MIN       = 0x0040;
        const MAX       = 0x0080;
        const SET       = 0x1000;
        const GET       = 0x2000;
        /// Only ask whether the option is supported.
        const QUERY     = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct StorageFlags: u32 {
        const LOAD = 0x0001;
        const SAVE = 0x0002;
    }
}

const DVM_CONFIGURE_START: u32 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOption {
    Palette,
    Format,
    PaletteRgb555,
    SourceRect,
    DestinationRect,
}

impl ConfigOption {
    pub fn opcode(&self) -> u32 {
        DVM_CONFIGURE_START
            + match self {
                Self::Palette => 1,
                Self::Format => 2,
                Self::PaletteRgb555 => 3,
                Self::SourceRect => 4,
                Self::DestinationRect => 5,
            }
    }
}

/// Buffers for one `configure` call.
///
/// `size1`/`size2` are the byte counts the caller declares as meaningful in
/// `data1`/`data2`; they must not exceed the buffers themselves.
#[derive(Debug, Default)]
pub struct ConfigureParams<'a> {
    pub return_value: Option<&'a mut u32>,
    pub data1: Option<&'a mut [u8]>,
    pub size1: usize,
    pub data2: Option<&'a mut [u8]>,
    pub size2: usize,
}

impl<'a> ConfigureParams<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn return_value(mut self, slot: &'a mut u32) -> Self {
        self.return_value = Some(slot);
        self
    }

    pub fn data1(mut self, data: &'a mut [u8]) -> Self {
        self.size1 = data.len();
        self.data1 = Some(data);
        self
    }

    pub fn data2(mut self, data: &'a mut [u8]) -> Self {
        self.size2 = data.len();
        self.data2 = Some(data);
        self
    }

    /// Checks the declared sizes against the buffers and the return slot
    /// against the query flags.
    pub fn validate(&self, flags: ConfigureFlags) -> Result<(), DvError> {
        if self.data1.as_ref().is_some_and(|d| self.size1 > d.len()) {
            return Err(DvError::Config1);
        }
        if self.data2.as_ref().is_some_and(|d| self.size2 > d.len()) {
            return Err(DvError::Config2);
        }
        if flags.contains(ConfigureFlags::QUERYSIZE) && self.return_value.is_none() {
            return Err(DvError::NonSpecific);
        }
        Ok(())
    }
}

// MARK: - Driver info

/// Four-part file version of a driver artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl FileVersion {
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }
}

impl std::fmt::Display for FileVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

/// Name and version line reported for an enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescription {
    pub name: String,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_comes_from_lowest_bit() {
        assert_eq!(ChannelMode::from_flags(OpenFlags::IN), Some(ChannelMode::In));
        assert_eq!(
            ChannelMode::from_flags(OpenFlags::OUT | OpenFlags::EXTERNAL_IN),
            Some(ChannelMode::ExternalIn)
        );
        assert_eq!(ChannelMode::from_flags(OpenFlags::empty()), None);
    }

    #[test]
    fn open_params_carry_type_and_version() {
        let params = OpenParams::new(OpenFlags::IN);
        assert_eq!(&params.fcc_type, b"vcap");
        assert_eq!(params.version, VIDEO_API_VERSION);
        assert!(params.error.is_none());
    }

    #[test]
    fn configure_validation_checks_declared_sizes() {
        let mut small = [0u8; 4];
        let mut params = ConfigureParams::new().data1(&mut small);
        params.size1 = 8;
        assert_eq!(params.validate(ConfigureFlags::GET), Err(DvError::Config1));

        let mut other = [0u8; 2];
        let mut params = ConfigureParams::new().data2(&mut other);
        params.size2 = 3;
        assert_eq!(params.validate(ConfigureFlags::SET), Err(DvError::Config2));
    }

    #[test]
    fn size_query_needs_a_return_slot() {
        let params = ConfigureParams::new();
        assert_eq!(
            params.validate(ConfigureFlags::GET | ConfigureFlags::QUERYSIZE),
            Err(DvError::NonSpecific)
        );

        let mut slot = 0;
        let params = ConfigureParams::new().return_value(&mut slot);
        assert!(params.validate(ConfigureFlags::GET | ConfigureFlags::QUERYSIZE).is_ok());
    }

    #[test]
    fn file_version_formats_dotted() {
        assert_eq!(FileVersion::new(1, 2, 30, 4).to_string(), "1.2.30.4");
    }
}
