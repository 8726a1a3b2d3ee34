//! Driver boundary.
//!
//! Every channel operation reaches the driver as one [`DriverMessage`]; the
//! driver answers with a status. Providers turn a descriptor into a live
//! [`DriverInstance`].

use vidcap_core::{
    ChannelCaps, ConfigOption, ConfigureFlags, ConfigureParams, DvResult, FileVersion, OpenParams,
    StorageFlags, StreamErrorReport, StreamInitParams, StreamPosition, VideoHeader,
};

const DRV_USER: u32 = 0x4000;
const DVM_START: u32 = DRV_USER;
const DVM_STREAM_MSG_START: u32 = DVM_START + 300;

#[derive(Debug)]
pub enum DriverMessage<'a> {
    GetErrorText { code: u32, text: &'a mut [u8] },
    ConfigureStorage { ident: &'a str, flags: StorageFlags },
    GetChannelCaps(&'a mut ChannelCaps),
    Frame(&'a VideoHeader),
    Configure {
        option: ConfigOption,
        flags: ConfigureFlags,
        params: ConfigureParams<'a>,
    },
    StreamAddBuffer(&'a VideoHeader),
    StreamFini,
    StreamGetError(&'a mut StreamErrorReport),
    StreamGetPosition(&'a mut StreamPosition),
    StreamInit(&'a StreamInitParams),
    StreamPrepareHeader(&'a VideoHeader),
    StreamReset,
    StreamStart,
    StreamStop,
    StreamUnprepareHeader(&'a VideoHeader),
}

impl DriverMessage<'_> {
    /// Wire opcode of the message.
    pub fn opcode(&self) -> u32 {
        match self {
            Self::GetErrorText { .. } => DVM_START,
            Self::ConfigureStorage { .. } => DVM_START + 101,
            Self::GetChannelCaps(_) => DVM_START + 102,
            Self::Frame(_) => DVM_START + 104,
            Self::Configure { option, .. } => option.opcode(),
            Self::StreamAddBuffer(_) => DVM_STREAM_MSG_START,
            Self::StreamFini => DVM_STREAM_MSG_START + 1,
            Self::StreamGetError(_) => DVM_STREAM_MSG_START + 2,
            Self::StreamGetPosition(_) => DVM_STREAM_MSG_START + 3,
            Self::StreamInit(_) => DVM_STREAM_MSG_START + 4,
            Self::StreamPrepareHeader(_) => DVM_STREAM_MSG_START + 5,
            Self::StreamReset => DVM_STREAM_MSG_START + 6,
            Self::StreamStart => DVM_STREAM_MSG_START + 7,
            Self::StreamStop => DVM_STREAM_MSG_START + 8,
            Self::StreamUnprepareHeader(_) => DVM_STREAM_MSG_START + 9,
        }
    }
}

/// An open driver session.
pub trait DriverInstance {
    fn send(&mut self, message: DriverMessage<'_>) -> DvResult<()>;

    /// Releases the session. `false` when the driver refused.
    fn close(&mut self) -> bool;
}

/// What a provider knows about a driver artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverInfo {
    pub description: Option<String>,
    pub file_version: Option<FileVersion>,
}

/// Opens driver sessions from descriptors.
pub trait DriverProvider {
    /// Opens `descriptor`, registered under `key`. On refusal the driver may
    /// leave a reason in `params.error`.
    fn open(&self, key: &str, descriptor: &str, params: &mut OpenParams) -> Option<Box<dyn DriverInstance>>;

    fn describe(&self, _descriptor: &str) -> Option<DriverInfo> {
        None
    }
}

/// Which provider owns a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Primary,
    Legacy,
}

impl ProviderKind {
    /// Primary drivers cannot pin caller memory; the host pins after the
    /// driver accepts a prepare.
    pub fn requires_host_pinning(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_opcodes_are_distinct() {
        let header = VideoHeader::new(1);
        let mut caps = ChannelCaps::default();
        let ops = [
            DriverMessage::StreamAddBuffer(&header).opcode(),
            DriverMessage::StreamFini.opcode(),
            DriverMessage::StreamPrepareHeader(&header).opcode(),
            DriverMessage::StreamReset.opcode(),
            DriverMessage::StreamStart.opcode(),
            DriverMessage::StreamStop.opcode(),
            DriverMessage::StreamUnprepareHeader(&header).opcode(),
            DriverMessage::GetChannelCaps(&mut caps).opcode(),
        ];
        let mut sorted = ops.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ops.len());
    }

    #[test]
    fn configure_uses_option_opcode() {
        let msg = DriverMessage::Configure {
            option: ConfigOption::Format,
            flags: ConfigureFlags::GET,
            params: ConfigureParams::new(),
        };
        assert_eq!(msg.opcode(), ConfigOption::Format.opcode());
    }
}
