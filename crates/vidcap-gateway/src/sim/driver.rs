use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};
use vidcap_core::errors::{write_text, DV_ERR_USER_MSG};
use vidcap_core::{
    Callback, CapsFlags, ChannelCaps, ChannelHandle, ConfigOption, ConfigureFlags, ConfigureParams, DvError,
    DvResult, OpenFlags, StreamInitParams, StreamMessage, TimeFormat, VideoHeader,
};

use super::{PrepareMode, SimDevice};
use crate::driver::{DriverInstance, DriverMessage};

/// Reported when a frame arrives with no buffer queued.
pub const SIM_ERR_FRAME_DROPPED: u32 = DV_ERR_USER_MSG;

struct SimStream {
    channel: ChannelHandle,
    callback: Callback,
    micro_sec_per_frame: u32,
}

pub(super) struct SimState {
    device: SimDevice,
    flags: OpenFlags,
    stream: Option<SimStream>,
    running: bool,
    pub(super) queue: VecDeque<VideoHeader>,
    frames: u64,
    skipped: u32,
    last_error: Option<DvError>,
    options: HashMap<ConfigOption, Vec<u8>>,
    pub(super) closed: bool,
}

impl SimState {
    pub(super) fn new(device: SimDevice, flags: OpenFlags) -> Self {
        let mut options = HashMap::new();
        let format: Vec<u8> = [device.width, device.height, device.bytes_per_pixel * 8]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        options.insert(ConfigOption::Format, format);
        options.insert(ConfigOption::SourceRect, rect_bytes(device.width, device.height));
        options.insert(ConfigOption::DestinationRect, rect_bytes(device.width, device.height));

        Self {
            device,
            flags,
            stream: None,
            running: false,
            queue: VecDeque::new(),
            frames: 0,
            skipped: 0,
            last_error: None,
            options,
            closed: false,
        }
    }

    fn notify(&self, message: StreamMessage, param1: u64, param2: u64) {
        if let Some(stream) = &self.stream {
            stream.callback.notify(stream.channel, message, param1, param2);
        }
    }

    fn timestamp_ms(&self) -> u32 {
        let per_frame = self.stream.as_ref().map_or(0, |s| u64::from(s.micro_sec_per_frame));
        (self.frames * per_frame / 1000) as u32
    }

    fn fill(&self, header: &VideoHeader) {
        let frame = self.frames;
        let frame_bytes = self.device.frame_bytes();
        header.complete(self.timestamp_ms(), true, |buf| {
            let n = frame_bytes.min(buf.len());
            for (i, byte) in buf[..n].iter_mut().enumerate() {
                *byte = (i as u64).wrapping_add(frame) as u8;
            }
            n
        });
    }

    /// One capture interrupt. `true` when a queued buffer was completed.
    pub(super) fn capture_frame(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let completed = match self.queue.pop_front() {
            Some(header) => {
                self.fill(&header);
                trace!("[sim] frame {} -> header {:?}", self.frames, header.id());
                self.notify(StreamMessage::Data, header.id().0 as u64, 0);
                true
            }
            None => {
                self.skipped += 1;
                self.last_error = Some(DvError::NoBuffers);
                self.notify(StreamMessage::Error, u64::from(SIM_ERR_FRAME_DROPPED), u64::from(self.skipped));
                false
            }
        };
        self.frames += 1;
        completed
    }

    fn configure(&mut self, option: ConfigOption, flags: ConfigureFlags, params: ConfigureParams<'_>) -> DvResult<()> {
        if matches!(option, ConfigOption::Palette | ConfigOption::PaletteRgb555) {
            return Err(DvError::NotSupported);
        }
        if flags.contains(ConfigureFlags::QUERY) {
            return Ok(());
        }

        if flags.contains(ConfigureFlags::SET) {
            let data = params.data1.ok_or(DvError::Config1)?;
            self.options.insert(option, data[..params.size1].to_vec());
            return Ok(());
        }
        if !flags.contains(ConfigureFlags::GET) {
            return Err(DvError::Flags);
        }

        let stored = self.options.get(&option).ok_or(DvError::NotSupported)?;
        if let Some(slot) = params.return_value {
            *slot = stored.len() as u32;
        }
        if flags.contains(ConfigureFlags::QUERYSIZE) {
            return Ok(());
        }
        let out = params.data1.ok_or(DvError::Config1)?;
        let n = stored.len().min(params.size1);
        out[..n].copy_from_slice(&stored[..n]);
        Ok(())
    }

    fn handle(&mut self, message: DriverMessage<'_>) -> DvResult<()> {
        match message {
            DriverMessage::GetErrorText { code, text } => match code {
                SIM_ERR_FRAME_DROPPED => {
                    write_text("Simulated frame was dropped.", text);
                    Ok(())
                }
                _ => Err(DvError::BadErrorNum),
            },
            DriverMessage::ConfigureStorage { ident, flags } => {
                debug!("[sim] configure storage '{}' {:?}", ident, flags);
                Ok(())
            }
            DriverMessage::GetChannelCaps(caps) => {
                *caps = ChannelCaps {
                    flags: CapsFlags::CAN_SCALE | CapsFlags::SRC_CAN_CLIP,
                    src_rect_x_mod: 1,
                    src_rect_y_mod: 1,
                    src_rect_width_mod: 4,
                    src_rect_height_mod: 2,
                    dst_rect_x_mod: 1,
                    dst_rect_y_mod: 1,
                    dst_rect_width_mod: 4,
                    dst_rect_height_mod: 2,
                };
                Ok(())
            }
            DriverMessage::Frame(header) => {
                if !self.flags.intersects(OpenFlags::IN | OpenFlags::EXTERNAL_IN) {
                    return Err(DvError::NotSupported);
                }
                self.fill(header);
                self.frames += 1;
                Ok(())
            }
            DriverMessage::Configure { option, flags, params } => self.configure(option, flags, params),
            DriverMessage::StreamAddBuffer(header) => {
                if self.stream.is_none() {
                    return Err(DvError::NonSpecific);
                }
                header.mark_queued();
                self.queue.push_back(header.clone());
                Ok(())
            }
            DriverMessage::StreamFini => {
                self.running = false;
                self.notify(StreamMessage::Close, 0, 0);
                self.stream = None;
                Ok(())
            }
            DriverMessage::StreamGetError(report) => {
                report.error = self.last_error.take();
                report.frames_skipped = std::mem::take(&mut self.skipped);
                Ok(())
            }
            DriverMessage::StreamGetPosition(position) => {
                position.format = TimeFormat::Frames;
                position.value = self.frames;
                Ok(())
            }
            DriverMessage::StreamInit(params) => {
                if self.stream.is_some() {
                    return Err(DvError::Allocated);
                }
                self.install_stream(params);
                Ok(())
            }
            DriverMessage::StreamPrepareHeader(_) | DriverMessage::StreamUnprepareHeader(_) => match self.device.prepare {
                PrepareMode::Driver => Ok(()),
                PrepareMode::Host => Err(DvError::NotSupported),
                PrepareMode::Fail(err) => Err(err),
            },
            DriverMessage::StreamReset => {
                self.running = false;
                while let Some(header) = self.queue.pop_front() {
                    header.release();
                    self.notify(StreamMessage::Data, header.id().0 as u64, 0);
                }
                Ok(())
            }
            DriverMessage::StreamStart => {
                if self.stream.is_none() {
                    return Err(DvError::NonSpecific);
                }
                self.running = true;
                Ok(())
            }
            DriverMessage::StreamStop => {
                self.running = false;
                Ok(())
            }
        }
    }

    fn install_stream(&mut self, params: &StreamInitParams) {
        self.stream = Some(SimStream {
            channel: params.channel,
            callback: params.callback.clone(),
            micro_sec_per_frame: params.micro_sec_per_frame,
        });
        self.frames = 0;
        self.skipped = 0;
        self.last_error = None;
        self.notify(StreamMessage::Open, 0, 0);
    }
}

fn rect_bytes(width: u32, height: u32) -> Vec<u8> {
    [0, 0, width, height].iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(super) struct SimInstance {
    state: Arc<Mutex<SimState>>,
}

impl SimInstance {
    pub(super) fn new(state: Arc<Mutex<SimState>>) -> Self {
        Self { state }
    }
}

impl DriverInstance for SimInstance {
    fn send(&mut self, message: DriverMessage<'_>) -> DvResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(DvError::InvalidHandle);
        }
        state.handle(message)
    }

    fn close(&mut self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.device.refuse_close {
            return false;
        }
        state.running = false;
        state.closed = true;
        state.queue.clear();
        true
    }
}
