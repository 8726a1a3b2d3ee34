//! Buffer header lifecycle and streaming operations.
//!
//! Header state moves only through these calls and driver completion:
//!
//! ```text
//!   idle ──prepare──▶ PREPARED ──add_buffer──▶ PREPARED|IN_QUEUE
//!    ▲                  │   ▲                        │
//!    └────unprepare─────┘   └──── driver completes ──┘ (DONE)
//! ```

use tracing::debug;
use vidcap_core::{
    Callback, ChannelHandle, DvError, DvResult, HeaderFlags, StreamErrorReport, StreamInitParams, StreamPosition,
    VideoHeader,
};

use crate::driver::DriverMessage;
use crate::gateway::Gateway;
use crate::lock::{pin_header, unpin_header};

fn validate_header(header: &VideoHeader) -> DvResult<()> {
    if header.buffer_length() == 0 {
        return Err(DvError::BadParam1);
    }
    Ok(())
}

impl Gateway {
    // MARK: - Headers

    /// Makes `header` safe for the driver to fill.
    ///
    /// The driver is asked first. When it answers `NotSupported`, or when
    /// the channel's provider cannot pin memory, the host pins the header
    /// and its data. A failed host pin undoes the driver's prepare.
    pub fn stream_prepare_header(&mut self, channel: ChannelHandle, header: &VideoHeader) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        validate_header(header)?;
        if header.is_prepared() {
            debug!("{}: header {:?} is already prepared", channel, header.id());
            return Ok(());
        }

        header.set_flags(HeaderFlags::empty());
        let driver_prepared = match entry.instance.send(DriverMessage::StreamPrepareHeader(header)) {
            Ok(()) => true,
            Err(DvError::NotSupported) => false,
            Err(e) => return Err(e),
        };
        if !driver_prepared || entry.provider.requires_host_pinning() {
            if let Err(e) = pin_header(self.locker.as_ref(), header) {
                if driver_prepared {
                    let _ = entry.instance.send(DriverMessage::StreamUnprepareHeader(header));
                }
                return Err(e);
            }
            entry.pinned.push(header.clone());
        }

        header.insert_flags(HeaderFlags::PREPARED);
        Ok(())
    }

    /// Releases a prepared header. Refused while the driver still holds it.
    pub fn stream_unprepare_header(&mut self, channel: ChannelHandle, header: &VideoHeader) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        validate_header(header)?;
        if header.is_in_queue() {
            debug!("{}: header {:?} is still in queue", channel, header.id());
            return Err(DvError::StillPlaying);
        }
        if !header.is_prepared() {
            debug!("{}: header {:?} is not prepared", channel, header.id());
            return Ok(());
        }

        let host_unpin = match entry.instance.send(DriverMessage::StreamUnprepareHeader(header)) {
            Ok(()) => entry.provider.requires_host_pinning(),
            Err(DvError::NotSupported) => true,
            Err(e) => return Err(e),
        };
        if host_unpin {
            unpin_header(self.locker.as_ref(), header);
            entry.pinned.retain(|h| !h.same_as(header));
        }

        header.remove_flags(HeaderFlags::PREPARED);
        Ok(())
    }

    /// Queues a prepared header with the driver.
    pub fn stream_add_buffer(&mut self, channel: ChannelHandle, header: &VideoHeader) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        validate_header(header)?;
        if !header.is_prepared() {
            debug!("{}: header {:?} not prepared", channel, header.id());
            return Err(DvError::Unprepared);
        }
        if header.is_in_queue() {
            debug!("{}: header {:?} already in queue", channel, header.id());
            return Err(DvError::StillPlaying);
        }

        entry.instance.send(DriverMessage::StreamAddBuffer(header))?;
        entry.stream.get_or_insert_with(Default::default).track(header);
        Ok(())
    }

    /// Headers on `channel` the driver has not yet returned.
    pub fn pending_buffers(&mut self, channel: ChannelHandle) -> DvResult<usize> {
        let entry = Self::entry(&mut self.channels, channel)?;
        Ok(entry.stream.as_ref().map_or(0, |s| s.pending()))
    }

    /// Driver-allocated headers are not offered.
    pub fn stream_alloc_hdr_and_buffer(&mut self, channel: ChannelHandle, _size: usize) -> DvResult<VideoHeader> {
        Self::entry(&mut self.channels, channel)?;
        Err(DvError::NotSupported)
    }

    pub fn stream_free_hdr_and_buffer(&mut self, channel: ChannelHandle, _header: &VideoHeader) -> DvResult<()> {
        Self::entry(&mut self.channels, channel)?;
        Err(DvError::NotSupported)
    }

    /// Captures a single frame into `header` outside of streaming.
    pub fn frame(&mut self, channel: ChannelHandle, header: &VideoHeader) -> DvResult<()> {
        Self::entry(&mut self.channels, channel)?;
        validate_header(header)?;
        self.send(channel, DriverMessage::Frame(header))
    }

    // MARK: - Streaming

    pub fn stream_init(&mut self, channel: ChannelHandle, micro_sec_per_frame: u32, callback: Callback) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        callback.validate()?;

        let params = StreamInitParams { micro_sec_per_frame, callback, channel };
        entry.instance.send(DriverMessage::StreamInit(&params))?;
        // a re-init keeps headers the driver still holds
        entry.stream.get_or_insert_with(Default::default).prune();
        debug!("{}: stream initialized at {}us/frame", channel, micro_sec_per_frame);
        Ok(())
    }

    /// Ends the stream. Every buffer must have been returned first; call
    /// `stream_reset` to flush them.
    pub fn stream_fini(&mut self, channel: ChannelHandle) -> DvResult<()> {
        let entry = Self::entry(&mut self.channels, channel)?;
        if let Some(session) = entry.stream.as_mut() {
            session.prune();
            let pending = session.pending();
            if pending > 0 {
                debug!("{}: {} buffer(s) still queued at fini", channel, pending);
                return Err(DvError::StillPlaying);
            }
        }

        entry.instance.send(DriverMessage::StreamFini)?;
        entry.stream = None;
        Ok(())
    }

    pub fn stream_start(&mut self, channel: ChannelHandle) -> DvResult<()> {
        self.send(channel, DriverMessage::StreamStart)
    }

    pub fn stream_stop(&mut self, channel: ChannelHandle) -> DvResult<()> {
        self.send(channel, DriverMessage::StreamStop)
    }

    /// Stops the stream and returns every queued buffer.
    pub fn stream_reset(&mut self, channel: ChannelHandle) -> DvResult<()> {
        self.send(channel, DriverMessage::StreamReset)?;
        if let Some(session) = Self::entry(&mut self.channels, channel)?.stream.as_mut() {
            session.prune();
        }
        Ok(())
    }

    pub fn stream_get_position(&mut self, channel: ChannelHandle) -> DvResult<StreamPosition> {
        let mut position = StreamPosition::default();
        self.send(channel, DriverMessage::StreamGetPosition(&mut position))?;
        Ok(position)
    }

    pub fn stream_get_error(&mut self, channel: ChannelHandle) -> DvResult<StreamErrorReport> {
        let mut report = StreamErrorReport::default();
        self.send(channel, DriverMessage::StreamGetError(&mut report))?;
        Ok(report)
    }
}
