//! Buffer headers shared between the caller, the gateway, and the driver.
//!
//! A [`VideoHeader`] is a cheap clonable handle. The caller keeps one, the
//! driver holds another while the buffer sits in its queue and completes it
//! from whatever context it captures on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use bytes::BytesMut;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u32 {
        /// The driver is finished with the buffer.
        const DONE     = 0x0001;
        /// The buffer is pinned and safe for the driver to touch.
        const PREPARED = 0x0002;
        /// The buffer is queued with the driver.
        const IN_QUEUE = 0x0004;
        /// The captured frame is a key frame.
        const KEYFRAME = 0x0008;
    }
}

/// Stable identity of a header, reported in data callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderId(pub usize);

#[derive(Debug)]
struct HeaderData {
    data: BytesMut,
    bytes_used: usize,
    time_captured_ms: u32,
    user: u64,
}

#[derive(Debug)]
struct Shared {
    flags: AtomicU32,
    body: Mutex<HeaderData>,
}

#[derive(Debug, Clone)]
pub struct VideoHeader {
    shared: Arc<Shared>,
}

impl VideoHeader {
    /// A header over a zeroed buffer of `buffer_length` bytes.
    pub fn new(buffer_length: usize) -> Self {
        Self::with_user_data(buffer_length, 0)
    }

    pub fn with_user_data(buffer_length: usize, user: u64) -> Self {
        let body = HeaderData {
            data: BytesMut::zeroed(buffer_length),
            bytes_used: 0,
            time_captured_ms: 0,
            user,
        };
        Self {
            shared: Arc::new(Shared {
                flags: AtomicU32::new(0),
                body: Mutex::new(body),
            }),
        }
    }

    fn body(&self) -> MutexGuard<'_, HeaderData> {
        self.shared.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> HeaderId {
        HeaderId(Arc::as_ptr(&self.shared) as usize)
    }

    pub fn same_as(&self, other: &VideoHeader) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Size of the header record itself, as pinned by the host.
    pub fn record_size() -> usize {
        std::mem::size_of::<Shared>()
    }

    /// Address of the first data byte. Stable for the header's lifetime.
    pub fn data_address(&self) -> usize {
        self.body().data.as_ptr() as usize
    }

    pub fn buffer_length(&self) -> usize {
        self.body().data.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.body().bytes_used
    }

    pub fn time_captured_ms(&self) -> u32 {
        self.body().time_captured_ms
    }

    pub fn user_data(&self) -> u64 {
        self.body().user
    }

    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.shared.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: HeaderFlags) {
        self.shared.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn insert_flags(&self, flags: HeaderFlags) {
        self.shared.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn remove_flags(&self, flags: HeaderFlags) {
        self.shared.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_prepared(&self) -> bool {
        self.flags().contains(HeaderFlags::PREPARED)
    }

    pub fn is_in_queue(&self) -> bool {
        self.flags().contains(HeaderFlags::IN_QUEUE)
    }

    pub fn is_done(&self) -> bool {
        self.flags().contains(HeaderFlags::DONE)
    }

    /// Read access to the captured bytes (`..bytes_used`).
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let body = self.body();
        f(&body.data[..body.bytes_used])
    }

    /// Driver side: hand the buffer to the queue.
    pub fn mark_queued(&self) {
        self.remove_flags(HeaderFlags::DONE | HeaderFlags::KEYFRAME);
        self.insert_flags(HeaderFlags::IN_QUEUE);
    }

    /// Driver side: fill the buffer and return it to the caller.
    ///
    /// `fill` receives the whole buffer and returns the number of bytes it
    /// wrote.
    pub fn complete(&self, time_captured_ms: u32, keyframe: bool, fill: impl FnOnce(&mut [u8]) -> usize) {
        {
            let mut body = self.body();
            let len = body.data.len();
            let written = fill(&mut body.data[..]).min(len);
            body.bytes_used = written;
            body.time_captured_ms = time_captured_ms;
        }
        let mut flags = HeaderFlags::DONE;
        if keyframe {
            flags |= HeaderFlags::KEYFRAME;
        }
        self.remove_flags(HeaderFlags::IN_QUEUE);
        self.insert_flags(flags);
    }

    /// Driver side: return the buffer without data, as on a reset.
    pub fn release(&self) {
        self.body().bytes_used = 0;
        self.remove_flags(HeaderFlags::IN_QUEUE);
        self.insert_flags(HeaderFlags::DONE);
    }
}
