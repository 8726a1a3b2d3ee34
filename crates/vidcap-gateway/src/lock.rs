//! Host-side buffer pinning, used when the driver will not pin a buffer
//! itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use vidcap_core::{DvError, DvResult, VideoHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRegion {
    pub base: usize,
    pub len: usize,
}

pub trait PageLocker {
    /// Pins `region`. `false` when it cannot be pinned.
    fn lock(&self, region: LockRegion) -> bool;

    fn unlock(&self, region: LockRegion);
}

impl<T: PageLocker + ?Sized> PageLocker for Arc<T> {
    fn lock(&self, region: LockRegion) -> bool {
        (**self).lock(region)
    }

    fn unlock(&self, region: LockRegion) {
        (**self).unlock(region)
    }
}

#[derive(Debug, Default)]
struct QuotaState {
    used: usize,
    regions: HashMap<LockRegion, u32>,
}

/// Pins against a fixed byte budget. Nested locks of the same region are
/// counted and charged once.
#[derive(Debug)]
pub struct QuotaLocker {
    budget: usize,
    state: Mutex<QuotaState>,
}

impl QuotaLocker {
    pub fn new(budget: usize) -> Self {
        Self { budget, state: Mutex::new(QuotaState::default()) }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub fn locked_bytes(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).used
    }

    pub fn is_locked(&self, region: LockRegion) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
            .contains_key(&region)
    }
}

impl PageLocker for QuotaLocker {
    fn lock(&self, region: LockRegion) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = state.regions.get_mut(&region) {
            *count += 1;
            return true;
        }
        match state.used.checked_add(region.len) {
            Some(total) if total <= self.budget => {
                state.used = total;
                state.regions.insert(region, 1);
                true
            }
            _ => false,
        }
    }

    fn unlock(&self, region: LockRegion) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(count) = state.regions.get_mut(&region) else {
            debug!("unlock of region {:#x}+{} that was never locked", region.base, region.len);
            return;
        };
        if *count > 1 {
            *count -= 1;
            return;
        }
        state.regions.remove(&region);
        state.used -= region.len;
    }
}

pub(crate) fn header_regions(header: &VideoHeader) -> (LockRegion, LockRegion) {
    let record = LockRegion { base: header.id().0, len: VideoHeader::record_size() };
    let data = LockRegion { base: header.data_address(), len: header.buffer_length() };
    (record, data)
}

/// Pins the header record, then its data. Nothing stays pinned on failure.
pub(crate) fn pin_header(locker: &dyn PageLocker, header: &VideoHeader) -> DvResult<()> {
    let (record, data) = header_regions(header);
    if !locker.lock(record) {
        return Err(DvError::NoMemory);
    }
    if !locker.lock(data) {
        locker.unlock(record);
        return Err(DvError::NoMemory);
    }
    Ok(())
}

pub(crate) fn unpin_header(locker: &dyn PageLocker, header: &VideoHeader) {
    let (record, data) = header_regions(header);
    locker.unlock(data);
    locker.unlock(record);
}
