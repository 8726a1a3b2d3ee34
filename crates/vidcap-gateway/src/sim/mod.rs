//! Software test-pattern capture driver.
//!
//! Serves any descriptor registered with [`SimProvider::device`]. Queued
//! buffers are completed one frame at a time through a [`SimController`],
//! which stands in for the capture interrupt.

mod driver;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use vidcap_core::{DvError, FileVersion, OpenParams};

use crate::driver::{DriverInfo, DriverInstance, DriverProvider};
use driver::{SimInstance, SimState};

pub use driver::SIM_ERR_FRAME_DROPPED;

/// How the device answers prepare/unprepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// The driver pins buffers itself.
    Driver,
    /// The driver answers `NotSupported`; the host must pin.
    Host,
    /// The driver fails with this code.
    Fail(DvError),
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub description: String,
    pub version: FileVersion,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub prepare: PrepareMode,
    pub open_error: Option<DvError>,
    pub refuse_close: bool,
}

impl SimDevice {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            version: FileVersion::new(1, 0, 0, 1),
            width: 320,
            height: 240,
            bytes_per_pixel: 2,
            prepare: PrepareMode::Driver,
            open_error: None,
            refuse_close: false,
        }
    }

    pub fn version(mut self, version: FileVersion) -> Self {
        self.version = version;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn host_pinning(mut self) -> Self {
        self.prepare = PrepareMode::Host;
        self
    }

    pub fn prepare_error(mut self, err: DvError) -> Self {
        self.prepare = PrepareMode::Fail(err);
        self
    }

    /// Refuse every open, reporting `err` in the open parameters.
    pub fn open_error(mut self, err: DvError) -> Self {
        self.open_error = Some(err);
        self
    }

    pub fn refuse_close(mut self) -> Self {
        self.refuse_close = true;
        self
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}

type SharedSimState = Arc<Mutex<SimState>>;

fn lock(state: &SharedSimState) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives every open instance of a provider.
#[derive(Clone, Default)]
pub struct SimController {
    instances: Arc<Mutex<Vec<SharedSimState>>>,
}

impl SimController {
    /// Adds `state`, forgetting instances that have been closed.
    fn register(&self, state: &SharedSimState) {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.retain(|s| !lock(s).closed);
        instances.push(state.clone());
    }

    fn live(&self) -> Vec<SharedSimState> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !lock(s).closed)
            .cloned()
            .collect()
    }

    /// Captures one frame on every running instance. Returns how many
    /// buffers were completed; a running instance with an empty queue drops
    /// its frame.
    pub fn complete_next(&self) -> usize {
        self.live().iter().filter(|state| lock(state).capture_frame()).count()
    }

    /// Instances opened and not yet closed.
    pub fn open_instances(&self) -> usize {
        self.live().len()
    }

    /// Buffers queued across all instances.
    pub fn queued(&self) -> usize {
        self.live().iter().map(|state| lock(state).queue.len()).sum()
    }
}

#[derive(Default)]
pub struct SimProvider {
    devices: HashMap<String, SimDevice>,
    controller: SimController,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `descriptor` with `device`. Descriptors match case-insensitively.
    pub fn device(mut self, descriptor: &str, device: SimDevice) -> Self {
        self.devices.insert(descriptor.to_ascii_lowercase(), device);
        self
    }

    pub fn controller(&self) -> SimController {
        self.controller.clone()
    }

    fn lookup(&self, descriptor: &str) -> Option<&SimDevice> {
        self.devices.get(&descriptor.to_ascii_lowercase())
    }
}

impl DriverProvider for SimProvider {
    fn open(&self, key: &str, descriptor: &str, params: &mut OpenParams) -> Option<Box<dyn DriverInstance>> {
        let Some(device) = self.lookup(descriptor) else {
            debug!("[sim] no device behind {}={}", key, descriptor);
            return None;
        };
        if let Some(err) = device.open_error {
            params.error = Some(err);
            return None;
        }

        let state = Arc::new(Mutex::new(SimState::new(device.clone(), params.flags)));
        self.controller.register(&state);
        info!("[sim] {} opened as {} ({:?})", descriptor, key, params.flags);
        Some(Box::new(SimInstance::new(state)))
    }

    fn describe(&self, descriptor: &str) -> Option<DriverInfo> {
        self.lookup(descriptor).map(|device| DriverInfo {
            description: Some(device.description.clone()),
            file_version: Some(device.version),
        })
    }
}
