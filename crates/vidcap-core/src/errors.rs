use thiserror::Error;

/// Success status on the wire.
pub const DV_ERR_OK: u32 = 0;
/// First code of the system error range.
pub const DV_ERR_BASE: u32 = 1;
/// Last code of the system error range. Every code in
/// `DV_ERR_BASE..=DV_ERR_LASTERROR` has a text.
pub const DV_ERR_LASTERROR: u32 = DV_ERR_BASE + 26;
/// First code a driver may define for itself. Texts for these codes are
/// supplied by the driver.
pub const DV_ERR_USER_MSG: u32 = DV_ERR_BASE + 1000;

pub type DvResult<T> = Result<T, DvError>;

/// Channel status codes.
///
/// The `#[error]` strings double as the system error texts returned by
/// `get_error_text` for the reserved range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DvError {
    #[error("Undefined external error.")]
    NonSpecific,

    #[error("Video format is not supported.")]
    BadFormat,

    #[error("Video buffer is still in use by the driver.")]
    StillPlaying,

    #[error("Video header has not been prepared.")]
    Unprepared,

    #[error("The device only supports synchronous operation.")]
    Sync,

    #[error("No more video channels are available.")]
    TooManyChannels,

    #[error("Video hardware was not detected.")]
    NotDetected,

    #[error("The video driver is not correctly installed.")]
    BadInstall,

    #[error("Unable to create the palette.")]
    CreatePalette,

    #[error("The size field is too small.")]
    SizeField,

    #[error("Parameter 1 is invalid.")]
    BadParam1,

    #[error("Parameter 2 is invalid.")]
    BadParam2,

    #[error("Configuration data 1 is invalid.")]
    Config1,

    #[error("Configuration data 2 is invalid.")]
    Config2,

    #[error("Invalid flags.")]
    Flags,

    #[error("The function is not supported by the driver.")]
    NotSupported,

    #[error("Not enough memory is available.")]
    NoMemory,

    #[error("The device is already allocated.")]
    Allocated,

    #[error("Invalid device identifier.")]
    BadDeviceId,

    #[error("Invalid channel handle.")]
    InvalidHandle,

    #[error("Invalid error number.")]
    BadErrorNum,

    #[error("No buffers are available.")]
    NoBuffers,

    #[error("Memory conflict detected.")]
    MemConflict,

    #[error("I/O port conflict detected.")]
    IoConflict,

    #[error("DMA conflict detected.")]
    DmaConflict,

    #[error("Interrupt conflict detected.")]
    IntConflict,

    #[error("The driver cannot run in this mode.")]
    ProtectOnly,

    /// A driver-reported code the gateway has no name for. Passed through
    /// unchanged.
    #[error("Driver error {0}.")]
    Driver(u32),
}

const SYSTEM_ERRORS: [DvError; 27] = [
    DvError::NonSpecific,
    DvError::BadFormat,
    DvError::StillPlaying,
    DvError::Unprepared,
    DvError::Sync,
    DvError::TooManyChannels,
    DvError::NotDetected,
    DvError::BadInstall,
    DvError::CreatePalette,
    DvError::SizeField,
    DvError::BadParam1,
    DvError::BadParam2,
    DvError::Config1,
    DvError::Config2,
    DvError::Flags,
    DvError::NotSupported,
    DvError::NoMemory,
    DvError::Allocated,
    DvError::BadDeviceId,
    DvError::InvalidHandle,
    DvError::BadErrorNum,
    DvError::NoBuffers,
    DvError::MemConflict,
    DvError::IoConflict,
    DvError::DmaConflict,
    DvError::IntConflict,
    DvError::ProtectOnly,
];

impl DvError {
    /// Numeric status code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Driver(code) => *code,
            named => {
                let position = SYSTEM_ERRORS
                    .iter()
                    .position(|e| e == named)
                    .unwrap_or_default();
                DV_ERR_BASE + position as u32
            }
        }
    }

    /// Maps a status code back to an error. `DV_ERR_OK` maps to `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            DV_ERR_OK => None,
            c if Self::is_system_code(c) => Some(SYSTEM_ERRORS[(c - DV_ERR_BASE) as usize]),
            c => Some(Self::Driver(c)),
        }
    }

    pub fn is_system_code(code: u32) -> bool {
        (DV_ERR_BASE..=DV_ERR_LASTERROR).contains(&code)
    }

    pub fn is_user_code(code: u32) -> bool {
        code >= DV_ERR_USER_MSG
    }
}

/// Copies `text` into `dst` as a NUL-terminated byte string, truncating when
/// it does not fit. Returns the number of text bytes written.
pub fn write_text(text: &str, dst: &mut [u8]) -> usize {
    let Some(room) = dst.len().checked_sub(1) else {
        return 0;
    };
    let n = text.len().min(room);
    dst[..n].copy_from_slice(&text.as_bytes()[..n]);
    dst[n] = 0;
    n
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed registry line {line}: {reason}")]
    Registry { line: usize, reason: String },
}
