//! Stream notifications from the driver back to the caller.
//!
//! The caller picks one of two targets at `stream_init`: a function called
//! in the driver's context, or a message queue the driver posts to.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::errors::DvError;
use crate::types::ChannelHandle;

const MM_DRVM_OPEN: u32 = 0x3D0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMessage {
    /// The stream was initialized.
    Open,
    /// The stream was torn down.
    Close,
    /// A buffer completed. `param1` carries the header id.
    Data,
    /// The driver hit an error. `param1` carries the error code.
    Error,
}

impl StreamMessage {
    pub fn code(&self) -> u32 {
        MM_DRVM_OPEN
            + match self {
                Self::Open => 0,
                Self::Close => 1,
                Self::Data => 2,
                Self::Error => 3,
            }
    }
}

/// A notification as delivered to a posted-message target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: ChannelHandle,
    pub message: StreamMessage,
    pub param1: u64,
    pub param2: u64,
}

/// `(channel, message, instance, param1, param2)`
pub type StreamCallbackFn = dyn Fn(ChannelHandle, StreamMessage, u64, u64, u64) + Send + Sync;

#[derive(Clone, Default)]
pub enum Callback {
    #[default]
    None,
    Function {
        callback: Arc<StreamCallbackFn>,
        instance: u64,
    },
    Window(UnboundedSender<PostedMessage>),
}

impl Callback {
    pub fn function(
        instance: u64,
        callback: impl Fn(ChannelHandle, StreamMessage, u64, u64, u64) + Send + Sync + 'static,
    ) -> Self {
        Self::Function { callback: Arc::new(callback), instance }
    }

    pub fn window(target: UnboundedSender<PostedMessage>) -> Self {
        Self::Window(target)
    }

    /// A function target needs instance data; a window target must still
    /// have a live receiver.
    pub fn validate(&self) -> Result<(), DvError> {
        match self {
            Self::None => Ok(()),
            Self::Function { instance, .. } if *instance == 0 => Err(DvError::BadParam2),
            Self::Function { .. } => Ok(()),
            Self::Window(target) if target.is_closed() => Err(DvError::BadParam2),
            Self::Window(_) => Ok(()),
        }
    }

    pub fn notify(&self, channel: ChannelHandle, message: StreamMessage, param1: u64, param2: u64) {
        match self {
            Self::None => {}
            Self::Function { callback, instance } => callback(channel, message, *instance, param1, param2),
            Self::Window(target) => {
                let posted = PostedMessage { channel, message, param1, param2 };
                if target.send(posted).is_err() {
                    debug!("{}: notification {:?} dropped, receiver gone", channel, message);
                }
            }
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "Callback::None"),
            Self::Function { instance, .. } => write!(f, "Callback::Function(instance={instance:#x})"),
            Self::Window(_) => write!(f, "Callback::Window"),
        }
    }
}

/// Stream parameters relayed to the driver at `stream_init`.
#[derive(Debug, Clone)]
pub struct StreamInitParams {
    pub micro_sec_per_frame: u32,
    pub callback: Callback,
    pub channel: ChannelHandle,
}
