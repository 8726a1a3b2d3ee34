pub mod callback;
pub mod config;
pub mod errors;
pub mod header;
pub mod registry;
pub mod types;

pub use callback::{Callback, PostedMessage, StreamInitParams, StreamMessage};
pub use config::GatewayConfig;
pub use errors::{ConfigError, DvError, DvResult};
pub use header::{HeaderFlags, HeaderId, VideoHeader};
pub use registry::{DescriptorSource, DriverRegistry, Section};
pub use types::*;
