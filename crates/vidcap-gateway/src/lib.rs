//! Validated channel relay between capture applications
//! and video-capture drivers.
//!
//! # Flow
//! ```text
//! caller ──▶ Gateway (handle + argument checks, header state)
//!              │  DriverMessage
//!              ▼
//!        DriverInstance (primary | legacy provider)
//!              │  status
//!              ▼
//!        host pinning fallback on NotSupported ──▶ caller
//! ```

pub mod driver;
pub mod enumeration;
pub mod gateway;
pub mod lock;
pub mod sim;
mod stream;

pub use driver::{DriverInfo, DriverInstance, DriverMessage, DriverProvider, ProviderKind};
pub use enumeration::{Enumeration, Route};
pub use gateway::Gateway;
pub use lock::{LockRegion, PageLocker, QuotaLocker};
