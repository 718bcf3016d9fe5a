//! Network Transport - byte-stream links to the device
//!
//! The session protocol has no length prefixes, so every transport here
//! honours a read-exactly-N-or-time-out contract. A transport that returns
//! whatever happens to be buffered breaks frame alignment.

mod error;
mod tcp;
mod transport;

pub use error::*;
pub use tcp::*;
pub use transport::*;

/// Default device port for TCP links and serial-to-TCP bridges
pub const DEFAULT_DEVICE_PORT: u16 = 19830;
