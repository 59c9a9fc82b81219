//! Frame stream module
//!
//! This module binds the loop to live data:
//! - Line-delimited JSON record decoding ([`protocol`])
//! - Single-slot latest-value buffer ([`buffer`])
//! - Acquisition child-process client ([`process`])

pub mod buffer;
pub mod process;
pub mod protocol;

pub use protocol::StreamError;
