//! remote-exec-worker library
//!
//! This crate provides the core functionality for the worker process:
//! - Exact-length wire framing over a byte stream
//! - A sequential session loop serving one peer connection
//! - A request pipeline (parse, execute, serialize) that never breaks the protocol
//! - An executor trait and a subprocess implementation

pub mod config;
pub mod executor;
pub mod pipeline;
pub mod session;
pub mod transport;
