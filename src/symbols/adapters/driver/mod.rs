//! Controller read port (driver).
//!
//! The connection behind a driver is owned by the driver; the core never opens or closes it.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::symbols::core::model::ReadRequest;

pub mod mock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("No connection")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    /// Error code reported by the controller for one request.
    #[error("device error 0x{code:x}: {message}")]
    Device { code: u32, message: String },

    #[error("comm error: {message}")]
    Comm { message: String },
}

/// Raw bytes of one symbol, or why that single item could not be read.
pub type RawReadResult = Result<Vec<u8>, DriverError>;

pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = RawReadResult> + Send + 'a>>;

/// Outer error: the whole round trip failed. Inner results: per-item outcome, in request order.
pub type BatchReadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<RawReadResult>, DriverError>> + Send + 'a>>;

pub trait SymbolDriver: Send + Sync {
    fn read<'a>(&'a self, request: &'a ReadRequest) -> ReadFuture<'a>;

    fn read_batch<'a>(&'a self, requests: &'a [ReadRequest]) -> BatchReadFuture<'a>;
}
