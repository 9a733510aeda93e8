//! Controller variable viewer core.
//!
//! Layout:
//! - `core`: symbol model, tree flattening, value codec, batch plan (pure, synchronous)
//! - `adapters`: driver port + mock driver, config persistence
//! - `usecase`: batch read coordinator, dump engine, dump export
//! - `error`: serializable error DTO for the UI layer

pub mod adapters;
pub mod core;
pub mod error;
pub mod usecase;
