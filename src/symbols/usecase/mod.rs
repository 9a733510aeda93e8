pub mod engine;
pub mod export;
