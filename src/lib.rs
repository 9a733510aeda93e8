pub mod symbols;

pub use symbols::adapters::driver::{DriverError, RawReadResult, SymbolDriver};
pub use symbols::core::codec::CodecOptions;
pub use symbols::core::flatten::{flatten, FlattenError, FlattenOptions};
pub use symbols::core::model::{LeafSymbol, SymbolCategory, SymbolNode};
pub use symbols::core::plan::BatchOptions;
pub use symbols::usecase::engine::{read_all, IntegrityError, ReadAllError};
