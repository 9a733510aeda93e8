pub mod codec;
pub mod flatten;
pub mod model;
pub mod plan;
