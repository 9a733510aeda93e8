pub mod driver;
pub mod storage;
