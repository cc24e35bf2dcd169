pub mod convert;
pub mod file_io;
pub mod lock_order;

pub use lock_order::*;
