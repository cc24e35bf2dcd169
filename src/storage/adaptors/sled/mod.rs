mod sled_engine;

pub use sled_engine::*;
