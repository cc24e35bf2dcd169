mod builder;
mod knobs;
mod services;
mod span_config;
mod store;
mod ts_cache;


pub use builder::*;
pub use knobs::*;
pub use services::*;
pub use span_config::*;
pub use store::*;
pub use ts_cache::*;
