mod adaptors;
mod clear_range;
mod engine;
mod entry_cache;
pub(crate) mod log_reader;
mod sideload;
mod sst;
mod state_loader;


#[doc(hidden)]
pub use adaptors::*;
#[doc(hidden)]
pub use clear_range::*;
#[doc(hidden)]
pub use engine::*;
#[doc(hidden)]
pub use entry_cache::*;
#[doc(hidden)]
pub use log_reader::*;
#[doc(hidden)]
pub use sideload::*;
#[doc(hidden)]
pub use sst::*;
#[doc(hidden)]
pub use state_loader::*;
