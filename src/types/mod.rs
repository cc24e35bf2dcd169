//! Data model shared by the log reader, the snapshot pipeline and the
//! replica directory. Everything here is plain data: serializable with
//! bincode and free of locking.

mod descriptor;
mod entry;
mod raft;
mod state;


pub use descriptor::*;
pub use entry::*;
pub use raft::*;
pub use state::*;
