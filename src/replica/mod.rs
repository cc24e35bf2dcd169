mod collaborators;
mod lease;
mod raft_log_writer;
mod raft_storage;
mod replica;


pub use collaborators::*;
pub use raft_storage::*;
pub use replica::*;
