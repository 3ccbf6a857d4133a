//! Block verification: proposals, votes and the per-height process
//! that turns them into a finished POS.

mod manager;
mod process;
mod request_cache;
mod retry_sender;
mod vote_pool;

pub use manager::ProcessManager;
pub use process::{Process, ProcessInput, ProcessState};
pub use request_cache::RequestCache;
pub use retry_sender::RetrySender;
pub use vote_pool::{PooledVote, VotePool};
