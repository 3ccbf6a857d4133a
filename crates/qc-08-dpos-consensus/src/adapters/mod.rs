//! Adapters layer (Hexagonal Architecture)

mod event_bus;
mod quorum;
mod signer;
mod transport;

pub use event_bus::*;
pub use quorum::*;
pub use signer::*;
pub use transport::*;
