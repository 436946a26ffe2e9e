//! Lifecycle management subsystem.
//!
//! Startup order lives in `main`: config first, then core components, then
//! background loops, listener last. Shutdown is coordinated through one
//! broadcast channel that every loop subscribes to.

pub mod shutdown;

pub use shutdown::Shutdown;
