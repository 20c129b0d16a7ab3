//! Real service implementations
//!
//! Production implementations of the traits in [`crate::traits`].

pub mod spawner;
pub mod transport;

pub use spawner::RealWorkerSpawner;
pub use transport::RealWorkerTransport;
