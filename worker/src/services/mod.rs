//! Real service implementations

pub mod link;
pub mod workload;

pub use link::TcpSupervisorLink;
pub use workload::{FlakyWorkload, HttpWorkload};
