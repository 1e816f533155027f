//! Application services and the ports they depend on.

pub mod blobs;
pub mod channel;
pub mod error;
pub mod repos;
pub mod retry;
pub mod saga;
pub mod tasks;
pub mod transform;
pub mod worker;
