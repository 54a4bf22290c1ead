//! Application services layer.

pub mod bulk;
pub mod error;
pub mod habits;
pub mod identity;
pub mod notifications;
pub mod repos;
pub mod stats;
pub mod workers;
