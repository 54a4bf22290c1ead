//! Habit-tracking backend: per-user statistics aggregation, a shared
//! response cache with rate limiting, and bounded worker pools.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

mod util;
