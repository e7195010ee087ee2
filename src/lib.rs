//! Transactional core of a Redis-backed job queue.
//!
//! Implements the atomic state-transition procedures that move jobs between
//! the wait list, active list, priority set, delayed set and the terminal
//! completed/failed sets. Every procedure runs as a single optimistic Redis
//! transaction, so concurrent producers and consumers never observe an
//! intermediate state.

pub mod application;
pub mod config;
pub mod models;
pub mod redis_utils;
