//! Allocation engine: range math, bitmap, record codec, stores and the
//! store-backed allocator

pub mod allocator;
pub mod config;
pub mod error;
pub mod persisted;
pub mod persistence;
pub mod range;
pub mod record;
pub mod retry;
pub mod store;
pub mod validation;
