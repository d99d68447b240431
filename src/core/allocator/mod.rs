//! Address allocation over a CIDR range
//!
//! Two implementations share the [`AddressAllocator`] interface:
//! - [`local::LocalAllocator`] keeps its bitmap in process memory
//! - [`crate::persisted::PersistentAllocator`] keeps it in a versioned store

pub mod bitmap;
pub mod local;

use crate::error::Result;
use std::net::IpAddr;

/// Address allocator trait
///
/// Defines the client-facing operations for reserving and returning
/// addresses of a single range.
pub trait AddressAllocator: Send + Sync {
    /// Reserve a specific address
    fn allocate(&self, address: IpAddr) -> Result<()>;

    /// Reserve the lowest free address and return it
    fn allocate_next(&self) -> Result<IpAddr>;

    /// Return an address to the pool
    ///
    /// Releasing an address that is free or outside the range is a no-op.
    fn release(&self, address: IpAddr) -> Result<()>;

    /// Check whether an address is currently allocated
    fn has(&self, address: IpAddr) -> Result<bool>;

    /// Canonical string form of the managed range
    fn cidr(&self) -> String;

    /// Number of addresses still available
    fn free(&self) -> Result<usize>;
}
