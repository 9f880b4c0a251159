//! Memory-access collaborator surface.
//!
//! The engine reads opcodes from the traced program's memory through this
//! trait. A short read (fewer bytes than requested) means the memory is not
//! accessible to the decoder and is *not* an error; the engine reports it
//! as an address-not-accessible element and waits for a new address.

pub mod image;

pub use image::ElfImage;

use crate::common::error::Error;
use crate::common::types::MemSpace;

/// Reader over the traced program's memory.
pub trait MemoryAccess {
    /// Read up to `buf.len()` bytes at `addr` in the given memory space.
    ///
    /// Returns the number of bytes actually read; fewer than requested
    /// (including zero) means the remainder is inaccessible. `Err` is
    /// reserved for real faults in the accessor itself.
    fn read(&mut self, addr: u64, space: MemSpace, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for &mut M {
    fn read(&mut self, addr: u64, space: MemSpace, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read(addr, space, buf)
    }
}
