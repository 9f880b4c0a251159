//! ELF-backed program image.
//!
//! Loads the loadable segments of an ELF file and serves opcode reads from
//! them, so a decoder can walk instructions out of the same image that ran
//! on the traced PE.

use std::path::Path;

use object::{Object, ObjectSegment};
use thiserror::Error;
use tracing::debug;

use crate::common::error::Error as DecodeError;
use crate::common::types::MemSpace;

use super::MemoryAccess;

/// Errors loading a program image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The file could not be read.
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a parseable object file.
    #[error("failed to parse image: {0}")]
    Object(#[from] object::Error),
}

/// One loadable segment.
#[derive(Debug)]
struct Segment {
    addr: u64,
    data: Vec<u8>,
}

/// Program image assembled from an ELF file's loadable segments.
///
/// Serves every [`MemSpace`]: a static image has no notion of translation
/// regimes, so the space parameter is ignored.
#[derive(Debug, Default)]
pub struct ElfImage {
    segments: Vec<Segment>,
}

impl ElfImage {
    /// Load an image from an ELF file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Load an image from ELF file contents.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let file = object::File::parse(data)?;
        let mut segments = Vec::new();
        for seg in file.segments() {
            let bytes = seg.data()?;
            if bytes.is_empty() {
                continue;
            }
            debug!(addr = seg.address(), len = bytes.len(), "loaded segment");
            segments.push(Segment {
                addr: seg.address(),
                data: bytes.to_vec(),
            });
        }
        segments.sort_by_key(|s| s.addr);
        Ok(Self { segments })
    }

    /// Add a raw code region at an address (e.g. for images without ELF
    /// headers).
    pub fn add_region(&mut self, addr: u64, data: Vec<u8>) {
        self.segments.push(Segment { addr, data });
        self.segments.sort_by_key(|s| s.addr);
    }
}

impl MemoryAccess for ElfImage {
    fn read(&mut self, addr: u64, _space: MemSpace, buf: &mut [u8]) -> Result<usize, DecodeError> {
        for seg in &self.segments {
            let Some(offset) = addr.checked_sub(seg.addr) else {
                continue;
            };
            let Ok(offset) = usize::try_from(offset) else {
                continue;
            };
            if offset >= seg.data.len() {
                continue;
            }
            let avail = seg.data.len() - offset;
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&seg.data[offset..offset + n]);
            return Ok(n);
        }
        Ok(0)
    }
}
