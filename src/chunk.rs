//! Fixed-size chunking of an input stream.
//!
//! A file is cut into windows of `chunk_size` bytes; the final window holds
//! whatever remains. Boundaries depend only on offsets, so an insertion near
//! the start of a file shifts every later block and defeats deduplication
//! across that edit.

use crate::{Error, Result};
use std::io::{self, Read};

/// Default chunk size for file splitting (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk size accepted from configuration (64 MiB)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// One window of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the sequence, starting at zero
    pub index: u64,
    /// Byte offset of the first byte within the input
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits readers into fixed-size chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Configuration {
                reason: format!(
                    "chunk size must be between 1 and {} bytes, got {}",
                    MAX_CHUNK_SIZE, chunk_size
                ),
            });
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lazily cut `reader` into chunks.
    ///
    /// Only one chunk is buffered at a time. Calling this again on a fresh
    /// reader over the same bytes yields the identical sequence.
    pub fn chunks<R: Read>(&self, reader: R) -> Chunks<R> {
        Chunks {
            reader,
            chunk_size: self.chunk_size,
            index: 0,
            offset: 0,
            finished: false,
        }
    }

    /// Number of chunks an input of `len` bytes produces
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size as u64)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Iterator returned by [`Chunker::chunks`]
pub struct Chunks<R> {
    reader: R,
    chunk_size: usize,
    index: u64,
    offset: u64,
    finished: bool,
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        // read_to_end through take() keeps reading across short reads and
        // retries on Interrupted, so every chunk but the last is full.
        let mut data = Vec::with_capacity(self.chunk_size);
        let read = (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut data);

        match read {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.finished = true;
                }
                let chunk = Chunk {
                    index: self.index,
                    offset: self.offset,
                    data,
                };
                self.index += 1;
                self.offset += n as u64;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
