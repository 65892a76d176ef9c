//! The byte-source abstraction backing the loading pipeline.

use crate::{Result, error::io_error};

/// A source of extension image bytes for one load operation.
///
/// The caller owns the source for the duration of one load call; the
/// source owns no extension state. `finalize` is invoked exactly once,
/// on every exit path, as the last action of a load.
///
/// The `'data` lifetime is that of the backing storage, not of the source
/// adapter itself: [`peek`](ExtensionLoader::peek) hands out borrows that
/// survive until the storage goes away, which lets the loader keep
/// zero-copy views alive inside the finished extension.
pub trait ExtensionLoader<'data> {
    /// Performs backend-specific setup, e.g. opening a file.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fills `buf` completely from the current position, or fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Repositions the read cursor to `pos`.
    fn seek(&mut self, pos: usize) -> Result<()>;

    /// Borrows `len` bytes at `pos` directly from the backing storage.
    ///
    /// Memory-resident backends return a slice that outlives the load;
    /// streaming backends return `None` and callers must fall back to
    /// [`read`](ExtensionLoader::read).
    fn peek(&mut self, pos: usize, len: usize) -> Option<&'data [u8]> {
        let _ = (pos, len);
        None
    }

    /// Tears the backend down.
    fn finalize(&mut self) {}
}

/// An extension image that is already resident in memory, e.g. baked into
/// the firmware image or staged in RAM by a transport.
///
/// Supports the zero-copy `peek` fast path.
#[derive(Debug)]
pub struct ElfBinary<'data> {
    bytes: &'data [u8],
    pos: usize,
}

impl<'data> ElfBinary<'data> {
    /// Creates a new memory-based extension source.
    pub fn new(bytes: &'data [u8]) -> Self {
        Self { bytes, pos: 0 }
    }
}

impl<'data> ExtensionLoader<'data> for ElfBinary<'data> {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self
            .pos
            .checked_add(buf.len())
            .ok_or_else(|| io_error("read past end of image"))?;
        let src = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| io_error("read past end of image"))?;
        buf.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(io_error("seek past end of image"));
        }
        self.pos = pos;
        Ok(())
    }

    fn peek(&mut self, pos: usize, len: usize) -> Option<&'data [u8]> {
        self.bytes.get(pos..pos.checked_add(len)?)
    }
}
