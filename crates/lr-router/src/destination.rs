//! Outputs a routed body can be written to.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

/// A writer that can receive a routed response body.
///
/// Destinations are compared by the caller, not the router, so they are
/// usually cheap handles (`Clone`) onto shared output. Writes happen while
/// the router holds its lock: implementations must not block.
pub trait Destination: Clone + Send + Sync + 'static {
    /// Write a chunk of body bytes.
    fn write(&self, data: &[u8]) -> io::Result<()>;
}

/// In-memory destination collecting the whole body.
#[derive(Clone, Debug, Default)]
pub struct BufferDestination {
    buffer: Arc<Mutex<BytesMut>>,
}

impl BufferDestination {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected bytes, leaving the buffer empty.
    pub fn take(&self) -> Bytes {
        std::mem::take(&mut *self.lock()).freeze()
    }

    /// Number of collected bytes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Destination for BufferDestination {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.lock().extend_from_slice(data);
        Ok(())
    }
}
