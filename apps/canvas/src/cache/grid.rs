use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::protocol::{GridBuffer, ProtocolError, ServerMessage};
use crate::session::{ConnectionEvent, ConnectionObserver};

/// Copy-on-write grid of palette indices.
///
/// Snapshots swap the shared buffer wholesale. Pixel updates go through
/// [`Arc::make_mut`], so the buffer is only cloned while some reader still holds
/// the previous frame.
#[derive(Debug)]
pub struct GridStore {
    size: usize,
    palette_size: usize,
    current: RwLock<Arc<GridBuffer>>,
    version: AtomicU64,
}

impl GridStore {
    pub fn new(size: usize, palette_size: usize) -> Self {
        Self {
            size,
            palette_size,
            current: RwLock::new(Arc::new(GridBuffer::blank(size))),
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn palette_size(&self) -> usize {
        self.palette_size
    }

    /// Bumped once per applied mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current frame; stays valid and unchanged for as long as the caller holds it.
    pub fn buffer(&self) -> Arc<GridBuffer> {
        Arc::clone(&self.current.read())
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<u8> {
        self.current.read().get(x, y)
    }

    pub fn apply_snapshot(&self, snapshot: GridBuffer) -> Result<(), ProtocolError> {
        if snapshot.size() != self.size {
            return Err(ProtocolError::MalformedSnapshot {
                expected: self.size.saturating_mul(self.size),
                actual: snapshot.cells().len(),
            });
        }
        if let Some(&index) = snapshot
            .cells()
            .iter()
            .find(|&&cell| cell as usize >= self.palette_size)
        {
            return Err(ProtocolError::InvalidColorIndex {
                index,
                palette_size: self.palette_size,
            });
        }
        *self.current.write() = Arc::new(snapshot);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Bounds are checked before the palette, so an out-of-range cell always
    /// reports [`ProtocolError::CellOutOfBounds`].
    pub fn apply_pixel_update(&self, x: u32, y: u32, color: u8) -> Result<(), ProtocolError> {
        let mut guard = self.current.write();
        let Some(index) = guard.index_of(x as usize, y as usize) else {
            return Err(ProtocolError::CellOutOfBounds {
                x,
                y,
                size: self.size,
            });
        };
        if color as usize >= self.palette_size {
            return Err(ProtocolError::InvalidColorIndex {
                index: color,
                palette_size: self.palette_size,
            });
        }
        Arc::make_mut(&mut *guard).cells_mut()[index] = color;
        drop(guard);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl ConnectionObserver for GridStore {
    fn on_event(&self, event: &ConnectionEvent) {
        let ConnectionEvent::Message(message) = event else {
            return;
        };
        let result = match message {
            ServerMessage::State(snapshot) => {
                debug!(size = snapshot.size(), "applying snapshot");
                self.apply_snapshot(snapshot.clone())
            }
            ServerMessage::PixelUpdate(update) => {
                self.apply_pixel_update(update.x, update.y, update.color)
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "rejected grid update");
        }
    }
}
