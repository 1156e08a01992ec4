//! Message shapes exchanged with the canvas server.
//!
//! The binary framing lives in [`wire`]; this module only defines what a
//! decoded frame looks like and the errors the codec (and the grid store, which
//! shares the same taxonomy) can report.

use serde::{Deserialize, Serialize};

pub mod wire;

pub use wire::{
    WireConfig, coord_width, decode_server_message, encode_draw_request, encode_server_message,
    pack_nibbles, unpack_nibbles,
};

pub const TAG_STATE: u8 = 2;
pub const TAG_PIXEL_UPDATE: u8 = 4;
pub const TAG_CONNECTED_CLIENTS: u8 = 8;
pub const TAG_ERROR: u8 = 16;

/// Upper bound on palette size: a cell is a single nibble on the wire.
pub const MAX_PALETTE_SIZE: usize = 16;

/// Largest grid edge the client accepts; keeps `size²` addressable and every
/// coordinate within two wire bytes.
pub const MAX_GRID_SIZE: usize = u16::MAX as usize;

/// Longest server error reason we keep around.
pub const MAX_ERROR_REASON_LEN: usize = 256;

/// One byte per cell, row-major, `size * size` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBuffer {
    size: usize,
    cells: Vec<u8>,
}

impl GridBuffer {
    /// A grid filled with color index 0. Callers bound `size` by
    /// [`MAX_GRID_SIZE`].
    pub fn blank(size: usize) -> Self {
        Self {
            size,
            cells: vec![0; size.saturating_mul(size)],
        }
    }

    /// Wraps an unpacked cell vector. Returns `MalformedSnapshot` when the
    /// length is not `size * size`.
    pub fn from_cells(size: usize, cells: Vec<u8>) -> Result<Self, ProtocolError> {
        let expected = size.saturating_mul(size);
        if size.checked_mul(size) != Some(cells.len()) {
            return Err(ProtocolError::MalformedSnapshot {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self { size, cells })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    #[inline]
    pub fn index_of(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.size && y < self.size).then(|| y * self.size + x)
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        self.index_of(x, y).map(|idx| self.cells[idx])
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [u8] {
        &mut self.cells
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelUpdate {
    pub x: u32,
    pub y: u32,
    pub color: u8,
    /// Server timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// A user-initiated cell change travelling towards the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRequest {
    pub x: u32,
    pub y: u32,
    pub color: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    State(GridBuffer),
    PixelUpdate(PixelUpdate),
    ConnectedClients(u32),
    Error(String),
}

impl ServerMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ServerMessage::State(_) => TAG_STATE,
            ServerMessage::PixelUpdate(_) => TAG_PIXEL_UPDATE,
            ServerMessage::ConnectedClients(_) => TAG_CONNECTED_CLIENTS,
            ServerMessage::Error(_) => TAG_ERROR,
        }
    }
}

/// Problems with a single frame or cell write. Always recoverable: the frame is
/// dropped and the connection keeps going.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unrecognized message type: {0}")]
    UnrecognizedMessageType(u8),
    #[error("malformed snapshot: expected {expected} bytes, got {actual}")]
    MalformedSnapshot { expected: usize, actual: usize },
    #[error("truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("color index {index} outside palette of {palette_size}")]
    InvalidColorIndex { index: u8, palette_size: usize },
    #[error("cell ({x}, {y}) outside {size}x{size} grid")]
    CellOutOfBounds { x: u32, y: u32, size: usize },
}
