//! Canonical client-side copy of the shared canvas.
//!
//! The [`GridStore`] is written only by the connection pipeline (snapshots and
//! single-pixel updates) and read by renderers and input handling. Typical
//! usage looks like:
//!
//! ```
//! # use canvas_client_core::cache::GridStore;
//! let store = GridStore::new(4, 16);
//! store.apply_pixel_update(1, 2, 7).unwrap();
//! assert_eq!(store.cell(1, 2), Some(7));
//! let frame = store.buffer();
//! assert_eq!(frame.cells().len(), 16);
//! ```
//!
//! Design goals:
//! - Readers never block writers for longer than an `Arc` clone
//! - A buffer handed to a reader never changes underneath it
//! - Rejected writes leave the grid untouched

pub mod grid;

pub use grid::GridStore;
