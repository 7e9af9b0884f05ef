//! # Item-Type Converter
//!
//! Pure conversion of one source packet into its derived item-type arrays.
//! `raw` is the frame-sliced packet itself; the three projection types take
//! the element-wise maximum along one packet axis over the same frame slice.
//! All outputs are cast to the requested dtype.
//!
//! Conversion is deterministic and side-effect free; an empty frame slice is
//! valid and yields empty arrays.

use std::collections::BTreeMap;

use crate::array::{ArrayError, ArrayValue, Dtype};
use crate::schema::{ItemType, ItemTypeSet};

/// Errors from packet conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The input is not a 3-axis packet.
    #[error("packet must have 3 axes, got shape {shape:?}")]
    NotAPacket {
        /// The offending input shape.
        shape: Vec<usize>,
    },

    /// No item type was requested.
    #[error("no item types requested")]
    EmptyTypeSet,

    /// The requested frame range does not fit the packet.
    #[error("frame range {start}..{end} out of bounds for {frames} frames")]
    FrameRange {
        /// Range start (inclusive).
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Number of frames in the packet.
        frames: usize,
    },

    /// An underlying array operation failed.
    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// Convert one packet into arrays for every requested item type.
///
/// `start`/`end` select a sub-range of frames (the first packet axis);
/// `end = None` means "through the last frame". The same slice feeds both
/// the `raw` output and the projections.
pub fn convert_packet(
    packet: &ArrayValue,
    types: &ItemTypeSet,
    start: usize,
    end: Option<usize>,
    dtype: Dtype,
) -> Result<BTreeMap<ItemType, ArrayValue>, ConvertError> {
    if packet.ndim() != 3 {
        return Err(ConvertError::NotAPacket {
            shape: packet.shape().to_vec(),
        });
    }
    if types.is_empty() {
        return Err(ConvertError::EmptyTypeSet);
    }

    let frames = packet.shape()[0];
    let end = end.unwrap_or(frames);
    if start > end || end > frames {
        return Err(ConvertError::FrameRange { start, end, frames });
    }

    let sliced = packet.slice_items(start, end)?;

    let mut items = BTreeMap::new();
    for item_type in types.iter() {
        let value = match item_type.projection_axis() {
            None => sliced.cast(dtype),
            Some(axis) => sliced.max_axis(axis)?.cast(dtype),
        };
        items.insert(item_type, value);
    }
    Ok(items)
}
