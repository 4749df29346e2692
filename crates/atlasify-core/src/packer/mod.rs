//! Rectangle-packing service.
//!
//! The packer adapter hands a list of rectangles to a [`RectPacker`] and gets
//! back one or more bins. More than one bin (or an oversized bin) means the
//! set does not fit into the requested bounds.

use serde::{Deserialize, Serialize};

pub mod maxrects;

pub use maxrects::{MaxRectsBin, MaxRectsHeuristic, MaxRectsPacker};

/// A rectangle to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackItem {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

impl PackItem {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackOptions {
    /// Shrink each bin to the placed content instead of the full bounds.
    pub smart: bool,
    /// Round bin dimensions up to powers of two.
    pub pot: bool,
    /// Force square bins.
    pub square: bool,
    pub allow_rotation: bool,
    /// Pixels kept free around the bin edges.
    pub border: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            smart: true,
            pot: false,
            square: false,
            allow_rotation: false,
            border: 0,
        }
    }
}

/// Position of one item inside a bin. `rotated` items occupy `height x width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub rotated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub width: u32,
    pub height: u32,
    pub placements: Vec<Placement>,
    /// Holds a single item that is larger than the requested bounds.
    pub oversized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackResult {
    pub bins: Vec<Bin>,
}

impl PackResult {
    /// True when every item landed in one regular bin.
    pub fn fits_single_bin(&self) -> bool {
        self.bins.len() <= 1 && self.bins.iter().all(|b| !b.oversized)
    }
}

/// Contract of the rectangle-packing collaborator.
///
/// Implementations must not overlap placements (including `spacing`), must
/// keep regular bins within `bin_width x bin_height` and must be
/// deterministic for identical input.
pub trait RectPacker: Sync {
    fn pack(
        &self,
        bin_width: u32,
        bin_height: u32,
        spacing: u32,
        options: &PackOptions,
        rects: &[PackItem],
    ) -> PackResult;
}

pub(crate) fn next_pow2(mut v: u32) -> u32 {
    if v <= 1 {
        return 1;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}
