//! Incremental sprite atlas builder.
//!
//! Every direct subfolder of an input directory becomes one atlas. A run
//! hashes all sprite files, rebuilds only the atlases whose inputs changed
//! and writes, per atlas and scale, a packed image plus a TexturePacker-style
//! JSON document.
//!
//! - Preprocessing: scaling, alpha trim, 1px extrusion, content dedup
//! - Packing: MaxRects (BAF/BSSF/BLSF/BL/CP) behind the [`RectPacker`] trait
//! - Pixels: decode/resize/trim/composite/encode behind the [`PixelService`] trait
//!
//! Quick example:
//! ```ignore
//! use atlasify_core::prelude::*;
//! # fn main() -> atlasify_core::Result<()> {
//! let cfg = PipelineConfig::builder()
//!     .input_dir("assets/atlases")
//!     .output_dir("build/atlases")
//!     .scales(vec![1.0, 0.5])
//!     .build();
//! let summary = run_pipeline(&cfg, |event| println!("{event:?}"))?;
//! println!("built {} atlas(es)", summary.built);
//! # Ok(()) }
//! ```

pub mod animation;
pub mod assemble;
pub mod config;
pub mod error;
pub mod extract;
mod fs_util;
pub mod hash_store;
pub mod model;
pub mod natural;
pub mod packer;
pub mod packing;
pub mod pipeline;
pub mod pixels;
pub mod preprocess;

pub use config::*;
pub use error::*;
pub use model::*;
pub use packer::*;
pub use pipeline::*;
pub use pixels::{ImageService, PixelService};

/// Convenience prelude for common types and functions.
/// Importing `atlasify_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::config::{
        AtlasConfig, ExtrudeMode, FormatConfig, MetadataStyle, OutputFormat, PipelineConfig,
        PipelineConfigBuilder,
    };
    pub use crate::error::AtlasError;
    pub use crate::extract::extract_atlas;
    pub use crate::model::{AtlasBuildResult, AtlasDocument, PackStats, Rect, SpriteRecord};
    pub use crate::packer::{MaxRectsHeuristic, MaxRectsPacker, RectPacker};
    pub use crate::pipeline::{PipelineEvent, RunSummary, run_pipeline, run_with};
    pub use crate::pixels::{ImageService, PixelService};
}
