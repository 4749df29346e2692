//! Packer adapter: turns canonical sprites into a packing request and maps
//! the placements back onto every sprite record.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::error::{AtlasError, Result};
use crate::model::{AtlasBuildResult, SpriteRecord};
use crate::natural::natural_cmp;
use crate::packer::{PackItem, PackOptions, RectPacker};
use crate::preprocess::BuildContext;

/// Submission order: longest side, shortest side, height, width (all
/// descending), then id.
pub fn submission_order(a: &PackItem, b: &PackItem) -> Ordering {
    let key = |i: &PackItem| (i.width.max(i.height), i.width.min(i.height), i.height, i.width);
    key(b)
        .cmp(&key(a))
        .then_with(|| natural_cmp(&a.id, &b.id))
}

/// Packing request for the canonical sprites of `records`.
pub fn pack_items(records: &[SpriteRecord]) -> Vec<PackItem> {
    let mut items: Vec<PackItem> = records
        .iter()
        .filter(|r| !r.is_duplicate())
        .map(|r| {
            let (w, h) = r.packed_size();
            PackItem::new(r.id.clone(), w, h)
        })
        .collect();
    items.sort_by(submission_order);
    items
}

/// Places `records` into one bin of at most `maxWidth x maxHeight`.
///
/// Fails with [`AtlasError::Oversize`] when the packer needs more than one
/// bin. Duplicates receive the position and rotation of their canonical
/// sprite.
#[instrument(skip_all, fields(atlas = ctx.atlas, scale = ctx.scale))]
pub fn pack_sprites(
    ctx: &BuildContext<'_>,
    packer: &dyn RectPacker,
    mut records: Vec<SpriteRecord>,
) -> Result<AtlasBuildResult> {
    let cfg = ctx.config;
    let items = pack_items(&records);
    let options = PackOptions {
        smart: true,
        pot: cfg.pot,
        square: cfg.square,
        allow_rotation: cfg.allow_rotation,
        border: cfg.border,
    };
    let result = packer.pack(cfg.max_width, cfg.max_height, cfg.extra_space, &options, &items);
    if !result.fits_single_bin() {
        return Err(AtlasError::Oversize {
            atlas: ctx.atlas.to_string(),
            width: cfg.max_width,
            height: cfg.max_height,
            bins: result.bins.len(),
        });
    }
    let Some(bin) = result.bins.into_iter().next() else {
        return Ok(AtlasBuildResult {
            width: 0,
            height: 0,
            placed_sprites: records,
        });
    };

    let placements: HashMap<&str, (u32, u32, bool)> = bin
        .placements
        .iter()
        .map(|p| (p.id.as_str(), (p.x, p.y, p.rotated)))
        .collect();

    let mut canonical: HashMap<String, (u32, u32, bool)> = HashMap::new();
    for r in records.iter_mut().filter(|r| !r.is_duplicate()) {
        let Some(&(x, y, rotated)) = placements.get(r.id.as_str()) else {
            return Err(AtlasError::Oversize {
                atlas: ctx.atlas.to_string(),
                width: cfg.max_width,
                height: cfg.max_height,
                bins: 1,
            });
        };
        r.frame_rect.x = x + r.extrude;
        r.frame_rect.y = y + r.extrude;
        r.rotated = rotated;
        canonical.insert(r.id.clone(), (r.frame_rect.x, r.frame_rect.y, rotated));
    }
    for r in records.iter_mut() {
        if let Some(owner) = r.duplicate_of.as_deref() {
            if let Some(&(x, y, rotated)) = canonical.get(owner) {
                r.frame_rect.x = x;
                r.frame_rect.y = y;
                r.rotated = rotated;
            }
        }
    }

    debug!(width = bin.width, height = bin.height, placed = placements.len(), "packed");
    Ok(AtlasBuildResult {
        width: bin.width,
        height: bin.height,
        placed_sprites: records,
    })
}
