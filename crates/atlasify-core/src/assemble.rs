//! Atlas assembly: composite the packed sprites into one image and build the
//! metadata document describing every frame.

use image::RgbaImage;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::animation::infer_animations;
use crate::config::MetadataStyle;
use crate::error::Result;
use crate::model::{AtlasBuildResult, AtlasDocument, AtlasMeta, FrameEntry, OrderedMap, Rect, Size};
use crate::natural::natural_cmp;
use crate::pixels::{Layer, PixelService};
use crate::preprocess::BuildContext;

/// Offsets of the edge-replicated copies drawn under an extruded sprite:
/// diagonals first, then the orthogonal neighbours.
pub const EXTRUDE_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
    (1, 0),
    (-1, 0),
    (0, -1),
    (0, 1),
];

pub const APP_NAME: &str = "atlasify";

/// Draw list for the canonical sprites of `result`, in placement order.
///
/// `pixels` maps sprite ids to their processed buffers; duplicates have no
/// entry and are never drawn.
pub fn build_layers(result: &AtlasBuildResult, pixels: &HashMap<String, Arc<RgbaImage>>) -> Vec<Layer> {
    let mut layers = Vec::new();
    for sprite in result.placed_sprites.iter().filter(|s| !s.is_duplicate()) {
        let Some(buffer) = pixels.get(&sprite.id) else {
            continue;
        };
        let left = sprite.frame_rect.x as i64;
        let top = sprite.frame_rect.y as i64;
        let e = sprite.extrude as i64;
        if e > 0 {
            for (dx, dy) in EXTRUDE_OFFSETS {
                layers.push(Layer {
                    buffer: Arc::clone(buffer),
                    left: left + dx * e,
                    top: top + dy * e,
                    rotated: sprite.rotated,
                });
            }
        }
        layers.push(Layer {
            buffer: Arc::clone(buffer),
            left,
            top,
            rotated: sprite.rotated,
        });
    }
    layers
}

/// Composites the atlas image.
#[instrument(skip_all, fields(w = result.width, h = result.height))]
pub fn compose_atlas(
    service: &dyn PixelService,
    result: &AtlasBuildResult,
    pixels: &HashMap<String, Arc<RgbaImage>>,
) -> RgbaImage {
    let layers = build_layers(result, pixels);
    debug!(layers = layers.len(), "compositing");
    service.composite_onto(result.width, result.height, &layers)
}

/// Frame key of a sprite id, optionally without its extension.
pub fn frame_key(id: &str, keep_extension: bool) -> String {
    if keep_extension {
        return id.to_string();
    }
    let segment_start = id.rfind('/').map_or(0, |i| i + 1);
    match id[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => id[..segment_start + dot].to_string(),
        _ => id.to_string(),
    }
}

/// Builds the metadata document for one atlas × scale.
pub fn build_document(ctx: &BuildContext<'_>, result: &AtlasBuildResult, image_name: &str) -> AtlasDocument {
    let cfg = ctx.config;
    let mut sprites: Vec<_> = result.placed_sprites.iter().collect();
    sprites.sort_by(|a, b| natural_cmp(&a.id, &b.id));

    let frames: Vec<(String, FrameEntry)> = sprites
        .into_iter()
        .map(|s| {
            let entry = FrameEntry {
                frame: s.frame_rect,
                sprite_source_size: Rect::new(
                    s.sprite_rect.x,
                    s.sprite_rect.y,
                    s.frame_rect.w,
                    s.frame_rect.h,
                ),
                source_size: Size {
                    w: s.sprite_rect.w,
                    h: s.sprite_rect.h,
                },
                trimmed: s.trimmed,
                rotated: s.rotated,
            };
            (frame_key(&s.id, cfg.sprite_extensions), entry)
        })
        .collect();

    let animations = if cfg.animations {
        let keys: Vec<&str> = frames.iter().map(|(k, _)| k.as_str()).collect();
        Some(infer_animations(&keys)).filter(|a| !a.is_empty())
    } else {
        None
    };

    AtlasDocument {
        frames: OrderedMap(frames),
        animations,
        meta: AtlasMeta {
            app: APP_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            image: image_name.into(),
            format: "RGBA8888".into(),
            size: Size {
                w: result.width,
                h: result.height,
            },
            scale: ctx.scale,
        },
    }
}

/// Serializes `doc` in the requested layout. Both layouts end with a newline.
pub fn to_json(doc: &AtlasDocument, style: MetadataStyle) -> Result<String> {
    match style {
        MetadataStyle::Pretty => {
            let mut text = serde_json::to_string_pretty(doc)?;
            text.push('\n');
            Ok(text)
        }
        MetadataStyle::Legacy => to_legacy_json(doc),
    }
}

/// Tab-indented layout with every frame field on its own compact line.
fn to_legacy_json(doc: &AtlasDocument) -> Result<String> {
    let mut out = String::from("{\"frames\":{\n");
    for (i, (key, f)) in doc.frames.0.iter().enumerate() {
        let sep = if i + 1 < doc.frames.len() { "," } else { "" };
        let _ = write!(
            out,
            "\t{}:{{\n\t\t\"frame\":{},\n\t\t\"spriteSourceSize\":{},\n\t\t\"sourceSize\":{},\n\t\t\"trimmed\":{},\n\t\t\"rotated\":{}\n\t}}{sep}\n",
            serde_json::to_string(key)?,
            serde_json::to_string(&f.frame)?,
            serde_json::to_string(&f.sprite_source_size)?,
            serde_json::to_string(&f.source_size)?,
            f.trimmed,
            f.rotated,
        );
    }
    out.push_str("},\n");
    if let Some(anims) = &doc.animations {
        out.push_str("\"animations\":{\n");
        for (i, (name, ids)) in anims.0.iter().enumerate() {
            let sep = if i + 1 < anims.len() { "," } else { "" };
            let _ = writeln!(
                out,
                "\t{}:{}{sep}",
                serde_json::to_string(name)?,
                serde_json::to_string(ids)?
            );
        }
        out.push_str("},\n");
    }
    let m = &doc.meta;
    let _ = write!(
        out,
        "\"meta\":{{\n\t\"app\":{},\n\t\"version\":{},\n\t\"image\":{},\n\t\"format\":{},\n\t\"size\":{},\n\t\"scale\":{}\n}}\n}}\n",
        serde_json::to_string(&m.app)?,
        serde_json::to_string(&m.version)?,
        serde_json::to_string(&m.image)?,
        serde_json::to_string(&m.format)?,
        serde_json::to_string(&m.size)?,
        serde_json::to_string(&m.scale)?,
    );
    Ok(out)
}
