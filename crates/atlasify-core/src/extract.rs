//! Atlas extraction: rebuild the individual sprite files from an atlas image
//! and its metadata document.

use image::{RgbaImage, imageops};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument};

use crate::config::{ATLAS_CONFIG_FILE, FormatConfig, OutputFormat};
use crate::error::{AtlasError, Result};
use crate::fs_util::write_atomic;
use crate::model::{Rect, Size};
use crate::natural::natural_cmp;
use crate::pixels::{ImageService, PixelService, blend_layer};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(default)]
    filename: Option<String>,
    frame: Rect,
    #[serde(default)]
    rotated: bool,
    #[serde(default)]
    sprite_source_size: Option<Rect>,
    #[serde(default)]
    source_size: Option<Size>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFrames {
    Hash(BTreeMap<String, RawFrame>),
    List(Vec<RawFrame>),
}

#[derive(Debug, Default, Deserialize)]
struct RawMeta {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAtlas {
    frames: RawFrames,
    #[serde(default)]
    meta: RawMeta,
}

/// A frame read back from an atlas document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub id: String,
    /// Packed rectangle, unrotated size.
    pub frame: Rect,
    pub rotated: bool,
    /// Position and size of the frame pixels inside the source image.
    pub sprite_source_size: Rect,
    pub source_size: Size,
}

/// Parsed atlas document.
#[derive(Debug, Clone)]
pub struct AtlasSource {
    /// Frames in natural id order.
    pub frames: Vec<ExtractedFrame>,
    /// Image named by `meta.image`, if any.
    pub image: Option<String>,
}

/// Parses a hash-style (`frames: {id: ...}`) or array-style
/// (`frames: [{filename, ...}]`) atlas document.
pub fn parse_atlas(text: &str) -> Result<AtlasSource> {
    let raw: RawAtlas = serde_json::from_str(text)?;
    let entries: Vec<(String, RawFrame)> = match raw.frames {
        RawFrames::Hash(map) => map.into_iter().collect(),
        RawFrames::List(list) => list
            .into_iter()
            .map(|f| match f.filename.clone() {
                Some(id) => Ok((id, f)),
                None => Err(AtlasError::InvalidAtlas("array frame without `filename`".into())),
            })
            .collect::<Result<_>>()?,
    };
    let mut frames: Vec<ExtractedFrame> = entries
        .into_iter()
        .map(|(id, f)| {
            let sss = f
                .sprite_source_size
                .unwrap_or(Rect::new(0, 0, f.frame.w, f.frame.h));
            let source_size = f.source_size.unwrap_or(Size {
                w: sss.x + f.frame.w,
                h: sss.y + f.frame.h,
            });
            ExtractedFrame {
                id,
                frame: f.frame,
                rotated: f.rotated,
                sprite_source_size: sss,
                source_size,
            }
        })
        .collect();
    frames.sort_by(|a, b| natural_cmp(&a.id, &b.id));
    Ok(AtlasSource {
        frames,
        image: raw.meta.image,
    })
}

/// Output path and encoding for a sprite id. Ids must stay inside `out_dir`.
fn output_target(out_dir: &Path, id: &str) -> Result<(PathBuf, OutputFormat)> {
    let rel = Path::new(id);
    if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(AtlasError::InvalidAtlas(format!(
            "frame id '{id}' is not a relative sprite path"
        )));
    }
    Ok(match rel
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| OutputFormat::from_str(e).ok())
    {
        Some(format) => (out_dir.join(rel), format),
        None => (out_dir.join(format!("{id}.png")), OutputFormat::Png),
    })
}

/// Cuts the pixels of `f` out of `atlas`, undoing the clockwise rotation.
fn cut_frame(atlas: &RgbaImage, f: &ExtractedFrame) -> Result<RgbaImage> {
    let (w, h) = if f.rotated {
        (f.frame.h, f.frame.w)
    } else {
        (f.frame.w, f.frame.h)
    };
    let (aw, ah) = atlas.dimensions();
    let right = f.frame.x.checked_add(w);
    let bottom = f.frame.y.checked_add(h);
    if right.is_none_or(|r| r > aw) || bottom.is_none_or(|b| b > ah) {
        return Err(AtlasError::InvalidAtlas(format!(
            "frame '{}' ({},{} {}x{}) lies outside the {aw}x{ah} image",
            f.id, f.frame.x, f.frame.y, w, h
        )));
    }
    let crop = imageops::crop_imm(atlas, f.frame.x, f.frame.y, w, h).to_image();
    Ok(if f.rotated {
        imageops::rotate270(&crop)
    } else {
        crop
    })
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|e| OutputFormat::from_str(e).ok())
        == Some(OutputFormat::Jpeg)
}

fn locate_image(metadata_path: &Path, named: Option<&str>) -> Result<PathBuf> {
    let dir = metadata_path.parent().unwrap_or(Path::new("."));
    if let Some(name) = named {
        return Ok(dir.join(name));
    }
    let stem = metadata_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ["png", "jpg", "jpeg", "webp"]
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
        .ok_or_else(|| AtlasError::InvalidAtlas(format!("no image found for {}", metadata_path.display())))
}

/// Writes every frame of the atlas described by `metadata_path` to
/// `out_dir/<id>` at its original size. Returns the written paths.
pub fn extract_atlas(metadata_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    extract_atlas_with(&ImageService, metadata_path, out_dir)
}

#[instrument(skip_all, fields(atlas = %metadata_path.display()))]
pub fn extract_atlas_with(
    pixels: &dyn PixelService,
    metadata_path: &Path,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(metadata_path)?;
    let source = parse_atlas(&text)?;
    let image_path = locate_image(metadata_path, source.image.as_deref())?;
    let atlas = pixels.decode(&image_path)?;
    let format_config = FormatConfig::default();

    let targets = source
        .frames
        .iter()
        .map(|f| output_target(out_dir, &f.id))
        .collect::<Result<Vec<_>>>()?;

    let mut cuts: HashMap<(Rect, bool), RgbaImage> = HashMap::new();
    let mut written = Vec::with_capacity(source.frames.len());
    for (f, (path, format)) in source.frames.iter().zip(targets) {
        let key = (f.frame, f.rotated);
        if !cuts.contains_key(&key) {
            cuts.insert(key, cut_frame(&atlas, f)?);
        }
        let Some(cut) = cuts.get(&key) else {
            continue;
        };
        let mut canvas = RgbaImage::new(f.source_size.w, f.source_size.h);
        blend_layer(
            cut,
            &mut canvas,
            f.sprite_source_size.x as i64,
            f.sprite_source_size.y as i64,
        );
        let bytes = pixels.encode(&canvas, format, &format_config)?;
        write_atomic(&path, &bytes)?;
        debug!(sprite = %f.id, path = %path.display(), "extracted");
        written.push(path);
    }
    if is_jpeg(&image_path) {
        let config = serde_json::to_string_pretty(&json!({"jpg": true, "extraSpace": 0}))?;
        write_atomic(&out_dir.join(ATLAS_CONFIG_FILE), config.as_bytes())?;
        debug!("wrote jpeg atlas config");
    }
    info!(sprites = written.len(), out = %out_dir.display(), "atlas extracted");
    Ok(written)
}
