//! Sprite preprocessing: scale, trim, hash and dedup every sprite of one
//! atlas at one scale.

use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};
use xxhash_rust::xxh3::Xxh3;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::AtlasConfig;
use crate::error::{AtlasError, Result};
use crate::model::{Rect, SpriteRecord};
use crate::pixels::PixelService;

/// Everything a component needs to know about the atlas × scale being built.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Atlas folder name; also the key prefix in the hash map.
    pub atlas: &'a str,
    pub atlas_dir: &'a Path,
    pub config: &'a AtlasConfig,
    pub scale: f64,
}

/// One sprite file of an atlas folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteSource {
    /// Path relative to the atlas folder, `/`-separated.
    pub id: String,
    pub path: PathBuf,
}

/// A preprocessed sprite. Duplicates carry no pixels.
#[derive(Debug, Clone)]
pub struct PreparedSprite {
    pub record: SpriteRecord,
    pub pixels: Option<Arc<RgbaImage>>,
}

/// Bounded pool the preprocessing and hashing work runs on.
pub struct WorkerPool {
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// `workers == 0` uses the rayon default (one thread per core).
    pub fn new(workers: usize) -> Result<Self> {
        #[cfg(feature = "parallel")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("atlasify-worker-{i}"))
                .build()
                .map_err(|e| AtlasError::Config(format!("cannot start worker pool: {e}")))?;
            Ok(Self { pool })
        }
        #[cfg(not(feature = "parallel"))]
        {
            let _ = workers;
            Ok(Self {})
        }
    }

    /// Runs `f` with this pool as the ambient rayon pool.
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        #[cfg(feature = "parallel")]
        {
            self.pool.install(f)
        }
        #[cfg(not(feature = "parallel"))]
        {
            f()
        }
    }

    /// Runs two independent tasks, concurrently when possible.
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        #[cfg(feature = "parallel")]
        {
            self.pool.join(a, b)
        }
        #[cfg(not(feature = "parallel"))]
        {
            (a(), b())
        }
    }
}

/// Scaled dimensions. Rounds up so no sprite collapses to zero.
pub fn scaled_size(width: u32, height: u32, scale: f64) -> (u32, u32) {
    if scale == 1.0 {
        return (width, height);
    }
    let w = (width as f64 * scale).ceil().max(1.0) as u32;
    let h = (height as f64 * scale).ceil().max(1.0) as u32;
    (w, h)
}

/// Hex xxh3-128 over the dimensions and RGBA bytes of `buffer`.
pub fn content_hash(buffer: &RgbaImage) -> String {
    let (w, h) = buffer.dimensions();
    let mut hasher = Xxh3::new();
    hasher.update(&w.to_le_bytes());
    hasher.update(&h.to_le_bytes());
    hasher.update(buffer.as_raw());
    format!("{:032x}", hasher.digest128())
}

/// Decodes, scales and trims one sprite.
pub fn preprocess_sprite(
    ctx: &BuildContext<'_>,
    pixels: &dyn PixelService,
    source: &SpriteSource,
) -> Result<PreparedSprite> {
    let decoded = pixels.decode(&source.path)?;
    let (ow, oh) = decoded.dimensions();
    let (sw, sh) = scaled_size(ow, oh, ctx.scale);
    let scaled = if (sw, sh) != (ow, oh) {
        pixels.resize(&decoded, sw, sh)
    } else {
        decoded
    };

    let (buffer, offset_x, offset_y, tw, th) = if ctx.config.allow_trim {
        let t = pixels.trim(&scaled, ctx.config.alpha_threshold);
        (t.buffer, t.offset_x, t.offset_y, t.width, t.height)
    } else {
        (scaled, 0, 0, sw, sh)
    };

    let record = SpriteRecord {
        id: source.id.clone(),
        frame_rect: Rect::new(0, 0, tw, th),
        sprite_rect: Rect::new(offset_x, offset_y, sw, sh),
        trimmed: (tw, th) != (sw, sh),
        rotated: false,
        extrude: ctx.config.extrude.extrude_for(&source.id),
        content_hash: content_hash(&buffer),
        duplicate_of: None,
    };
    debug!(
        sprite = %record.id,
        size = ?(sw, sh),
        trim = ?(offset_x, offset_y, tw, th),
        "sprite prepared"
    );
    Ok(PreparedSprite {
        record,
        pixels: Some(Arc::new(buffer)),
    })
}

/// Links every sprite whose content (and extrusion) matches an earlier one
/// to that earlier sprite and drops its pixels.
pub fn mark_duplicates(sprites: &mut [PreparedSprite]) {
    let mut canonical: HashMap<(String, u32), String> = HashMap::new();
    for s in sprites.iter_mut() {
        let key = (s.record.content_hash.clone(), s.record.extrude);
        match canonical.get(&key) {
            Some(owner) => {
                s.record.duplicate_of = Some(owner.clone());
                s.pixels = None;
            }
            None => {
                canonical.insert(key, s.record.id.clone());
            }
        }
    }
}

/// Preprocesses `sources` on `pool` and deduplicates the result.
///
/// Output order equals input order; the first sprite that fails to load
/// aborts the whole atlas.
#[instrument(skip_all, fields(atlas = ctx.atlas, scale = ctx.scale))]
pub fn preprocess_sprites(
    ctx: &BuildContext<'_>,
    pixels: &dyn PixelService,
    pool: &WorkerPool,
    sources: &[SpriteSource],
) -> Result<Vec<PreparedSprite>> {
    let results: Vec<Result<PreparedSprite>> = pool.install(|| {
        #[cfg(feature = "parallel")]
        {
            sources
                .par_iter()
                .map(|s| preprocess_sprite(ctx, pixels, s))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            sources
                .iter()
                .map(|s| preprocess_sprite(ctx, pixels, s))
                .collect()
        }
    });
    let mut sprites = results.into_iter().collect::<Result<Vec<_>>>()?;
    mark_duplicates(&mut sprites);
    debug!(
        sprites = sprites.len(),
        duplicates = sprites.iter().filter(|s| s.record.is_duplicate()).count(),
        "preprocessing done"
    );
    Ok(sprites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtrudeMode;
    use crate::pixels::ImageService;
    use image::Rgba;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "atlasify_pre_{name}_{}_{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn save(dir: &Path, name: &str, img: &RgbaImage) -> SpriteSource {
        let path = dir.join(name);
        img.save(&path).unwrap();
        SpriteSource {
            id: name.to_string(),
            path,
        }
    }

    #[test]
    fn scaled_size_rounds_up() {
        assert_eq!(scaled_size(3, 3, 0.5), (2, 2));
        assert_eq!(scaled_size(1, 1, 0.01), (1, 1));
        assert_eq!(scaled_size(10, 7, 1.0), (10, 7));
        assert_eq!(scaled_size(10, 7, 2.0), (20, 14));
    }

    #[test]
    fn trimmed_record_keeps_source_geometry() {
        let dir = temp_dir("trim");
        let mut img = RgbaImage::new(10, 10);
        for y in 2..6 {
            for x in 3..8 {
                img.put_pixel(x, y, Rgba([200, 0, 0, 255]));
            }
        }
        let src = save(&dir, "a.png", &img);
        let cfg = AtlasConfig::default();
        let ctx = BuildContext {
            atlas: "t",
            atlas_dir: &dir,
            config: &cfg,
            scale: 1.0,
        };
        let p = preprocess_sprite(&ctx, &ImageService, &src).unwrap();
        assert!(p.record.trimmed);
        assert_eq!(p.record.frame_rect, Rect::new(0, 0, 5, 4));
        assert_eq!(p.record.sprite_rect, Rect::new(3, 2, 10, 10));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicates_link_to_first_occurrence() {
        let dir = temp_dir("dup");
        let img = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let other = RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255]));
        let sources = vec![
            save(&dir, "a.png", &img),
            save(&dir, "b.png", &other),
            save(&dir, "c.png", &img),
        ];
        let cfg = AtlasConfig {
            extrude: ExtrudeMode::All,
            ..AtlasConfig::default()
        };
        let ctx = BuildContext {
            atlas: "t",
            atlas_dir: &dir,
            config: &cfg,
            scale: 1.0,
        };
        let pool = WorkerPool::new(2).unwrap();
        let out = preprocess_sprites(&ctx, &ImageService, &pool, &sources).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].record.duplicate_of, None);
        assert_eq!(out[1].record.duplicate_of, None);
        assert_eq!(out[2].record.duplicate_of.as_deref(), Some("a.png"));
        assert!(out[2].pixels.is_none());
        assert_eq!(out[0].record.packed_size(), (10, 10));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn extrusion_splits_equal_content() {
        let dir = temp_dir("dup_extrude");
        let img = RgbaImage::from_pixel(4, 4, Rgba([5, 6, 7, 255]));
        let sources = vec![
            save(&dir, "a.png", &img),
            save(&dir, "b.png", &img),
            save(&dir, "c.png", &img),
        ];
        let cfg = AtlasConfig {
            extrude: ExtrudeMode::OnlyIds(["b.png".to_string(), "c.png".to_string()].into()),
            ..AtlasConfig::default()
        };
        let ctx = BuildContext {
            atlas: "t",
            atlas_dir: &dir,
            config: &cfg,
            scale: 1.0,
        };
        let pool = WorkerPool::new(1).unwrap();
        let out = preprocess_sprites(&ctx, &ImageService, &pool, &sources).unwrap();
        assert_eq!(out[0].record.content_hash, out[1].record.content_hash);
        assert_eq!(out[1].record.duplicate_of, None);
        assert_eq!(out[2].record.duplicate_of.as_deref(), Some("b.png"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_sprite_is_a_read_error() {
        let dir = temp_dir("bad");
        let path = dir.join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        let cfg = AtlasConfig::default();
        let ctx = BuildContext {
            atlas: "t",
            atlas_dir: &dir,
            config: &cfg,
            scale: 1.0,
        };
        let src = SpriteSource {
            id: "broken.png".into(),
            path,
        };
        let pool = WorkerPool::new(1).unwrap();
        let err = preprocess_sprites(&ctx, &ImageService, &pool, &[src]).unwrap_err();
        assert!(matches!(err, AtlasError::SpriteRead { .. }));
        let _ = fs::remove_dir_all(&dir);
    }
}
