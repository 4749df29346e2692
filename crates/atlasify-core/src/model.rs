use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Axis-aligned rectangle (pixels). `x,y` is top-left; `w,h` are sizes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
    /// Inclusive right edge coordinate (`x + w - 1`).
    pub fn right(&self) -> u32 {
        self.x + self.w.saturating_sub(1)
    }
    /// Inclusive bottom edge coordinate (`y + h - 1`).
    pub fn bottom(&self) -> u32 {
        self.y + self.h.saturating_sub(1)
    }
    /// Returns true if `r` is fully inside `self` (inclusive edges).
    pub fn contains(&self, r: &Rect) -> bool {
        r.x >= self.x && r.y >= self.y && r.right() <= self.right() && r.bottom() <= self.bottom()
    }
    /// Returns true if the two rectangles share at least one pixel.
    pub fn intersects(&self, r: &Rect) -> bool {
        !(self.x >= r.x + r.w || r.x >= self.x + self.w || self.y >= r.y + r.h || r.y >= self.y + self.h)
    }
}

/// Width/height pair as written in atlas metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

/// One sprite of an atlas build.
///
/// `frame_rect` holds the trimmed size and, once packed, the position of the
/// sprite's pixels inside the atlas. `sprite_rect` holds the trim offset into
/// the (scaled) source image and that image's full size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteRecord {
    /// Path of the sprite relative to its atlas folder, `/`-separated.
    pub id: String,
    pub frame_rect: Rect,
    pub sprite_rect: Rect,
    pub trimmed: bool,
    /// True if the sprite is stored rotated 90° clockwise in the atlas.
    pub rotated: bool,
    /// Extra pixels reserved on every side (0 or 1).
    pub extrude: u32,
    /// Hex hash of the processed (scaled + trimmed) pixels.
    pub content_hash: String,
    /// Id of the canonical sprite with identical content and the same
    /// `extrude`, if any. Equal pixels with a different `extrude` stay canonical.
    pub duplicate_of: Option<String>,
}

impl SpriteRecord {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// Size of the rectangle submitted to the packer (unrotated).
    pub fn packed_size(&self) -> (u32, u32) {
        (
            self.frame_rect.w + 2 * self.extrude,
            self.frame_rect.h + 2 * self.extrude,
        )
    }
}

/// Output of the packing step: atlas size plus every sprite (duplicates
/// included) with its final position.
#[derive(Debug, Clone)]
pub struct AtlasBuildResult {
    pub width: u32,
    pub height: u32,
    pub placed_sprites: Vec<SpriteRecord>,
}

/// Statistics about a packed atlas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PackStats {
    /// Total number of sprites (duplicates included).
    pub num_sprites: usize,
    /// Sprites that reuse another sprite's pixels.
    pub num_duplicates: usize,
    pub num_rotated: usize,
    pub num_trimmed: usize,
    /// Atlas area in pixels.
    pub atlas_area: u64,
    /// Area covered by canonical sprites (extrusion included).
    pub used_area: u64,
    /// used_area / atlas_area (0.0 to 1.0).
    pub occupancy: f64,
}

impl AtlasBuildResult {
    /// Computes packing statistics for this atlas.
    pub fn stats(&self) -> PackStats {
        let mut num_duplicates = 0;
        let mut num_rotated = 0;
        let mut num_trimmed = 0;
        let mut used_area = 0u64;
        for s in &self.placed_sprites {
            if s.rotated {
                num_rotated += 1;
            }
            if s.trimmed {
                num_trimmed += 1;
            }
            if s.is_duplicate() {
                num_duplicates += 1;
                continue;
            }
            let (w, h) = s.packed_size();
            used_area += (w as u64) * (h as u64);
        }
        let atlas_area = (self.width as u64) * (self.height as u64);
        let occupancy = if atlas_area > 0 {
            used_area as f64 / atlas_area as f64
        } else {
            0.0
        };
        PackStats {
            num_sprites: self.placed_sprites.len(),
            num_duplicates,
            num_rotated,
            num_trimmed,
            atlas_area,
            used_area,
            occupancy,
        }
    }
}

impl PackStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Sprites: {} ({} duplicates), Occupancy: {:.2}%, Atlas Area: {} px², Used Area: {} px², Rotated: {}, Trimmed: {}",
            self.num_sprites,
            self.num_duplicates,
            self.occupancy * 100.0,
            self.atlas_area,
            self.used_area,
            self.num_rotated,
            self.num_trimmed,
        )
    }
}

/// Map that serializes its entries in insertion order.
///
/// Used wherever key order is part of the output contract (frames, animations,
/// the persisted hash file).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Per-sprite entry of the atlas metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameEntry {
    pub frame: Rect,
    pub sprite_source_size: Rect,
    pub source_size: Size,
    pub trimmed: bool,
    pub rotated: bool,
}

/// `meta` block of the atlas metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AtlasMeta {
    pub app: String,
    pub version: String,
    pub image: String,
    pub format: String,
    pub size: Size,
    pub scale: f64,
}

/// Atlas metadata document (TexturePacker "JSON hash" shape).
#[derive(Debug, Clone, Serialize)]
pub struct AtlasDocument {
    pub frames: OrderedMap<FrameEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animations: Option<OrderedMap<Vec<String>>>,
    pub meta: AtlasMeta,
}
