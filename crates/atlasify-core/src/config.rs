use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::error::{AtlasError, Result};

/// Name of the optional per-atlas override document inside an atlas folder.
pub const ATLAS_CONFIG_FILE: &str = "config.json";

/// Encoded format of the atlas image.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
    Avif,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            _ => Err(()),
        }
    }
}

/// Which sprites get a 1px edge extrusion.
///
/// Serialized as `true`/`false` or as an array of sprite ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExtrudeRepr", into = "ExtrudeRepr")]
pub enum ExtrudeMode {
    All,
    #[default]
    None,
    OnlyIds(BTreeSet<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExtrudeRepr {
    Flag(bool),
    Ids(Vec<String>),
}

impl From<ExtrudeRepr> for ExtrudeMode {
    fn from(r: ExtrudeRepr) -> Self {
        match r {
            ExtrudeRepr::Flag(true) => Self::All,
            ExtrudeRepr::Flag(false) => Self::None,
            ExtrudeRepr::Ids(ids) => Self::OnlyIds(ids.into_iter().collect()),
        }
    }
}

impl From<ExtrudeMode> for ExtrudeRepr {
    fn from(m: ExtrudeMode) -> Self {
        match m {
            ExtrudeMode::All => Self::Flag(true),
            ExtrudeMode::None => Self::Flag(false),
            ExtrudeMode::OnlyIds(ids) => Self::Ids(ids.into_iter().collect()),
        }
    }
}

impl ExtrudeMode {
    /// Extrusion margin (0 or 1) for the sprite `id`.
    pub fn extrude_for(&self, id: &str) -> u32 {
        match self {
            Self::All => 1,
            Self::None => 0,
            Self::OnlyIds(ids) => u32::from(ids.contains(id)),
        }
    }
}

/// Per-atlas build settings. Resolved once per atlas from the global
/// defaults and the folder's `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AtlasConfig {
    /// Pixels reserved between packed sprites.
    pub extra_space: u32,
    /// Pixels around the whole atlas.
    pub border: u32,
    /// Pixels with alpha <= threshold count as transparent when trimming.
    pub alpha_threshold: u8,
    /// Image format; `None` inherits the pipeline's `outputTextureFormat`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    pub extrude: ExtrudeMode,
    /// Round atlas dimensions up to powers of two.
    pub pot: bool,
    /// Force a square atlas.
    pub square: bool,
    /// Keep file extensions in frame keys.
    pub sprite_extensions: bool,
    /// Infer animation sequences from sprite names.
    pub animations: bool,
    pub allow_trim: bool,
    pub allow_rotation: bool,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            extra_space: 2,
            border: 0,
            alpha_threshold: 0,
            output_format: None,
            extrude: ExtrudeMode::None,
            pot: true,
            square: false,
            sprite_extensions: true,
            animations: false,
            allow_trim: true,
            allow_rotation: true,
            max_width: 4096,
            max_height: 4096,
        }
    }
}

impl AtlasConfig {
    /// Validates the packing bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(AtlasError::Config(format!(
                "maxWidth/maxHeight must be positive (got {}x{})",
                self.max_width, self.max_height
            )));
        }
        let total_border = self.border.saturating_mul(2);
        if total_border >= self.max_width || total_border >= self.max_height {
            return Err(AtlasError::Config(format!(
                "border ({}) * 2 exceeds atlas dimensions ({}x{})",
                self.border, self.max_width, self.max_height
            )));
        }
        Ok(())
    }

    /// Image format for this atlas, falling back to the pipeline default.
    pub fn format_or(&self, fallback: OutputFormat) -> OutputFormat {
        self.output_format.unwrap_or(fallback)
    }
}

/// Reads `<atlas_dir>/config.json` and merges it over `defaults`.
///
/// A missing, unreadable or malformed override is treated as `{}`; this
/// never fails.
pub fn resolve_atlas_config(atlas_dir: &Path, defaults: &AtlasConfig) -> AtlasConfig {
    let path = atlas_dir.join(ATLAS_CONFIG_FILE);
    if !path.is_file() {
        return defaults.clone();
    }
    let parsed = fs::read_to_string(&path)
        .map_err(AtlasError::from)
        .and_then(|s| serde_json::from_str::<Value>(&s).map_err(AtlasError::from));
    match parsed {
        Ok(Value::Object(overrides)) => merge_atlas_config(defaults, overrides),
        Ok(_) => {
            warn!(path = %path.display(), "atlas config is not an object; ignoring");
            defaults.clone()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable atlas config; ignoring");
            defaults.clone()
        }
    }
}

/// Shallow merge: every key present in `overrides` replaces the default.
pub fn merge_atlas_config(defaults: &AtlasConfig, mut overrides: Map<String, Value>) -> AtlasConfig {
    let mut base = match serde_json::to_value(defaults) {
        Ok(Value::Object(m)) => m,
        _ => return defaults.clone(),
    };
    // Older folders mark JPEG atlases with `"jpg": true`.
    if overrides.get("jpg") == Some(&Value::Bool(true)) && !overrides.contains_key("outputFormat") {
        overrides.insert("outputFormat".into(), Value::String("jpeg".into()));
    }
    for (k, v) in overrides {
        if !v.is_null() {
            base.insert(k, v);
        }
    }
    match serde_json::from_value::<AtlasConfig>(Value::Object(base)) {
        Ok(cfg) => match cfg.validate() {
            Ok(()) => cfg,
            Err(e) => {
                warn!(error = %e, "atlas config override rejected; using defaults");
                defaults.clone()
            }
        },
        Err(e) => {
            warn!(error = %e, "atlas config override malformed; using defaults");
            defaults.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PngOptions {
    pub compression: PngCompression,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JpegOptions {
    /// 1..=100
    pub quality: u8,
}

impl Default for JpegOptions {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AvifOptions {
    /// 1..=100
    pub quality: u8,
    /// 1 (slow) ..= 10 (fast)
    pub speed: u8,
}

impl Default for AvifOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            speed: 6,
        }
    }
}

/// Per-format encoder knobs. WebP output is lossless and has none.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FormatConfig {
    pub png: PngOptions,
    pub jpeg: JpegOptions,
    pub avif: AvifOptions,
}

/// Layout of the written metadata document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStyle {
    /// `serde_json` pretty printing.
    #[default]
    Pretty,
    /// Tab-indented layout with one compact line per frame field.
    Legacy,
}

/// Top-level settings of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Root folder; every direct subfolder is one atlas.
    pub input_dir: PathBuf,
    /// Where atlases are written (defaults to `input_dir`).
    pub output_dir: Option<PathBuf>,
    /// Persisted hash map (defaults to `<input_dir>/hash.json`).
    pub hash_file_path: Option<PathBuf>,
    /// Rebuild every atlas regardless of hashes.
    pub force: bool,
    pub scales: Vec<f64>,
    pub output_texture_format: OutputFormat,
    /// Append a short content hash to the image file name.
    pub append_file_hash: bool,
    /// Append the image extension to the metadata file name.
    pub append_texture_format: bool,
    pub default_atlas_config: AtlasConfig,
    pub format_config: FormatConfig,
    pub metadata_style: MetadataStyle,
    /// Preprocessing worker threads; 0 uses the rayon default.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: None,
            hash_file_path: None,
            force: false,
            scales: vec![1.0],
            output_texture_format: OutputFormat::Png,
            append_file_hash: false,
            append_texture_format: false,
            default_atlas_config: AtlasConfig::default(),
            format_config: FormatConfig::default(),
            metadata_style: MetadataStyle::Pretty,
            workers: 0,
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration. Runs before any I/O.
    ///
    /// Returns an error if:
    /// - `scales` is empty, contains a non-finite or non-positive value, or repeats a value
    /// - the default atlas bounds are invalid
    /// - an encoder quality knob is out of range
    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(AtlasError::Config("scales must not be empty".into()));
        }
        for (i, s) in self.scales.iter().enumerate() {
            if !s.is_finite() || *s <= 0.0 {
                return Err(AtlasError::Config(format!("invalid scale {s}")));
            }
            if self.scales[..i].contains(s) {
                return Err(AtlasError::Config(format!("duplicate scale {s}")));
            }
        }
        self.default_atlas_config.validate()?;
        let q = self.format_config.jpeg.quality;
        if !(1..=100).contains(&q) {
            return Err(AtlasError::Config(format!("jpeg quality {q} not in 1..=100")));
        }
        let q = self.format_config.avif.quality;
        if !(1..=100).contains(&q) {
            return Err(AtlasError::Config(format!("avif quality {q} not in 1..=100")));
        }
        let sp = self.format_config.avif.speed;
        if !(1..=10).contains(&sp) {
            return Err(AtlasError::Config(format!("avif speed {sp} not in 1..=10")));
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.input_dir.clone())
    }

    pub fn hash_file_path(&self) -> PathBuf {
        self.hash_file_path
            .clone()
            .unwrap_or_else(|| self.input_dir.join("hash.json"))
    }

    /// Create a fluent builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }
}

/// Builder for `PipelineConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct PipelineConfigBuilder {
    cfg: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: PipelineConfig::default(),
        }
    }
    pub fn input_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.cfg.input_dir = v.into();
        self
    }
    pub fn output_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.cfg.output_dir = Some(v.into());
        self
    }
    pub fn hash_file_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.cfg.hash_file_path = Some(v.into());
        self
    }
    pub fn force(mut self, v: bool) -> Self {
        self.cfg.force = v;
        self
    }
    pub fn scales(mut self, v: Vec<f64>) -> Self {
        self.cfg.scales = v;
        self
    }
    pub fn output_texture_format(mut self, v: OutputFormat) -> Self {
        self.cfg.output_texture_format = v;
        self
    }
    pub fn append_file_hash(mut self, v: bool) -> Self {
        self.cfg.append_file_hash = v;
        self
    }
    pub fn append_texture_format(mut self, v: bool) -> Self {
        self.cfg.append_texture_format = v;
        self
    }
    pub fn default_atlas_config(mut self, v: AtlasConfig) -> Self {
        self.cfg.default_atlas_config = v;
        self
    }
    pub fn format_config(mut self, v: FormatConfig) -> Self {
        self.cfg.format_config = v;
        self
    }
    pub fn metadata_style(mut self, v: MetadataStyle) -> Self {
        self.cfg.metadata_style = v;
        self
    }
    pub fn workers(mut self, v: usize) -> Self {
        self.cfg.workers = v;
        self
    }
    pub fn build(self) -> PipelineConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn override_wins_key_by_key() {
        let defaults = AtlasConfig::default();
        let cfg = merge_atlas_config(&defaults, obj(json!({"extraSpace": 0, "pot": false})));
        assert_eq!(cfg.extra_space, 0);
        assert!(!cfg.pot);
        assert_eq!(cfg.max_width, defaults.max_width);
        assert!(cfg.allow_trim);
    }

    #[test]
    fn malformed_override_falls_back_to_defaults() {
        let defaults = AtlasConfig::default();
        let cfg = merge_atlas_config(&defaults, obj(json!({"extraSpace": "wide"})));
        assert_eq!(cfg, defaults);
        let cfg = merge_atlas_config(&defaults, obj(json!({"maxWidth": 0})));
        assert_eq!(cfg, defaults);
    }

    #[test]
    fn extrude_accepts_bool_or_ids() {
        let defaults = AtlasConfig::default();
        let all = merge_atlas_config(&defaults, obj(json!({"extrude": true})));
        assert_eq!(all.extrude, ExtrudeMode::All);
        let some = merge_atlas_config(&defaults, obj(json!({"extrude": ["a.png"]})));
        assert_eq!(some.extrude.extrude_for("a.png"), 1);
        assert_eq!(some.extrude.extrude_for("b.png"), 0);
        assert_eq!(ExtrudeMode::None.extrude_for("a.png"), 0);
    }

    #[test]
    fn legacy_jpg_flag_selects_jpeg() {
        let cfg = merge_atlas_config(&AtlasConfig::default(), obj(json!({"jpg": true})));
        assert_eq!(cfg.output_format, Some(OutputFormat::Jpeg));
    }

    #[test]
    fn pipeline_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        let bad = PipelineConfig::builder().scales(vec![]).build();
        assert!(matches!(bad.validate(), Err(AtlasError::Config(_))));
        let bad = PipelineConfig::builder().scales(vec![1.0, 0.0]).build();
        assert!(bad.validate().is_err());
        let bad = PipelineConfig::builder().scales(vec![0.5, 0.5]).build();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn pipeline_defaults_from_partial_document() {
        let cfg: PipelineConfig =
            serde_json::from_value(json!({"inputDir": "assets", "scales": [1, 0.5]})).unwrap();
        assert_eq!(cfg.scales, vec![1.0, 0.5]);
        assert_eq!(cfg.output_dir(), PathBuf::from("assets"));
        assert_eq!(cfg.hash_file_path(), PathBuf::from("assets").join("hash.json"));
        assert_eq!(cfg.default_atlas_config.extra_space, 2);
    }
}
