//! Pipeline orchestrator: scan atlas folders, decide what needs rebuilding
//! and drive preprocess → pack → assemble for every atlas × scale.

use image::RgbaImage;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::assemble::{build_document, compose_atlas, to_json};
use crate::config::{ATLAS_CONFIG_FILE, AtlasConfig, OutputFormat, PipelineConfig, resolve_atlas_config};
use crate::error::{AtlasError, Result};
use crate::fs_util::{StagedFile, path_key};
use crate::hash_store::{
    FileHashes, HashDiff, HashStore, apply_changes, atlas_changes, hash_bytes, hash_files, should_skip,
};
use crate::model::{AtlasBuildResult, PackStats};
use crate::natural::natural_cmp;
use crate::packer::{MaxRectsPacker, RectPacker};
use crate::packing::pack_sprites;
use crate::pixels::{ImageService, PixelService};
use crate::preprocess::{BuildContext, SpriteSource, WorkerPool, preprocess_sprites};

/// File extensions (lowercase) picked up as sprites.
pub const SPRITE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// One direct subfolder of the input directory.
#[derive(Debug, Clone)]
pub struct AtlasFolder {
    pub name: String,
    pub dir: PathBuf,
    /// Sprites in natural id order.
    pub sprites: Vec<SpriteSource>,
    pub has_config: bool,
}

impl AtlasFolder {
    /// Hash-map keys of every tracked file of this folder.
    pub fn hash_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sprites
            .iter()
            .map(|s| format!("{}/{}", self.name, s.id))
            .collect();
        if self.has_config {
            keys.push(format!("{}/{ATLAS_CONFIG_FILE}", self.name));
        }
        keys
    }
}

/// Progress notifications of a pipeline run, in the order they happen.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    AtlasStarted {
        atlas: String,
        index: usize,
        total: usize,
    },
    AtlasSkipped {
        atlas: String,
        scale: f64,
    },
    /// The folder has no sprites left; its previous outputs were deleted.
    ScaleRemoved {
        atlas: String,
        scale: f64,
    },
    ScaleBuilt {
        atlas: String,
        scale: f64,
        image: PathBuf,
        metadata: PathBuf,
        stats: PackStats,
    },
    HashSaved {
        path: PathBuf,
        entries: usize,
    },
    Finished(RunSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub atlases: usize,
    /// Atlas × scale passes that produced output.
    pub built: usize,
    /// Atlas × scale passes that were up to date.
    pub skipped: usize,
    /// Atlas × scale outputs deleted because their folder emptied.
    pub removed: usize,
}

/// File names of one atlas × scale output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    /// `atlas` or `atlas@{scale}x`.
    pub base: String,
    pub extension: &'static str,
    pub metadata: String,
}

impl OutputNames {
    pub fn new(atlas: &str, scale: f64, multi_scale: bool, format: OutputFormat, append_texture_format: bool) -> Self {
        let base = if multi_scale {
            format!("{atlas}@{scale}x")
        } else {
            atlas.to_string()
        };
        let extension = format.extension();
        let metadata = if append_texture_format {
            format!("{base}.{extension}.json")
        } else {
            format!("{base}.json")
        };
        Self {
            base,
            extension,
            metadata,
        }
    }

    /// Image file name; `content_hash` is appended (8 chars) when given.
    pub fn image(&self, content_hash: Option<&str>) -> String {
        match content_hash {
            Some(h) => format!("{}-{}.{}", self.base, &h[..h.len().min(8)], self.extension),
            None => format!("{}.{}", self.base, self.extension),
        }
    }
}

/// Image file named by an existing metadata document, if it parses.
fn previous_image(metadata_path: &Path) -> Option<String> {
    let text = fs::read_to_string(metadata_path).ok()?;
    let doc: serde_json::Value = serde_json::from_str(&text).ok()?;
    doc.get("meta")?.get("image")?.as_str().map(str::to_owned)
}

/// True when the metadata exists, parses, and the image it names exists.
pub fn outputs_exist(output_dir: &Path, names: &OutputNames) -> bool {
    previous_image(&output_dir.join(&names.metadata))
        .is_some_and(|image| output_dir.join(image).is_file())
}

/// Deletes the metadata of one atlas × scale and the image it names.
/// Returns true if anything was removed.
fn remove_outputs(output_dir: &Path, names: &OutputNames) -> Result<bool> {
    let metadata = output_dir.join(&names.metadata);
    let image = previous_image(&metadata)
        .map(|name| output_dir.join(name))
        .unwrap_or_else(|| output_dir.join(names.image(None)));
    let mut removed = false;
    for path in [metadata, image] {
        if path.is_file() {
            debug!(path = %path.display(), "removing stale output");
            fs::remove_file(&path)?;
            removed = true;
        }
    }
    Ok(removed)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_sprite(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SPRITE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Lists the atlas folders of `input_dir` in natural order.
///
/// Hidden folders and `exclude` (the output directory, when it lives inside
/// the input) are ignored.
pub fn scan_atlases(input_dir: &Path, exclude: Option<&Path>) -> Result<Vec<AtlasFolder>> {
    if !input_dir.is_dir() {
        return Err(AtlasError::MissingInput(input_dir.to_path_buf()));
    }
    let exclude = exclude.and_then(|p| p.canonicalize().ok());
    let mut atlases = Vec::new();
    for entry in fs::read_dir(input_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        if is_hidden(&name) || exclude.as_deref().is_some_and(|ex| dir.canonicalize().ok().as_deref() == Some(ex)) {
            continue;
        }
        atlases.push(scan_atlas(name, dir)?);
    }
    atlases.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    Ok(atlases)
}

fn scan_atlas(name: String, dir: PathBuf) -> Result<AtlasFolder> {
    let mut sprites = Vec::new();
    let walker = WalkDir::new(&dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_sprite(path) {
            continue;
        }
        let rel = path.strip_prefix(&dir).unwrap_or(path);
        sprites.push(SpriteSource {
            id: path_key(rel),
            path: path.to_path_buf(),
        });
    }
    sprites.sort_by(|a, b| natural_cmp(&a.id, &b.id));
    let has_config = dir.join(ATLAS_CONFIG_FILE).is_file();
    Ok(AtlasFolder {
        name,
        dir,
        sprites,
        has_config,
    })
}

/// Runs the pipeline with the `image`-crate pixel service and the MaxRects
/// packer.
pub fn run_pipeline(config: &PipelineConfig, observer: impl FnMut(&PipelineEvent)) -> Result<RunSummary> {
    run_with(config, &ImageService, &MaxRectsPacker::default(), observer)
}

/// Runs the pipeline with explicit collaborators.
///
/// Atlases are visited in natural folder order and scales in declared order.
/// The first error aborts the run; the hash file keeps every atlas committed
/// before it.
#[instrument(skip_all, fields(input = %config.input_dir.display()))]
pub fn run_with(
    config: &PipelineConfig,
    pixels: &dyn PixelService,
    packer: &dyn RectPacker,
    mut observer: impl FnMut(&PipelineEvent),
) -> Result<RunSummary> {
    config.validate()?;
    let output_dir = config.output_dir();
    let atlases = scan_atlases(&config.input_dir, Some(&output_dir))?;
    let pool = WorkerPool::new(config.workers)?;

    let store = HashStore::new(config.hash_file_path());
    let mut working = store.load();
    let keys: Vec<String> = atlases.iter().flat_map(AtlasFolder::hash_keys).collect();
    let current = pool.install(|| hash_files(&config.input_dir, &keys))?;
    debug!(atlases = atlases.len(), files = current.len(), "scan complete");

    let mut summary = RunSummary {
        atlases: atlases.len(),
        ..RunSummary::default()
    };
    let runner = AtlasRunner {
        config,
        output_dir: &output_dir,
        pixels,
        packer,
        pool: &pool,
    };

    for (index, atlas) in atlases.iter().enumerate() {
        observer(&PipelineEvent::AtlasStarted {
            atlas: atlas.name.clone(),
            index,
            total: atlases.len(),
        });
        let changes = atlas_changes(&working, &current, &atlas.name);
        let atlas_cfg = resolve_atlas_config(&atlas.dir, &config.default_atlas_config);
        runner.run_atlas(atlas, &atlas_cfg, &changes, &mut summary, &mut observer)?;

        if !changes.is_empty() {
            apply_changes(&mut working, &current, &changes);
            store.save(&working)?;
            observer(&PipelineEvent::HashSaved {
                path: store.path().to_path_buf(),
                entries: working.len(),
            });
        }
    }

    if prune_stale(&mut working, &atlases) {
        store.save(&working)?;
        observer(&PipelineEvent::HashSaved {
            path: store.path().to_path_buf(),
            entries: working.len(),
        });
    }

    info!(
        atlases = summary.atlases,
        built = summary.built,
        skipped = summary.skipped,
        removed = summary.removed,
        "pipeline finished"
    );
    observer(&PipelineEvent::Finished(summary));
    Ok(summary)
}

/// Drops entries of atlas folders that no longer exist. Returns true if
/// anything was removed.
fn prune_stale(working: &mut FileHashes, atlases: &[AtlasFolder]) -> bool {
    let live: BTreeSet<&str> = atlases.iter().map(|a| a.name.as_str()).collect();
    let before = working.len();
    working.retain(|key, _| {
        key.split_once('/')
            .is_some_and(|(atlas, _)| live.contains(atlas))
    });
    let removed = before - working.len();
    if removed > 0 {
        debug!(removed, "pruned stale hash entries");
    }
    removed > 0
}

/// Shared, read-only state of one run.
struct AtlasRunner<'a> {
    config: &'a PipelineConfig,
    output_dir: &'a Path,
    pixels: &'a dyn PixelService,
    packer: &'a dyn RectPacker,
    pool: &'a WorkerPool,
}

struct ScaleOutput {
    image: PathBuf,
    metadata: PathBuf,
    stats: PackStats,
}

impl AtlasRunner<'_> {
    fn run_atlas(
        &self,
        atlas: &AtlasFolder,
        atlas_cfg: &AtlasConfig,
        changes: &HashDiff,
        summary: &mut RunSummary,
        observer: &mut impl FnMut(&PipelineEvent),
    ) -> Result<()> {
        let format = atlas_cfg.format_or(self.config.output_texture_format);
        let multi_scale = self.config.scales.len() > 1;
        for &scale in &self.config.scales {
            let names = OutputNames::new(
                &atlas.name,
                scale,
                multi_scale,
                format,
                self.config.append_texture_format,
            );
            if atlas.sprites.is_empty() {
                if remove_outputs(self.output_dir, &names)? {
                    info!(atlas = %atlas.name, scale, "all sprites gone; outputs removed");
                    summary.removed += 1;
                    observer(&PipelineEvent::ScaleRemoved {
                        atlas: atlas.name.clone(),
                        scale,
                    });
                } else {
                    warn!(atlas = %atlas.name, "no sprites; nothing to pack");
                    summary.skipped += 1;
                    observer(&PipelineEvent::AtlasSkipped {
                        atlas: atlas.name.clone(),
                        scale,
                    });
                }
                continue;
            }
            let exists = outputs_exist(self.output_dir, &names);
            if should_skip(changes, self.config.force, exists) {
                info!(atlas = %atlas.name, scale, "skip");
                summary.skipped += 1;
                observer(&PipelineEvent::AtlasSkipped {
                    atlas: atlas.name.clone(),
                    scale,
                });
                continue;
            }

            info!(
                atlas = %atlas.name,
                scale,
                changed = changes.changed.len(),
                removed = changes.removed.len(),
                "pack"
            );
            let ctx = BuildContext {
                atlas: &atlas.name,
                atlas_dir: &atlas.dir,
                config: atlas_cfg,
                scale,
            };
            let out = self.build_scale(&ctx, atlas, format, &names)?;
            info!(atlas = %atlas.name, scale, "{}", out.stats.summary());
            summary.built += 1;
            observer(&PipelineEvent::ScaleBuilt {
                atlas: atlas.name.clone(),
                scale,
                image: out.image,
                metadata: out.metadata,
                stats: out.stats,
            });
        }
        Ok(())
    }

    fn build_scale(
        &self,
        ctx: &BuildContext<'_>,
        atlas: &AtlasFolder,
        format: OutputFormat,
        names: &OutputNames,
    ) -> Result<ScaleOutput> {
        let prepared = preprocess_sprites(ctx, self.pixels, self.pool, &atlas.sprites)?;
        let mut buffers: HashMap<String, Arc<RgbaImage>> = HashMap::new();
        let mut records = Vec::with_capacity(prepared.len());
        for p in prepared {
            if let Some(buf) = p.pixels {
                buffers.insert(p.record.id.clone(), buf);
            }
            records.push(p.record);
        }

        let result: AtlasBuildResult = pack_sprites(ctx, self.packer, records)?;
        let stats = result.stats();
        let canvas = compose_atlas(self.pixels, &result, &buffers);
        drop(buffers);
        let bytes = self.pixels.encode(&canvas, format, &self.config.format_config)?;

        let image_name = if self.config.append_file_hash {
            names.image(Some(hash_bytes(&bytes).as_str()))
        } else {
            names.image(None)
        };
        let doc = build_document(ctx, &result, &image_name);
        let text = to_json(&doc, self.config.metadata_style)?;

        let image_path = self.output_dir.join(&image_name);
        let metadata_path = self.output_dir.join(&names.metadata);
        let replaced = previous_image(&metadata_path).filter(|old| *old != image_name);

        let (image, metadata) = self.pool.join(
            || StagedFile::write(&image_path, &bytes),
            || StagedFile::write(&metadata_path, text.as_bytes()),
        );
        let (image, metadata) = (image?, metadata?);
        image.commit()?;
        metadata.commit()?;

        if let Some(old) = replaced {
            let old_path = self.output_dir.join(&old);
            if old_path.is_file() {
                debug!(path = %old_path.display(), "removing replaced atlas image");
                fs::remove_file(&old_path)?;
            }
        }

        Ok(ScaleOutput {
            image: image_path,
            metadata: metadata_path,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names() {
        let n = OutputNames::new("hero", 0.5, true, OutputFormat::Webp, true);
        assert_eq!(n.base, "hero@0.5x");
        assert_eq!(n.metadata, "hero@0.5x.webp.json");
        assert_eq!(n.image(None), "hero@0.5x.webp");
        assert_eq!(n.image(Some("0123456789abcdef")), "hero@0.5x-01234567.webp");

        let n = OutputNames::new("ui", 1.0, false, OutputFormat::Jpeg, false);
        assert_eq!(n.metadata, "ui.json");
        assert_eq!(n.image(None), "ui.jpg");
        let n = OutputNames::new("ui", 2.0, true, OutputFormat::Png, false);
        assert_eq!(n.base, "ui@2x");
    }

    #[test]
    fn prune_drops_vanished_atlases() {
        let mut working: FileHashes = [
            ("hero/a.png".to_string(), "1".to_string()),
            ("gone/b.png".to_string(), "2".to_string()),
        ]
        .into_iter()
        .collect();
        let atlases = vec![AtlasFolder {
            name: "hero".into(),
            dir: PathBuf::from("hero"),
            sprites: vec![],
            has_config: false,
        }];
        assert!(prune_stale(&mut working, &atlases));
        assert_eq!(working.keys().collect::<Vec<_>>(), vec!["hero/a.png"]);
        assert!(!prune_stale(&mut working, &atlases));
    }

    #[test]
    fn sprite_extensions_are_case_insensitive() {
        assert!(is_sprite(Path::new("a/B.PNG")));
        assert!(is_sprite(Path::new("c.jpeg")));
        assert!(!is_sprite(Path::new("config.json")));
        assert!(!is_sprite(Path::new("noext")));
    }
}
