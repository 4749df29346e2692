#![allow(dead_code)]

use atlasify_core::prelude::*;
use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};

pub fn temp_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("atlasify_{name}_{}_{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba(px))
}

/// Opaque image whose every pixel encodes its own coordinates.
pub fn gradient(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255]))
}

pub fn write_sprite(root: &Path, rel: &str, img: &RgbaImage) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(&path).unwrap();
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .input_dir(root.join("in"))
        .output_dir(root.join("out"))
        .build()
}

/// Runs the pipeline and records every event.
pub fn run(cfg: &PipelineConfig) -> (atlasify_core::Result<RunSummary>, Vec<PipelineEvent>) {
    let mut events = Vec::new();
    let res = run_pipeline(cfg, |e| events.push(e.clone()));
    (res, events)
}

/// `(atlas, scale)` of every built pass, in order.
pub fn built(events: &[PipelineEvent]) -> Vec<(String, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ScaleBuilt { atlas, scale, .. } => Some((atlas.clone(), *scale)),
            _ => None,
        })
        .collect()
}
