mod common;

use atlasify_core::prelude::*;
use common::*;
use image::{Rgba, RgbaImage};

#[test]
fn built_event_reports_pack_stats() {
    let root = temp_dir("pack_stats");
    let input = root.join("in");
    for i in 0..4u8 {
        write_sprite(&input, &format!("tiles/t{i}.png"), &solid(64, 64, [i * 40, 10, 10, 255]));
    }
    write_sprite(&input, "tiles/t0_copy.png", &solid(64, 64, [0, 10, 10, 255]));
    let mut dot = RgbaImage::new(16, 16);
    dot.put_pixel(5, 6, Rgba([255, 255, 255, 255]));
    write_sprite(&input, "tiles/dot.png", &dot);

    let (res, events) = run(&config(&root));
    res.unwrap();
    let stats = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::ScaleBuilt { stats, .. } => Some(*stats),
            _ => None,
        })
        .unwrap();

    assert_eq!(stats.num_sprites, 6);
    assert_eq!(stats.num_duplicates, 1);
    assert_eq!(stats.num_trimmed, 1);
    assert_eq!(stats.used_area, 4 * 64 * 64 + 1);
    assert!(stats.occupancy > 0.25 && stats.occupancy <= 1.0);
    assert!(stats.summary().contains("1 duplicates"));
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn fully_transparent_sprite_keeps_its_size() {
    let root = temp_dir("transparent");
    let input = root.join("in");
    write_sprite(&input, "fx/empty.png", &RgbaImage::new(8, 8));
    run(&config(&root)).0.unwrap();

    let doc = read_json(&root.join("out").join("fx.json"));
    let f = &doc["frames"]["empty.png"];
    assert_eq!(f["trimmed"], false);
    assert_eq!(f["frame"], serde_json::json!({"x": 0, "y": 0, "w": 8, "h": 8}));
    assert_eq!(f["sourceSize"], serde_json::json!({"w": 8, "h": 8}));
    let _ = std::fs::remove_dir_all(&root);
}
