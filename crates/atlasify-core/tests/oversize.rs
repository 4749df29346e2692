mod common;

use atlasify_core::prelude::*;
use atlasify_core::packer::{PackItem, PackOptions};
use common::*;
use std::fs;

#[test]
fn packer_signals_overflow_instead_of_truncating() {
    let items: Vec<PackItem> = (0..10).map(|i| PackItem::new(format!("s{i}"), 500, 500)).collect();
    let res = MaxRectsPacker::default().pack(512, 512, 0, &PackOptions::default(), &items);
    assert!(!res.fits_single_bin());
    assert_eq!(res.bins.len(), 10);
    let placed: usize = res.bins.iter().map(|b| b.placements.len()).sum();
    assert_eq!(placed, 10);
}

#[test]
fn single_sprite_larger_than_the_bin_is_isolated() {
    let items = vec![PackItem::new("huge", 600, 10), PackItem::new("tiny", 4, 4)];
    let res = MaxRectsPacker::default().pack(512, 512, 0, &PackOptions::default(), &items);
    assert!(!res.fits_single_bin());
    assert!(res.bins.iter().any(|b| b.oversized && b.placements[0].id == "huge"));
}

#[test]
fn oversize_atlas_aborts_without_output() {
    let root = temp_dir("oversize");
    let input = root.join("in");
    for i in 0..10 {
        write_sprite(&input, &format!("big/s{i}.png"), &solid(500, 500, [i as u8, 0, 0, 255]));
    }
    fs::write(
        input.join("big").join("config.json"),
        r#"{"maxWidth": 512, "maxHeight": 512}"#,
    )
    .unwrap();
    let (res, events) = run(&config(&root));
    match res {
        Err(AtlasError::Oversize { atlas, width, height, bins }) => {
            assert_eq!(atlas, "big");
            assert_eq!((width, height), (512, 512));
            assert!(bins > 1);
        }
        other => panic!("expected oversize, got {other:?}"),
    }
    assert!(built(&events).is_empty());
    assert!(!root.join("out").join("big.json").exists());
    assert!(!root.join("out").join("big.png").exists());
    assert!(!input.join("hash.json").exists());
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn pot_rounding_past_the_bounds_is_oversize() {
    let root = temp_dir("oversize_pot");
    let input = root.join("in");
    write_sprite(&input, "strip/s.png", &solid(600, 10, [7, 7, 7, 255]));
    fs::write(
        input.join("strip").join("config.json"),
        r#"{"maxWidth": 1000, "maxHeight": 1000}"#,
    )
    .unwrap();
    let (res, _) = run(&config(&root));
    assert!(matches!(res, Err(AtlasError::Oversize { .. })), "{res:?}");
    assert!(!root.join("out").join("strip.json").exists());

    fs::write(
        input.join("strip").join("config.json"),
        r#"{"maxWidth": 1000, "maxHeight": 1000, "pot": false}"#,
    )
    .unwrap();
    run(&config(&root)).0.unwrap();
    let doc = read_json(&root.join("out").join("strip.json"));
    let (w, h) = (doc["meta"]["size"]["w"].as_u64().unwrap(), doc["meta"]["size"]["h"].as_u64().unwrap());
    assert_eq!((w.max(h), w.min(h)), (600, 10));
    let _ = fs::remove_dir_all(&root);
}
