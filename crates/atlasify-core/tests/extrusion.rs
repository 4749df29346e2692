mod common;

use common::*;
use std::fs;

#[test]
fn extruded_edges_replicate_the_border_pixels() {
    let root = temp_dir("extrusion");
    let input = root.join("in");
    let img = gradient(4, 4);
    write_sprite(&input, "e/s.png", &img);
    fs::write(
        input.join("e").join("config.json"),
        r#"{"extrude": true, "allowRotation": false}"#,
    )
    .unwrap();
    run(&config(&root)).0.unwrap();

    let doc = read_json(&root.join("out").join("e.json"));
    let frame = &doc["frames"]["s.png"]["frame"];
    assert_eq!(frame["x"], 1);
    assert_eq!(frame["y"], 1);
    assert_eq!(frame["w"], 4);
    assert_eq!(frame["h"], 4);

    let atlas = image::open(root.join("out").join("e.png")).unwrap().to_rgba8();
    // packed rect is 6x6, rounded up to a power of two
    assert_eq!(atlas.dimensions(), (8, 8));
    let at = |x: u32, y: u32| *atlas.get_pixel(x, y);
    let src = |x: u32, y: u32| *img.get_pixel(x, y);

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(at(x + 1, y + 1), src(x, y));
        }
    }
    for i in 0..4 {
        assert_eq!(at(0, i + 1), src(0, i), "left edge");
        assert_eq!(at(5, i + 1), src(3, i), "right edge");
        assert_eq!(at(i + 1, 0), src(i, 0), "top edge");
        assert_eq!(at(i + 1, 5), src(i, 3), "bottom edge");
    }
    assert_eq!(at(0, 0), src(0, 0));
    assert_eq!(at(5, 0), src(3, 0));
    assert_eq!(at(0, 5), src(0, 3));
    assert_eq!(at(5, 5), src(3, 3));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn extrusion_can_target_single_sprites() {
    let root = temp_dir("extrusion_ids");
    let input = root.join("in");
    write_sprite(&input, "e/a.png", &gradient(4, 4));
    write_sprite(&input, "e/b.png", &solid(4, 4, [0, 0, 0, 255]));
    fs::write(
        input.join("e").join("config.json"),
        r#"{"extrude": ["b.png"], "extraSpace": 0, "pot": false}"#,
    )
    .unwrap();
    run(&config(&root)).0.unwrap();

    let doc = read_json(&root.join("out").join("e.json"));
    let a = &doc["frames"]["a.png"]["frame"];
    let b = &doc["frames"]["b.png"]["frame"];
    // a occupies 4x4, b 6x6 with its pixels inset by one
    let area = doc["meta"]["size"]["w"].as_u64().unwrap() * doc["meta"]["size"]["h"].as_u64().unwrap();
    assert!(area >= 16 + 36);
    let bx = b["x"].as_u64().unwrap();
    let by = b["y"].as_u64().unwrap();
    assert!(bx >= 1 && by >= 1);
    assert_eq!(a["w"], 4);
    let _ = fs::remove_dir_all(&root);
}
