mod common;

use atlasify_core::natural::{natural_cmp, natural_sort};
use common::*;
use std::cmp::Ordering;
use std::fs;

#[test]
fn numerals_sort_by_value() {
    let mut ids = vec!["img2.png", "img10.png", "img1.png"];
    natural_sort(&mut ids);
    assert_eq!(ids, vec!["img1.png", "img2.png", "img10.png"]);
    assert_eq!(natural_cmp("frame2", "frame10"), Ordering::Less);
}

#[test]
fn frames_and_hash_file_follow_natural_order() {
    let root = temp_dir("natural_order");
    let input = root.join("in");
    for n in [10, 2, 1, 21, 3] {
        write_sprite(&input, &format!("s/img{n}.png"), &solid(2, 2, [n as u8, 0, 0, 255]));
    }
    run(&config(&root)).0.unwrap();

    let text = fs::read_to_string(root.join("out").join("s.json")).unwrap();
    let pos: Vec<usize> = [1, 2, 3, 10, 21]
        .iter()
        .map(|n| text.find(&format!("\"img{n}.png\"")).unwrap())
        .collect();
    assert!(pos.windows(2).all(|w| w[0] < w[1]), "frame keys out of order");

    let hashes = fs::read_to_string(input.join("hash.json")).unwrap();
    let pos: Vec<usize> = [1, 2, 3, 10, 21]
        .iter()
        .map(|n| hashes.find(&format!("\"s/img{n}.png\"")).unwrap())
        .collect();
    assert!(pos.windows(2).all(|w| w[0] < w[1]), "hash keys out of order");
    let _ = fs::remove_dir_all(&root);
}
