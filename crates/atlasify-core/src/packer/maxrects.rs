use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use super::{Bin, PackItem, PackOptions, PackResult, Placement, RectPacker, next_pow2};
use crate::model::Rect;

/// MaxRects placement heuristics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MaxRectsHeuristic {
    #[default]
    BestAreaFit,
    BestShortSideFit,
    BestLongSideFit,
    BottomLeft,
    ContactPoint,
}

impl FromStr for MaxRectsHeuristic {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baf" | "bestareafit" => Ok(Self::BestAreaFit),
            "bssf" | "bestshortsidefit" => Ok(Self::BestShortSideFit),
            "blsf" | "bestlongsidefit" => Ok(Self::BestLongSideFit),
            "bl" | "bottomleft" => Ok(Self::BottomLeft),
            "cp" | "contactpoint" => Ok(Self::ContactPoint),
            _ => Err(()),
        }
    }
}

/// One MaxRects bin: a free-rectangle list over a fixed area.
///
/// Each inserted rectangle reserves `spacing` extra pixels to its right and
/// bottom. The free area extends `spacing` past the usable bounds so the last
/// row/column does not pay for spacing it never needs.
pub struct MaxRectsBin {
    border: Rect,
    spacing: u32,
    allow_rotation: bool,
    free: Vec<Rect>,
    used: Vec<Rect>,
    heuristic: MaxRectsHeuristic,
}

impl MaxRectsBin {
    pub fn new(
        width: u32,
        height: u32,
        border: u32,
        spacing: u32,
        allow_rotation: bool,
        heuristic: MaxRectsHeuristic,
    ) -> Self {
        let w = width.saturating_sub(border.saturating_mul(2)) + spacing;
        let h = height.saturating_sub(border.saturating_mul(2)) + spacing;
        let area = Rect::new(border, border, w, h);
        Self {
            border: area,
            spacing,
            allow_rotation,
            free: vec![area],
            used: Vec::new(),
            heuristic,
        }
    }

    /// Places a `w x h` rectangle. Returns its top-left corner and whether it
    /// was rotated, or `None` if it does not fit.
    pub fn insert(&mut self, w: u32, h: u32) -> Option<(u32, u32, bool)> {
        self.insert_where(w, h, |_, _, _| true)
    }

    /// Like [`MaxRectsBin::insert`], but the best position is only taken if
    /// `accept(x, y, rotated)` agrees. A rejected position leaves the bin
    /// untouched.
    pub fn insert_where(
        &mut self,
        w: u32,
        h: u32,
        accept: impl FnOnce(u32, u32, bool) -> bool,
    ) -> Option<(u32, u32, bool)> {
        let (place, rotated) = self.find_position(w + self.spacing, h + self.spacing)?;
        if !accept(place.x, place.y, rotated) {
            return None;
        }
        self.place_rect(&place);
        Some((place.x, place.y, rotated))
    }

    fn place_rect(&mut self, node: &Rect) {
        // split all free rectangles that intersect with node
        let mut new_free: Vec<Rect> = Vec::new();
        for fr in self.free.iter() {
            if !fr.intersects(node) {
                new_free.push(*fr);
                continue;
            }
            let fr_x2 = fr.x + fr.w;
            let fr_y2 = fr.y + fr.h;
            let n_x2 = node.x + node.w;
            let n_y2 = node.y + node.h;

            let ix1 = fr.x.max(node.x);
            let iy1 = fr.y.max(node.y);
            let ix2 = fr_x2.min(n_x2);
            let iy2 = fr_y2.min(n_y2);

            // above
            if iy1 > fr.y {
                new_free.push(Rect::new(fr.x, fr.y, fr.w, iy1 - fr.y));
            }
            // below
            if iy2 < fr_y2 {
                new_free.push(Rect::new(fr.x, iy2, fr.w, fr_y2 - iy2));
            }
            // left
            if ix1 > fr.x {
                new_free.push(Rect::new(fr.x, fr.y, ix1 - fr.x, fr.h));
            }
            // right
            if ix2 < fr_x2 {
                new_free.push(Rect::new(ix2, fr.y, fr_x2 - ix2, fr.h));
            }
        }

        self.free = new_free;
        self.prune_free_list();
        self.used.push(*node);
    }

    fn prune_free_list(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let a = self.free[i];
            let mut remove_i = false;
            let mut j = i + 1;
            while j < self.free.len() {
                let b = self.free[j];
                if b.contains(&a) {
                    remove_i = true;
                    break;
                }
                if a.contains(&b) {
                    self.free.remove(j);
                    continue;
                }
                j += 1;
            }
            if remove_i {
                self.free.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn score(&self, fr: &Rect, w: u32, h: u32) -> (i64, i64) {
        let leftover_h = fr.w as i64 - w as i64;
        let leftover_v = fr.h as i64 - h as i64;
        let short_fit = leftover_h.abs().min(leftover_v.abs());
        let long_fit = leftover_h.abs().max(leftover_v.abs());
        let area_fit = (fr.w as i64) * (fr.h as i64) - (w as i64) * (h as i64);
        match self.heuristic {
            MaxRectsHeuristic::BestAreaFit => (area_fit, short_fit),
            MaxRectsHeuristic::BestShortSideFit => (short_fit, long_fit),
            MaxRectsHeuristic::BestLongSideFit => (long_fit, short_fit),
            MaxRectsHeuristic::BottomLeft => (fr.y as i64 + h as i64, fr.x as i64),
            MaxRectsHeuristic::ContactPoint => {
                // maximize contact score: use negative for minimization
                let contact = self.contact_point_score(fr.x, fr.y, w, h);
                (-(contact as i64), area_fit)
            }
        }
    }

    fn find_position(&self, w: u32, h: u32) -> Option<(Rect, bool)> {
        let mut best: Option<((i64, i64, u32, u32), Rect, bool)> = None;
        let mut consider = |key: (i64, i64, u32, u32), rect: Rect, rotated: bool| {
            if best.as_ref().is_none_or(|(k, _, _)| key < *k) {
                best = Some((key, rect, rotated));
            }
        };

        for fr in &self.free {
            // normal
            if fr.w >= w && fr.h >= h {
                let (s1, s2) = self.score(fr, w, h);
                // tie-break: prefer smaller top side (y + h), then smaller x
                consider((s1, s2, fr.y + h, fr.x), Rect::new(fr.x, fr.y, w, h), false);
            }
            // rotated
            if self.allow_rotation && w != h && fr.w >= h && fr.h >= w {
                let (s1, s2) = self.score(fr, h, w);
                consider((s1, s2, fr.y + w, fr.x), Rect::new(fr.x, fr.y, h, w), true);
            }
        }

        best.and_then(|(_, rect, rotated)| (rect.w > 0 && rect.h > 0).then_some((rect, rotated)))
    }

    fn contact_point_score(&self, x: u32, y: u32, w: u32, h: u32) -> u32 {
        let node = Rect::new(x, y, w, h);
        let mut score = 0u32;
        // contact with borders
        let border_right = self.border.x + self.border.w;
        let border_bottom = self.border.y + self.border.h;
        if node.x == self.border.x {
            score += node.h;
        }
        if node.y == self.border.y {
            score += node.w;
        }
        if node.x + node.w == border_right {
            score += node.h;
        }
        if node.y + node.h == border_bottom {
            score += node.w;
        }

        // contact with used rectangles
        for u in &self.used {
            // vertical contact (left/right edges)
            if node.x == u.x + u.w || u.x == node.x + node.w {
                score += overlap_1d(node.y, node.y + node.h, u.y, u.y + u.h);
            }
            // horizontal contact (top/bottom edges)
            if node.y == u.y + u.h || u.y == node.y + node.h {
                score += overlap_1d(node.x, node.x + node.w, u.x, u.x + u.w);
            }
        }
        score
    }

    pub fn free_list_len(&self) -> usize {
        self.free.len()
    }
}

fn overlap_1d(a1: u32, a2: u32, b1: u32, b2: u32) -> u32 {
    let start = a1.max(b1);
    let end = a2.min(b2);
    end.saturating_sub(start)
}

/// Multi-bin MaxRects packer: opens a new bin whenever the remaining items
/// no longer fit, and isolates items larger than an empty bin in their own
/// oversized bin.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxRectsPacker {
    pub heuristic: MaxRectsHeuristic,
}

impl MaxRectsPacker {
    pub fn new(heuristic: MaxRectsHeuristic) -> Self {
        Self { heuristic }
    }
}

impl RectPacker for MaxRectsPacker {
    fn pack(
        &self,
        bin_width: u32,
        bin_height: u32,
        spacing: u32,
        options: &PackOptions,
        rects: &[PackItem],
    ) -> PackResult {
        let mut bins: Vec<Bin> = Vec::new();
        let mut remaining: Vec<usize> = (0..rects.len()).collect();

        while !remaining.is_empty() {
            let mut bin = MaxRectsBin::new(
                bin_width,
                bin_height,
                options.border,
                spacing,
                options.allow_rotation,
                self.heuristic,
            );
            let mut placements: Vec<Placement> = Vec::new();
            let mut extent = (0u32, 0u32);

            loop {
                let mut placed_any = false;
                let mut remove_set: HashSet<usize> = HashSet::new();
                for &idx in &remaining {
                    let item = &rects[idx];
                    let grown = |x: u32, y: u32, rotated: bool| {
                        let (w, h) = if rotated {
                            (item.height, item.width)
                        } else {
                            (item.width, item.height)
                        };
                        (extent.0.max(x + w), extent.1.max(y + h))
                    };
                    // pot/square rounding must stay within the bounds too
                    let fits = |x: u32, y: u32, rotated: bool| {
                        let (w, h) = bin_size(grown(x, y, rotated), bin_width, bin_height, options);
                        w <= bin_width && h <= bin_height
                    };
                    if let Some((x, y, rotated)) = bin.insert_where(item.width, item.height, fits) {
                        extent = grown(x, y, rotated);
                        placements.push(Placement {
                            id: item.id.clone(),
                            x,
                            y,
                            rotated,
                        });
                        remove_set.insert(idx);
                        placed_any = true;
                    }
                }
                if !placed_any {
                    break;
                }
                remaining.retain(|i| !remove_set.contains(i));
            }

            if placements.is_empty() {
                // The first remaining item cannot fit even into an empty bin.
                let item = &rects[remaining.remove(0)];
                bins.push(Bin {
                    width: item.width + options.border * 2,
                    height: item.height + options.border * 2,
                    placements: vec![Placement {
                        id: item.id.clone(),
                        x: options.border,
                        y: options.border,
                        rotated: false,
                    }],
                    oversized: true,
                });
                continue;
            }

            let (width, height) = bin_size(extent, bin_width, bin_height, options);
            bins.push(Bin {
                width,
                height,
                placements,
                oversized: false,
            });
        }
        PackResult { bins }
    }
}

/// Final bin dimensions from the placed extent and the sizing options.
fn bin_size(extent: (u32, u32), bin_width: u32, bin_height: u32, options: &PackOptions) -> (u32, u32) {
    let (mut w, mut h) = if options.smart {
        (extent.0 + options.border, extent.1 + options.border)
    } else {
        (bin_width, bin_height)
    };
    if options.pot {
        w = next_pow2(w.max(1));
        h = next_pow2(h.max(1));
    }
    if options.square {
        let m = w.max(h);
        w = m;
        h = m;
    }
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_fit_fills_bin() {
        let mut bin = MaxRectsBin::new(64, 64, 0, 0, false, MaxRectsHeuristic::BestAreaFit);
        assert_eq!(bin.insert(64, 32), Some((0, 0, false)));
        assert_eq!(bin.insert(64, 32), Some((0, 32, false)));
        assert_eq!(bin.insert(1, 1), None);
    }

    #[test]
    fn spacing_is_reserved_between_items() {
        let mut bin = MaxRectsBin::new(21, 10, 0, 1, false, MaxRectsHeuristic::BottomLeft);
        assert_eq!(bin.insert(10, 10), Some((0, 0, false)));
        assert_eq!(bin.insert(10, 10), Some((11, 0, false)));
        assert_eq!(bin.insert(1, 1), None);
    }

    #[test]
    fn contained_free_rects_are_pruned() {
        let mut bin = MaxRectsBin::new(100, 100, 0, 0, false, MaxRectsHeuristic::BestAreaFit);
        bin.insert(50, 50);
        assert_eq!(bin.free_list_len(), 2);
        bin.insert(50, 50);
        bin.insert(50, 50);
        bin.insert(50, 50);
        assert_eq!(bin.free_list_len(), 0);
    }

    #[test]
    fn rounded_bins_never_exceed_the_bounds() {
        let pot = PackOptions {
            pot: true,
            ..PackOptions::default()
        };
        // 600 rounds up to 1024 > 1000
        let res = MaxRectsPacker::default().pack(1000, 1000, 0, &pot, &[PackItem::new("a", 600, 10)]);
        assert!(!res.fits_single_bin());
        let res = MaxRectsPacker::default().pack(1000, 1000, 0, &pot, &[PackItem::new("a", 500, 10)]);
        assert!(res.fits_single_bin());
        assert_eq!((res.bins[0].width, res.bins[0].height), (512, 16));

        let square = PackOptions {
            square: true,
            ..PackOptions::default()
        };
        let res = MaxRectsPacker::default().pack(1000, 200, 0, &square, &[PackItem::new("a", 900, 10)]);
        assert!(!res.fits_single_bin());
        let res = MaxRectsPacker::default().pack(1000, 200, 0, &square, &[PackItem::new("a", 150, 10)]);
        assert_eq!((res.bins[0].width, res.bins[0].height), (150, 150));
        for bin in &res.bins {
            assert!(bin.width <= 1000 && bin.height <= 200);
        }
    }

    #[test]
    fn rotation_is_used_when_needed() {
        let mut bin = MaxRectsBin::new(10, 40, 0, 0, true, MaxRectsHeuristic::BestAreaFit);
        assert_eq!(bin.insert(40, 10), Some((0, 0, true)));
    }

    #[test]
    fn smart_pot_square_sizing() {
        let opts = PackOptions {
            smart: true,
            pot: true,
            square: true,
            allow_rotation: false,
            border: 0,
        };
        assert_eq!(bin_size((70, 20), 512, 512, &opts), (128, 128));
        let opts = PackOptions {
            pot: false,
            square: false,
            ..opts
        };
        assert_eq!(bin_size((70, 20), 512, 512, &opts), (70, 20));
    }
}
