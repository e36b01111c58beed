// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! 8x8 block motion estimation: a quarter-density full-search block matcher,
//! a simplified per-MB predictor-assisted search built on top of it, and the
//! per-frame temporal-correlation reductions derived from the result.

use super::{MotionVector, PlaneView};

pub const BLOCK: usize = 8;

/// Result of a single block match: the winning motion vector and its SAD.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockMatch {
    pub mv: MotionVector,
    pub sad: u32,
}

fn sad_at(cur: PlaneView, refr: PlaneView, bx: usize, by: usize, mv: MotionVector) -> Option<u32> {
    let rx = bx as i64 + mv.x as i64;
    let ry = by as i64 + mv.y as i64;
    if rx < 0 || ry < 0 {
        return None;
    }
    let (rx, ry) = (rx as usize, ry as usize);
    if rx + BLOCK > refr.width() || ry + BLOCK > refr.height() {
        return None;
    }

    let mut sad = 0u32;
    for dy in 0..BLOCK {
        for dx in 0..BLOCK {
            let c = cur.get(bx + dx, by + dy) as i32;
            let r = refr.get(rx + dx, ry + dy) as i32;
            sad += (c - r).unsigned_abs();
        }
    }
    Some(sad)
}

/// Quarter-density full-search: integer-pixel window `[-xr,+xr] x [-yr,+yr]`
/// with step 2 on both axes. Ties broken by lower `bx^2 + by^2`.
pub fn block_sad_search(
    cur: PlaneView,
    refr: PlaneView,
    bx: usize,
    by: usize,
    xr: i32,
    yr: i32,
) -> BlockMatch {
    let mut best = BlockMatch {
        mv: MotionVector::default(),
        sad: u32::MAX,
    };

    let mut dy = -yr;
    while dy <= yr {
        let mut dx = -xr;
        while dx <= xr {
            let mv = MotionVector { x: dx, y: dy };
            if let Some(sad) = sad_at(cur, refr, bx, by, mv) {
                if sad < best.sad
                    || (sad == best.sad && mv.magnitude_sq() < best.mv.magnitude_sq())
                {
                    best = BlockMatch { mv, sad };
                }
            }
            dx += 2;
        }
        dy += 2;
    }

    best
}

/// Per-frame accumulators consumed by [`me_simple`] and folded into the
/// Analysis Record's temporal-correlation fields.
#[derive(Clone, Debug, Default)]
pub struct MotionFieldStats {
    pub block_mvs: Vec<MotionVector>,
    pub block_sads: Vec<u32>,
    pub blocks_x: usize,
    pub blocks_y: usize,
    pub sum_abs_mv_x: i64,
    pub sum_abs_mv_y: i64,
    pub var: f64,
    pub jtvar: f64,
    pub mcjtvar: f64,
}

impl MotionFieldStats {
    fn mv_at(&self, bx: i64, by: i64) -> Option<MotionVector> {
        if bx < 0 || by < 0 || bx as usize >= self.blocks_x || by as usize >= self.blocks_y {
            return None;
        }
        let idx = by as usize * self.blocks_x + bx as usize;
        self.block_mvs.get(idx).copied()
    }

    /// `tcor = 100 * jtvar / var`, falling back to 100 when `var == 0` (the
    /// frame is flat, so there is nothing to decorrelate against) and
    /// capped at 2000 to keep the statistic bounded for later classifiers.
    pub fn tcor(&self) -> i16 {
        ratio_stat(self.jtvar, self.var)
    }

    /// `mcTcor = 100 * mcjtvar / var`, same fallback/cap rule as [`Self::tcor`].
    pub fn mc_tcor(&self) -> i16 {
        ratio_stat(self.mcjtvar, self.var)
    }

    pub fn avg_abs_mv_x(&self) -> f32 {
        let n = (self.blocks_x * self.blocks_y).max(1) as f64;
        (self.sum_abs_mv_x as f64 / n) as f32
    }

    pub fn avg_abs_mv_y(&self) -> f32 {
        let n = (self.blocks_x * self.blocks_y).max(1) as f64;
        (self.sum_abs_mv_y as f64 / n) as f32
    }
}

fn ratio_stat(numerator: f64, denominator: f64) -> i16 {
    if denominator == 0.0 {
        return 100;
    }
    let ratio = 100.0 * numerator / denominator;
    ratio.clamp(i16::MIN as f64, 2000.0) as i16
}

/// Runs the simplified per-MB motion search over the whole sub-sampled
/// plane, MB by MB in raster order so the neighbour predictor (top-left,
/// top, left) is always already-searched.
pub fn me_simple(cur: PlaneView, refr: PlaneView) -> MotionFieldStats {
    let blocks_x = cur.width() / BLOCK;
    let blocks_y = cur.height() / BLOCK;

    let mut stats = MotionFieldStats {
        block_mvs: vec![MotionVector::default(); blocks_x * blocks_y],
        block_sads: vec![0u32; blocks_x * blocks_y],
        blocks_x,
        blocks_y,
        ..Default::default()
    };

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let px = bx * BLOCK;
            let py = by * BLOCK;

            // Step 1: zero-MV check.
            let zero = MotionVector::default();
            let zero_sad = sad_at(cur, refr, px, py, zero);
            let mut best = BlockMatch {
                mv: zero,
                sad: zero_sad.unwrap_or(u32::MAX),
            };
            if best.sad == 0 {
                finish_block(&mut stats, bx, by, best, &cur, &refr, px, py);
                continue;
            }

            // Step 2: neighbour predictor (average of top-left, top, left).
            let neighbours = [
                stats.mv_at(bx as i64 - 1, by as i64 - 1),
                stats.mv_at(bx as i64, by as i64 - 1),
                stats.mv_at(bx as i64 - 1, by as i64),
            ];
            let present: Vec<MotionVector> = neighbours.into_iter().flatten().collect();
            if !present.is_empty() {
                let n = present.len() as i32;
                let avg = MotionVector {
                    x: present.iter().map(|m| m.x).sum::<i32>() / n,
                    y: present.iter().map(|m| m.y).sum::<i32>() / n,
                };
                if let Some(sad) = sad_at(cur, refr, px, py, avg) {
                    if sad < best.sad {
                        best = BlockMatch { mv: avg, sad };
                    }
                }
            }

            // Step 3: wide search, step-2 FHS over +-8 around current best.
            let wide = block_sad_search_around(&cur, &refr, px, py, best, 8, 8);
            if wide.sad < best.sad {
                best = wide;
            }

            // Step 4: +-1 refinement around the wide-search winner.
            let refined = block_sad_search_around(&cur, &refr, px, py, best, 1, 1);
            if refined.sad < best.sad {
                best = refined;
            }

            finish_block(&mut stats, bx, by, best, &cur, &refr, px, py);
        }
    }

    stats
}

fn block_sad_search_around(
    cur: &PlaneView,
    refr: &PlaneView,
    px: usize,
    py: usize,
    center: BlockMatch,
    xr: i32,
    yr: i32,
) -> BlockMatch {
    let mut best = center;
    let mut dy = center.mv.y - yr;
    while dy <= center.mv.y + yr {
        let mut dx = center.mv.x - xr;
        while dx <= center.mv.x + xr {
            let mv = MotionVector { x: dx, y: dy };
            if let Some(sad) = sad_at(*cur, *refr, px, py, mv) {
                if sad < best.sad || (sad == best.sad && mv.magnitude_sq() < best.mv.magnitude_sq())
                {
                    best = BlockMatch { mv, sad };
                }
            }
            dx += 2;
        }
        dy += 2;
    }
    best
}

fn finish_block(
    stats: &mut MotionFieldStats,
    bx: usize,
    by: usize,
    best: BlockMatch,
    cur: &PlaneView,
    refr: &PlaneView,
    px: usize,
    py: usize,
) {
    let idx = by * stats.blocks_x + bx;
    stats.block_mvs[idx] = best.mv;
    stats.block_sads[idx] = best.sad;
    stats.sum_abs_mv_x += best.mv.x.unsigned_abs() as i64;
    stats.sum_abs_mv_y += best.mv.y.unsigned_abs() as i64;

    // Block-level pixel variance and the joint/motion-compensated joint
    // variance terms that tcor/mcTcor are ratios of.
    let mut sum = 0i64;
    let mut sum_sq = 0i64;
    for dy in 0..BLOCK {
        for dx in 0..BLOCK {
            let v = cur.get(px + dx, py + dy) as i64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let n = (BLOCK * BLOCK) as i64;
    let mean = sum as f64 / n as f64;
    let var = sum_sq as f64 / n as f64 - mean * mean;
    stats.var += var;

    // Joint variance against the co-located (zero-MV) reference block.
    if let Some(jt) = sad_at(*cur, *refr, px, py, MotionVector::default()) {
        stats.jtvar += (jt as f64) * (jt as f64) / (n * n) as f64;
    }
    // Motion-compensated joint variance against the matched reference block.
    stats.mcjtvar += (best.sad as f64) * (best.sad as f64) / (n * n) as f64;
}
