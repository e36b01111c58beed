// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Rs/Cs (row-sum / column-sum gradient energy) over 4x4 blocks, and the
//! 4-quadrant contrast measure derived from the same block sums.

use super::PlaneView;
use crate::error::StatKernelResult;

pub const BLOCK: usize = 4;

/// Per-block Rs/Cs plus the frame-level reductions the controller consumes.
#[derive(Clone, Debug)]
pub struct RsCsResult {
    pub blocks_x: usize,
    pub blocks_y: usize,
    /// Per-4x4-block vertical gradient energy.
    pub rs: Vec<u32>,
    /// Per-4x4-block horizontal gradient energy.
    pub cs: Vec<u32>,
    /// `(rs[i] + cs[i]) >> 1` per block.
    pub rscs: Vec<u32>,
    /// Frame-level sum of `rs`.
    pub rs_val: u32,
    /// Frame-level sum of `cs`.
    pub cs_val: u32,
    /// `(max - min) / (max + min)` over the four quadrant block-sums.
    pub contrast: f32,
}

/// `RsCsCalc_4x4`, skip-boundary variant: the first row and column of each
/// 4x4 block contribute zero to the gradient energy (no valid predecessor
/// pixel inside the plane to diff against).
pub fn rscs_4x4_skip(plane: PlaneView) -> StatKernelResult<RsCsResult> {
    rscs_4x4_impl(plane, true)
}

/// `RsCsCalc_bound`, replicated-border variant: the boundary row/column
/// diffs against a clamped neighbour instead of being skipped.
pub fn rscs_4x4_bound(plane: PlaneView) -> StatKernelResult<RsCsResult> {
    rscs_4x4_impl(plane, false)
}

fn rscs_4x4_impl(plane: PlaneView, skip_first: bool) -> StatKernelResult<RsCsResult> {
    plane.check_subsampled_dims()?;

    let blocks_x = plane.width() / BLOCK;
    let blocks_y = plane.height() / BLOCK;
    let mut rs = vec![0u32; blocks_x * blocks_y];
    let mut cs = vec![0u32; blocks_x * blocks_y];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let mut block_rs = 0u32;
            let mut block_cs = 0u32;
            for dy in 0..BLOCK {
                let y = by * BLOCK + dy;
                for dx in 0..BLOCK {
                    let x = bx * BLOCK + dx;
                    let cur = plane.get(x, y) as i32;

                    let dv = if y == 0 {
                        if skip_first {
                            0
                        } else {
                            // Replicated-border: diff against the first
                            // interior row instead of dropping the pixel.
                            let neighbour_y = if plane.height() > 1 { 1 } else { 0 };
                            cur - plane.get(x, neighbour_y) as i32
                        }
                    } else {
                        cur - plane.get(x, y - 1) as i32
                    };
                    let dh = if x == 0 {
                        if skip_first {
                            0
                        } else {
                            let neighbour_x = if plane.width() > 1 { 1 } else { 0 };
                            cur - plane.get(neighbour_x, y) as i32
                        }
                    } else {
                        cur - plane.get(x - 1, y) as i32
                    };

                    let v = (dv.unsigned_abs() >> 2) as u32;
                    let h = (dh.unsigned_abs() >> 2) as u32;
                    block_rs += v * v;
                    block_cs += h * h;
                }
            }
            rs[by * blocks_x + bx] = block_rs;
            cs[by * blocks_x + bx] = block_cs;
        }
    }

    let rscs: Vec<u32> = rs.iter().zip(cs.iter()).map(|(r, c)| (r + c) >> 1).collect();
    let rs_val: u32 = rs.iter().sum();
    let cs_val: u32 = cs.iter().sum();
    let contrast = quadrant_contrast(&rs, &cs, blocks_x, blocks_y);

    Ok(RsCsResult {
        blocks_x,
        blocks_y,
        rs,
        cs,
        rscs,
        rs_val,
        cs_val,
        contrast,
    })
}

/// Splits the block grid into four quadrants, sums `rs+cs` within each,
/// and returns `(max-min)/(max+min)` over the four quadrant sums.
fn quadrant_contrast(rs: &[u32], cs: &[u32], blocks_x: usize, blocks_y: usize) -> f32 {
    let half_x = blocks_x / 2;
    let half_y = blocks_y / 2;
    let mut quad_sums = [0u64; 4];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let idx = by * blocks_x + bx;
            let quad = (if by < half_y { 0 } else { 2 }) + (if bx < half_x { 0 } else { 1 });
            quad_sums[quad] += (rs[idx] + cs[idx]) as u64;
        }
    }

    let max = *quad_sums.iter().max().unwrap_or(&0);
    let min = *quad_sums.iter().min().unwrap_or(&0);
    if max + min == 0 {
        0.0
    } else {
        (max - min) as f32 / (max + min) as f32
    }
}
