// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! RaCa: a full-resolution row/column absolute-difference complexity
//! feature, used as an I-frame complexity hint. Unlike the other stat
//! kernels this runs on the original (not sub-sampled) luma plane.

use super::PlaneView;
use crate::error::StatKernelResult;

const BLOCK: usize = 4;

/// Accumulates `|p - p_right|` and `|p - p_down|` over every 4x4 block of
/// the plane (block-boundary pixels contribute nothing, matching the
/// skip-boundary Rs/Cs convention) and returns `sqrt((Rs/N)^2 + (Cs/N)^2)`.
///
/// `expected_width`/`expected_height` are the caller's declared
/// full-resolution plane dimensions; `plane` must match them exactly.
pub fn raca(plane: PlaneView, expected_width: usize, expected_height: usize) -> StatKernelResult<f32> {
    plane.check_dims(expected_width, expected_height)?;

    let width = plane.width();
    let height = plane.height();
    if width == 0 || height == 0 {
        return Ok(0.0);
    }

    let mut rs: i64 = 0;
    let mut cs: i64 = 0;

    let blocks_x = width / BLOCK;
    let blocks_y = height / BLOCK;

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            for dy in 0..BLOCK {
                let y = by * BLOCK + dy;
                for dx in 0..BLOCK {
                    let x = bx * BLOCK + dx;
                    let p = plane.get(x, y) as i32;

                    if dx + 1 < BLOCK {
                        let right = plane.get(x + 1, y) as i32;
                        cs += (p - right).unsigned_abs() as i64;
                    }
                    if dy + 1 < BLOCK {
                        let down = plane.get(x, y + 1) as i32;
                        rs += (p - down).unsigned_abs() as i64;
                    }
                }
            }
        }
    }

    let n = (blocks_x * BLOCK * blocks_y * BLOCK).max(1) as f64;
    let rs_norm = rs as f64 / n;
    let cs_norm = cs as f64 / n;
    Ok((rs_norm * rs_norm + cs_norm * cs_norm).sqrt() as f32)
}
