// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-block QP map (PAQ): turns the controller's persistence map into a
//! delta-QP map biased toward leaving long-stable blocks at a lower QP,
//! then upsamples it to the encoder's actual block grid.

pub const PAQ_MAP_WIDTH: usize = 16;
pub const PAQ_MAP_HEIGHT: usize = 8;
pub const MIN_PAQ_QP: u32 = 10;

fn depth_by_qp(qp: u32) -> i32 {
    match qp {
        0..=15 => 2,
        16..=20 => 3,
        21..=25 => 4,
        26..=30 => 5,
        _ => 6,
    }
}

/// Builds the 8x16 delta-QP map. Returns `None` when the persistence map
/// is all zero (no stable blocks to discount).
pub fn build_delta_qp_map(persistence_map: &[u8; 128], frame_qp: u32) -> Option<[i32; 128]> {
    if persistence_map.iter().all(|&p| p == 0) {
        return None;
    }
    let depth = depth_by_qp(frame_qp);
    let mut map = [0i32; 128];
    for (i, &p) in persistence_map.iter().enumerate() {
        let persistence_term = (p as i32 + 1) / 3;
        map[i] = -depth.min(persistence_term);
    }
    Some(map)
}

/// Mean of the delta map, to subtract from the seed QP so the map's
/// average does not shift the frame's overall operating point.
pub fn frame_level_bias(delta_map: &[i32; 128]) -> f32 {
    delta_map.iter().sum::<i32>() as f32 / delta_map.len() as f32
}

/// Upsamples the 16x8 delta map nearest-neighbour to a `dst_width x
/// dst_height` block grid and applies it to `frame_qp`, clamped to a
/// valid absolute QP range.
pub fn upsample_and_apply(
    delta_map: &[i32; 128],
    frame_qp: u32,
    dst_width: usize,
    dst_height: usize,
) -> Vec<u32> {
    let mut out = vec![frame_qp; dst_width * dst_height];
    for dy in 0..dst_height {
        let sy = dy * PAQ_MAP_HEIGHT / dst_height.max(1);
        for dx in 0..dst_width {
            let sx = dx * PAQ_MAP_WIDTH / dst_width.max(1);
            let delta = delta_map[sy * PAQ_MAP_WIDTH + sx];
            let qp = (frame_qp as i32 + delta).clamp(1, 51) as u32;
            out[dy * dst_width + dx] = qp;
        }
    }
    out
}
