// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Histogram-diff kernel: bucket per-pixel `src - ref` differences into five
//! bins and report the plane DC sums needed for gain-correction decisions.

use super::PlaneView;
use crate::error::StatKernelResult;

/// Bin edges, in ascending order: `(-inf,-12) [-12,-4) [-4,4) [4,12) [12,inf)`.
pub const BIN_THRESHOLDS: [i32; 4] = [-12, -4, 4, 12];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistogramDiff {
    /// Per-bin pixel counts, bins ordered as [`BIN_THRESHOLDS`] implies.
    pub bins: [u32; 5],
    /// Sum of all source-plane pixel values.
    pub src_dc_sum: u64,
    /// Sum of all reference-plane pixel values.
    pub ref_dc_sum: u64,
    /// Sum of `|src - ref|` over the plane, backing the average frame
    /// difference (AFD) feature used in repeated-frame detection.
    pub abs_diff_sum: u64,
}

impl HistogramDiff {
    pub fn src_avg_luma(&self, pixel_count: u32) -> u32 {
        if pixel_count == 0 {
            0
        } else {
            (self.src_dc_sum / pixel_count as u64) as u32
        }
    }

    pub fn ref_avg_luma(&self, pixel_count: u32) -> u32 {
        if pixel_count == 0 {
            0
        } else {
            (self.ref_dc_sum / pixel_count as u64) as u32
        }
    }

    /// Average frame difference: mean `|src - ref|` over the plane.
    pub fn afd(&self, pixel_count: u32) -> u32 {
        if pixel_count == 0 {
            0
        } else {
            (self.abs_diff_sum / pixel_count as u64) as u32
        }
    }
}

/// Computes the histogram-diff over the full plane. Exact integer
/// arithmetic throughout — no SIMD saturation shortcuts are permitted, per
/// the spec, since this kernel backs the scalar reference other
/// implementations are checked against.
pub fn histogram_diff(src: PlaneView, refr: PlaneView) -> StatKernelResult<HistogramDiff> {
    src.check_subsampled_dims()?;
    refr.check_subsampled_dims()?;

    let mut out = HistogramDiff::default();

    for y in 0..src.height() {
        for x in 0..src.width() {
            let s = src.get(x, y) as i32;
            let r = refr.get(x, y) as i32;
            out.src_dc_sum += s as u64;
            out.ref_dc_sum += r as u64;

            let diff = s - r;
            out.abs_diff_sum += diff.unsigned_abs() as u64;
            let bin = BIN_THRESHOLDS
                .iter()
                .position(|&th| diff < th)
                .unwrap_or(BIN_THRESHOLDS.len());
            out.bins[bin] += 1;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH};

    #[test]
    fn identical_planes_land_in_middle_bin() {
        let data = vec![100u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        let plane = PlaneView::new(&data, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);
        let diff = histogram_diff(plane, plane).unwrap();
        assert_eq!(diff.bins[2], (SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT) as u32);
        assert_eq!(diff.bins.iter().filter(|&&b| b != 0).count(), 1);
    }

    #[test]
    fn constant_offset_shifts_bin() {
        let src = vec![120u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        let refr = vec![100u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        let src_plane = PlaneView::new(&src, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);
        let ref_plane = PlaneView::new(&refr, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);
        let diff = histogram_diff(src_plane, ref_plane).unwrap();
        // diff = +20, falls in the last bin ([12, inf))
        assert_eq!(diff.bins[4], (SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT) as u32);
        assert_eq!(diff.src_avg_luma((SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT) as u32), 120);
        assert_eq!(diff.ref_avg_luma((SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT) as u32), 100);
    }
}
