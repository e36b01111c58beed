// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mini-GOP assembly: deciding when `frame_buffer` holds a complete
//! mini-GOP, sizing it, and stamping each frame with its B-pyramid layer.
//!
//! The pyramid template tables below are carried over verbatim from the
//! original `MarkFrameInMiniGOP`/`GetMiniGopSizeAGOP` source; they encode
//! specific, load-bearing layer assignments and are not re-derived.

use super::types::{FrameType, InternalFrame};

/// `GopTableIdx[17]`: maps a mini-GOP size (0..=16) to the index of the
/// matching row in [`PYRAMID_LAYER`].
pub const GOP_TABLE_IDX: [usize; 17] = [0, 0, 1, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4];

/// `PyramidLayer[5][16]`: the B-pyramid layer template for mini-GOP sizes
/// 1, 2, 4, 8, 16 (rows 0..4), padded with zeros past each row's length.
pub const PYRAMID_LAYER: [[u32; 16]; 5] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 3, 1, 3, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 4, 2, 4, 3, 4, 1, 4, 3, 4, 2, 4, 3, 4, 0],
];

/// `MiniGopType[5] = {1,2,4,8,16}`.
pub const MINI_GOP_TYPE: [u32; 5] = [1, 2, 4, 8, 16];

/// `PPyramid[8]`, P-pyramid bookkeeping table used by the AGOP fallback
/// when mini-GOP size collapses to 1.
pub const P_PYRAMID: [u32; 8] = [5, 4, 3, 2, 4, 3, 2, 1];

/// A mini-GOP closes once `frame_buffer.len() >= max_mini_gop_size` and
/// the leading frame is non-DUMMY.
pub fn gop_closed(frame_buffer: &[InternalFrame], max_mini_gop_size: u32) -> bool {
    frame_buffer.len() >= max_mini_gop_size as usize
        && frame_buffer
            .first()
            .map(|f| f.frame_type != FrameType::Dummy)
            .unwrap_or(false)
}

/// Scans `frame_buffer` from index 1, truncating at the first IDR, DUMMY,
/// or unplanned scene-change frame (that frame starts the next mini-GOP),
/// or including an I frame in full.
pub fn common_size(frame_buffer: &[InternalFrame], strict_i_frame: bool) -> u32 {
    let mut size = frame_buffer.len() as u32;
    for (i, frame) in frame_buffer.iter().enumerate().skip(1) {
        match frame.frame_type {
            FrameType::Idr | FrameType::Dummy => {
                size = i as u32;
                break;
            }
            FrameType::I => {
                size = (i + 1) as u32;
                break;
            }
            _ => {
                if frame.analysis.scene_changed && !strict_i_frame {
                    size = i as u32;
                    break;
                }
            }
        }
    }
    size.max(1)
}

/// AGOP-adaptive mini-GOP sizing: tries halving candidate sizes from
/// `max_mini_gop_size` down to 2, accepting the first size where a
/// majority of the candidate window's `agop_hint`s support it.
pub fn agop_size(frame_buffer: &[InternalFrame], max_mini_gop_size: u32, agop_enabled: bool) -> u32 {
    if !agop_enabled {
        return max_mini_gop_size;
    }

    let mut s = max_mini_gop_size;
    while s >= 2 {
        let window = &frame_buffer[..(s as usize).min(frame_buffer.len())];
        let full = window.iter().filter(|f| f.analysis.agop_hint >= s).count() as u32;
        let half = window.iter().filter(|f| f.analysis.agop_hint == s / 2).count() as u32;
        let total = full + half;
        let majority = total > s / 2;
        let tie_break_ok = if s <= 8 { full > half } else { true };
        if majority && tie_break_ok {
            return s;
        }
        s /= 2;
    }
    1
}

/// Stamps every frame in a closed mini-GOP of size `s` with its pyramid
/// layer, type (mid-sequence I/IDR keep their type but inherit layer 0;
/// everything else that is not the anchor becomes B), and mini-GOP
/// bookkeeping fields.
pub fn mark_frames_in_mini_gop(frames: &mut [InternalFrame], mini_gop_idx: u32) {
    let s = frames.len() as u32;
    let row = GOP_TABLE_IDX.get(s as usize).copied().unwrap_or(4);
    let template = &PYRAMID_LAYER[row];
    let mini_gop_type = MINI_GOP_TYPE[row];

    let last = frames.len() - 1;
    for (i, frame) in frames.iter_mut().enumerate() {
        frame.mini_gop_size = s;
        frame.mini_gop_type = mini_gop_type;
        frame.mini_gop_idx = mini_gop_idx;

        if i == last {
            frame.pyramid_layer = 0;
            if frame.frame_type == FrameType::Undef {
                frame.frame_type = FrameType::P;
            }
            continue;
        }

        match frame.frame_type {
            FrameType::Idr | FrameType::I => {
                frame.pyramid_layer = 0;
            }
            _ => {
                frame.pyramid_layer = template.get(i).copied().unwrap_or(0);
                frame.frame_type = FrameType::B;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scd::AnalysisRecord;
    use std::rc::Rc;

    fn analysis(poc: u32, agop_hint: u32, scene_changed: bool) -> Rc<AnalysisRecord> {
        Rc::new(AnalysisRecord {
            poc,
            scene_changed,
            repeated_frame: false,
            tsc_idx: 0,
            sc_idx: 0,
            sc: 0,
            tsc: 0,
            mv_size: 0,
            contrast: 0,
            abs_mv_h: 0,
            abs_mv_v: 0,
            mv0_avg: 0.0,
            recent_high_mv_count: 0,
            mc_tcor: 100,
            ltr_hint: false,
            agop_hint,
            persistence_map: [0; 128],
            snapshot: Rc::new(crate::scd::FrameSnapshot {
                image: Vec::new(),
                stat: Default::default(),
            }),
        })
    }

    #[test]
    fn size_one_template_is_all_anchor() {
        let mut frames = vec![InternalFrame::new(analysis(0, 16, false))];
        mark_frames_in_mini_gop(&mut frames, 0);
        assert_eq!(frames[0].pyramid_layer, 0);
        assert_eq!(frames[0].frame_type, FrameType::P);
    }

    #[test]
    fn size_eight_template_matches_table() {
        let mut frames: Vec<InternalFrame> = (1..=8).map(|p| InternalFrame::new(analysis(p, 8, false))).collect();
        mark_frames_in_mini_gop(&mut frames, 0);
        let layers: Vec<u32> = frames.iter().map(|f| f.pyramid_layer).collect();
        assert_eq!(layers, vec![3, 2, 3, 1, 3, 2, 3, 0]);
        assert_eq!(frames[7].frame_type, FrameType::P);
        assert!(frames[..7].iter().all(|f| f.frame_type == FrameType::B));
    }

    #[test]
    fn agop_size_falls_back_to_max_when_disabled() {
        let frames: Vec<InternalFrame> = (0..8).map(|p| InternalFrame::new(analysis(p, 1, false))).collect();
        assert_eq!(agop_size(&frames, 8, false), 8);
    }
}
