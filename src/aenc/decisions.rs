// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame sub-decisions applied to a closed mini-GOP, in source order:
//! ALTR, AREF, APQ classification, DPB update, ref-list build, and the
//! final delta-QP assembly. Lookup tables here are copied verbatim from
//! the original source and must not be "cleaned up" or re-derived.

use super::dpb::Dpb;
use super::types::{CodecId, FrameType, InternalFrame, LtrKind};
use crate::scd::classify::{contrast_index, mv_index, sc_index, tsc_index};

pub const AREF_KEY_FRAME_INTERVAL: u32 = 32;

/// `APQ_Lookup_AVC[qsc][qcon][qmv][qtsc]`.
#[rustfmt::skip]
pub const APQ_LOOKUP_AVC: [[[[u32; 6]; 3]; 3]; 4] = [
    [[[3,3,3,3,3,2],[1,1,2,2,2,1],[3,2,2,2,2,1]],
     [[2,3,3,3,3,2],[1,1,2,2,2,2],[3,2,2,2,2,1]],
     [[2,2,3,3,2,2],[1,1,2,2,2,2],[2,1,2,2,2,2]]],
    [[[2,2,2,3,3,2],[2,2,2,1,1,1],[2,2,1,1,1,1]],
     [[2,2,2,2,1,1],[2,2,2,2,1,1],[3,2,2,1,1,1]],
     [[2,2,2,2,2,2],[3,2,2,1,1,1],[2,2,2,2,1,1]]],
    [[[2,2,2,2,2,2],[2,2,2,2,2,2],[2,2,2,2,1,1]],
     [[2,2,2,2,2,2],[2,2,2,2,2,2],[2,2,2,2,2,1]],
     [[2,2,2,2,2,2],[2,2,2,2,2,2],[1,1,2,2,1,1]]],
    [[[3,2,2,2,2,2],[3,2,2,2,2,2],[2,2,2,2,2,1]],
     [[2,3,3,3,2,2],[2,2,2,2,2,2],[2,2,2,2,2,1]],
     [[2,2,2,2,2,2],[2,2,2,2,2,2],[2,2,2,2,2,2]]],
];

/// `APQ_Lookup_HEVC[qsc][qcon][qmv][qtsc]`.
#[rustfmt::skip]
pub const APQ_LOOKUP_HEVC: [[[[u32; 6]; 3]; 3]; 4] = [
    [[[3,3,3,3,3,2],[1,1,0,0,1,1],[3,2,2,2,2,2]],
     [[3,3,3,3,3,2],[3,0,0,0,1,2],[1,1,2,2,2,2]],
     [[0,0,3,3,2,2],[1,1,0,0,1,1],[0,1,1,1,1,1]]],
    [[[2,2,2,3,3,2],[2,2,1,2,2,2],[2,2,1,2,2,2]],
     [[3,2,2,2,2,1],[3,3,1,1,2,2],[1,1,1,1,2,2]],
     [[3,3,2,2,2,1],[3,3,1,1,2,2],[1,1,1,1,2,2]]],
    [[[2,2,2,2,2,2],[2,2,2,2,2,2],[0,0,0,2,2,2]],
     [[2,2,2,2,2,1],[2,2,2,2,2,2],[2,2,2,2,2,2]],
     [[2,1,1,2,2,2],[2,2,2,2,2,2],[1,2,2,2,2,2]]],
    [[[3,2,2,2,2,2],[3,2,2,2,2,2],[2,2,0,0,0,0]],
     [[2,3,3,3,2,2],[2,2,2,2,2,2],[2,2,2,2,2,2]],
     [[2,2,2,2,2,2],[2,2,2,2,2,2],[2,2,2,2,2,2]]],
];

/// Cumulative delta-QP totals per `(class_apq, pyramid_layer in 1..=4)`,
/// hand-expanded from `AdjustQpApq`'s switch/case fall-through ladder
/// (base `+1`, then case 4 -> 3 -> 2 -> 1 add in sequence). These are the
/// *observed totals*, not a re-derivation, and must match the original
/// bit-for-bit:
///
/// - class 0 (`else` branch): +1,+2,+1,+0 per level -> totals [1,2,4,5]
/// - class 1: +1,+2,+1,+2 per level               -> totals [3,4,6,7]
/// - class 2: +1,+2,+1,+1 per level                -> totals [2,3,5,6]
/// - class 3: +1,+1,+1,-1 per level                -> totals [0,1,2,3]
pub const APQ_CUMULATIVE_DELTA: [[i32; 4]; 4] = [[1, 2, 4, 5], [3, 4, 6, 7], [2, 3, 5, 6], [0, 1, 2, 3]];

pub fn moving_average(val: i32, avg: i32, n: i32) -> i32 {
    if avg <= 0 || n == 0 {
        val
    } else {
        avg + (val - avg) / n
    }
}

/// ALTR promotion state carried on the controller, since it spans frames
/// (the "last LTR" POC/QP, the short-window MV average).
pub struct AltrState {
    pub last_ltr_poc: u32,
    pub altr_on: bool,
    pub avg_mv0: i32,
    pub last_p_frame_qp: Option<u32>,
    pub last_p_frame_poc: Option<u32>,
    pub stored_ltr_qp: Option<u32>,
}

impl AltrState {
    pub fn new() -> Self {
        Self {
            last_ltr_poc: 0,
            altr_on: false,
            avg_mv0: 0,
            last_p_frame_qp: None,
            last_p_frame_poc: None,
            stored_ltr_qp: None,
        }
    }
}

impl Default for AltrState {
    fn default() -> Self {
        Self::new()
    }
}

/// `make_altr_decision`.
pub fn make_altr_decision(frame: &mut InternalFrame, state: &mut AltrState, dpb: &mut Dpb) {
    let poc = frame.poc();

    if poc == 0 {
        mark_altr(frame, state);
        return;
    }

    if frame.frame_type == FrameType::Idr && (state.altr_on || frame.analysis.ltr_hint) {
        mark_altr(frame, state);
        return;
    }

    if frame.frame_type != FrameType::B
        && frame.analysis.scene_changed
        && poc > state.last_ltr_poc + 16
    {
        mark_altr(frame, state);
        return;
    }

    if frame.frame_type != FrameType::B && frame.analysis.ltr_hint {
        if let (Some(p_qp), Some(ltr_qp), Some(p_poc)) =
            (state.last_p_frame_qp, state.stored_ltr_qp, state.last_p_frame_poc)
        {
            if p_qp < ltr_qp && p_poc != state.last_ltr_poc {
                retroactively_promote(frame, state, dpb, p_poc, p_qp);
            }
        }
    }

    let mv = frame.analysis.mv_size;
    let tsc = frame.analysis.tsc;
    let recent_high_mv = frame.analysis.recent_high_mv_count;
    let sc = frame.analysis.sc;
    if (mv > 2300 || tsc > 1024 || (mv > 1024 && recent_high_mv > 6)) && sc > 4 {
        frame.use_ltr_as_reference = false;
    }
}

fn mark_altr(frame: &mut InternalFrame, state: &mut AltrState) {
    frame.ltr = LtrKind::Altr;
    frame.keep_in_dpb = true;
    state.last_ltr_poc = frame.poc();
    state.altr_on = true;
    state.avg_mv0 = 0;
}

/// Re-assigns the LTR slot to the past P frame at `p_poc` (already sitting
/// in the DPB as a regular reference), evicting whatever held the LTR slot
/// before it. The evicted POC is reported on `frame`, the frame currently
/// being decided, since that is the decision the caller is about to emit.
fn retroactively_promote(frame: &mut InternalFrame, state: &mut AltrState, dpb: &mut Dpb, p_poc: u32, p_qp: u32) {
    let old_ltr_poc = state.last_ltr_poc;

    let Some(past) = dpb.find_mut(p_poc) else {
        return;
    };
    past.ltr = LtrKind::Altr;
    past.keep_in_dpb = true;

    if let Some(removed) = dpb.remove(old_ltr_poc) {
        frame.remove_from_dpb.push(removed.poc());
    }

    state.last_ltr_poc = p_poc;
    state.altr_on = true;
    state.stored_ltr_qp = Some(p_qp);
}

/// AREF bookkeeping: the POC of the most recent key-P reference frame.
pub struct ArefState {
    pub last_aref_poc: Option<u32>,
}

impl ArefState {
    pub fn new() -> Self {
        Self { last_aref_poc: None }
    }
}

impl Default for ArefState {
    fn default() -> Self {
        Self::new()
    }
}

/// `make_aref_decision`: only meaningful when ALTR is disabled.
pub fn make_aref_decision(frame: &mut InternalFrame, state: &mut ArefState) {
    if frame.ltr != LtrKind::None {
        return;
    }

    let is_key_candidate = frame.frame_type == FrameType::Idr
        || (frame.frame_type != FrameType::B && frame.analysis.scene_changed);

    if is_key_candidate {
        frame.ltr = LtrKind::Aref;
        frame.keep_in_dpb = true;
        state.last_aref_poc = Some(frame.poc());
        return;
    }

    if frame.frame_type == FrameType::P {
        let since_last = match state.last_aref_poc {
            Some(last) => frame.poc().saturating_sub(last),
            None => AREF_KEY_FRAME_INTERVAL,
        };
        if since_last >= AREF_KEY_FRAME_INTERVAL {
            frame.ltr = LtrKind::Aref;
            frame.keep_in_dpb = true;
            state.last_aref_poc = Some(frame.poc());
        }
    }
}

/// Rolling 8-tap moving averages of SC/TSC/MVSize, feeding the APQ
/// classifier. Carried as controller state across frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApqAverages {
    pub sc_avg: i32,
    pub tsc_avg: i32,
    pub mv_avg: i32,
}

const APQ_AVERAGE_TAPS: i32 = 8;

/// Updates the moving averages and classifies `frame.class_apq` via the
/// codec-specific lookup table.
pub fn compute_apq_stats(frame: &mut InternalFrame, averages: &mut ApqAverages, codec: CodecId) {
    averages.sc_avg = moving_average(frame.analysis.sc as i32, averages.sc_avg, APQ_AVERAGE_TAPS);
    averages.tsc_avg = moving_average(frame.analysis.tsc as i32, averages.tsc_avg, APQ_AVERAGE_TAPS);
    averages.mv_avg = moving_average(frame.analysis.mv_size as i32, averages.mv_avg, APQ_AVERAGE_TAPS);

    let qsc = sc_index(averages.sc_avg.max(0) as u32).min(3) as usize;
    let qcon = contrast_index(frame.analysis.contrast).min(2) as usize;
    let qmv = mv_index(averages.mv_avg.max(0) as u32).min(2) as usize;
    let qtsc = tsc_index(averages.tsc_avg.max(0) as u32).min(5) as usize;

    frame.class_apq = match codec {
        CodecId::Hevc => APQ_LOOKUP_HEVC[qsc][qcon][qmv][qtsc],
        _ => APQ_LOOKUP_AVC[qsc][qcon][qmv][qtsc],
    };
}

/// DPB update, steps (d)1-2: rotate regular refs, then handle an
/// ALTR/AREF promotion by evicting any existing LTR-kind entry. Appends
/// the evicted POCs to `frame.remove_from_dpb` and pushes a DPB copy of
/// `frame` in as needed.
pub fn update_dpb(dpb: &mut Vec<InternalFrame>, frame: &mut InternalFrame, num_ref_p: u32) {
    let mut evicted = Vec::new();

    if frame.frame_type != FrameType::B && frame.ltr == LtrKind::None {
        if (dpb.len() as u32) < num_ref_p {
            dpb.push(frame.clone());
        } else if dpb.len() > 1 {
            if let Some(pos) = dpb
                .iter()
                .enumerate()
                .filter(|(_, f)| f.ltr == LtrKind::None)
                .min_by_key(|(_, f)| f.poc())
                .map(|(i, _)| i)
            {
                let removed = dpb.remove(pos);
                evicted.push(removed.poc());
                dpb.push(frame.clone());
            }
        }
    }

    if frame.ltr != LtrKind::None {
        let mut i = 0;
        while i < dpb.len() {
            if dpb[i].ltr != LtrKind::None {
                let removed = dpb.remove(i);
                evicted.push(removed.poc());
            } else {
                i += 1;
            }
        }
        frame.keep_in_dpb = true;
        dpb.push(frame.clone());
    }

    frame.remove_from_dpb.extend(evicted);
}

/// Builds the reference list for P frames: LTR POC when usable, AREF POC
/// for the most recent key-P.
pub fn build_ref_list(frame: &mut InternalFrame, altr_state: &AltrState, aref_state: &ArefState) {
    if frame.frame_type != FrameType::P {
        return;
    }
    if frame.use_ltr_as_reference && altr_state.altr_on {
        frame.ref_list.push(altr_state.last_ltr_poc);
        frame.long_term_ref_list.push(altr_state.last_ltr_poc);
    }
    if let Some(last_aref) = aref_state.last_aref_poc {
        frame.ref_list.push(last_aref);
    }
}

/// `AdjustQp`: resets `delta_qp` then applies the enabled sub-decisions
/// in source order (LTR, AREF, APQ, AGOP-fallback).
#[allow(clippy::too_many_arguments)]
pub fn adjust_qp(
    frame: &mut InternalFrame,
    altr_on: bool,
    aref_on: bool,
    apq_on: bool,
    agop_on: bool,
    altr_state: &AltrState,
    has_low_activity: bool,
    p_pyramid_idx: &mut u32,
) {
    frame.delta_qp = 0;

    if altr_on {
        adjust_qp_ltr(frame, altr_state, apq_on);
    }
    if aref_on {
        adjust_qp_aref(frame, has_low_activity, apq_on);
    }
    if apq_on {
        adjust_qp_apq(frame);
    }
    if agop_on && !altr_on && !aref_on && !apq_on {
        adjust_qp_agop(frame, p_pyramid_idx);
    }
}

fn default_b_frame_offset(frame: &mut InternalFrame, apq_on: bool) {
    if !apq_on && matches!(frame.mini_gop_type, 4 | 8 | 16) && frame.pyramid_layer != 0 {
        frame.delta_qp = frame.pyramid_layer as i32;
    }
}

fn adjust_qp_ltr(frame: &mut InternalFrame, altr_state: &AltrState, apq_on: bool) {
    if frame.frame_type != FrameType::B {
        if frame.ltr == LtrKind::Altr {
            frame.delta_qp = if frame.poc() == 0 {
                -4
            } else if altr_state.avg_mv0 > 1500 || frame.poc().saturating_sub(altr_state.last_ltr_poc) < 32 {
                -2
            } else {
                -4
            };
        }
    } else {
        default_b_frame_offset(frame, apq_on);
    }
}

fn adjust_qp_aref(frame: &mut InternalFrame, has_low_activity: bool, apq_on: bool) {
    if frame.frame_type != FrameType::B {
        if frame.ltr == LtrKind::Aref {
            frame.delta_qp = if frame.analysis.sc > 4 && has_low_activity { -4 } else { -2 };
        }
    } else {
        default_b_frame_offset(frame, apq_on);
    }
}

fn adjust_qp_apq(frame: &mut InternalFrame) {
    if matches!(frame.frame_type, FrameType::I | FrameType::Idr | FrameType::P) {
        return;
    }
    let gop_size = frame.mini_gop_type;
    if gop_size >= 8 {
        let level = frame.pyramid_layer.clamp(1, 4);
        let class = frame.class_apq.min(3) as usize;
        frame.delta_qp = APQ_CUMULATIVE_DELTA[class][(level - 1) as usize];
    } else if gop_size == 4 {
        frame.delta_qp = 1 + frame.pyramid_layer as i32;
    } else {
        frame.delta_qp = 3;
    }
}

fn adjust_qp_agop(frame: &mut InternalFrame, p_pyramid_idx: &mut u32) {
    let gop_size = frame.mini_gop_type;
    if matches!(frame.frame_type, FrameType::I | FrameType::Idr)
        || (frame.frame_type == FrameType::P && gop_size > 4)
    {
        return;
    }
    if frame.pyramid_layer != 0 {
        frame.delta_qp = match gop_size {
            g if g >= 8 => frame.pyramid_layer as i32 + 1,
            4 => frame.pyramid_layer as i32 + 1,
            2 => 4,
            _ => 0,
        };
    } else if gop_size > 1 {
        frame.delta_qp = 1;
    } else {
        let idx = (*p_pyramid_idx as usize) % super::minigop::P_PYRAMID.len();
        frame.p_pyramid_idx = *p_pyramid_idx;
        frame.p_pyramid_layer = super::minigop::P_PYRAMID[idx];
        frame.delta_qp = frame.p_pyramid_layer as i32;
        *p_pyramid_idx = p_pyramid_idx.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scd::{AnalysisRecord, FrameSnapshot};
    use std::rc::Rc;

    fn frame(poc: u32, frame_type: FrameType) -> InternalFrame {
        let analysis = Rc::new(AnalysisRecord {
            poc,
            scene_changed: false,
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
            agop_hint: 16,
            persistence_map: [0; 128],
            snapshot: Rc::new(FrameSnapshot {
                image: Vec::new(),
                stat: Default::default(),
            }),
        });
        let mut f = InternalFrame::new(analysis);
        f.frame_type = frame_type;
        f
    }

    #[test]
    fn poc_zero_is_always_altr() {
        let mut f = frame(0, FrameType::Idr);
        let mut state = AltrState::new();
        let mut dpb = Dpb::new();
        make_altr_decision(&mut f, &mut state, &mut dpb);
        assert_eq!(f.ltr, LtrKind::Altr);
    }

    #[test]
    fn altr_on_is_set_once_marked() {
        let mut f = frame(0, FrameType::Idr);
        let mut state = AltrState::new();
        let mut dpb = Dpb::new();
        make_altr_decision(&mut f, &mut state, &mut dpb);
        assert!(state.altr_on);
    }

    #[test]
    fn build_ref_list_populates_long_term_ref_list_when_altr_on() {
        let mut f = frame(10, FrameType::P);
        let altr_state = AltrState {
            last_ltr_poc: 0,
            altr_on: true,
            avg_mv0: 0,
            last_p_frame_qp: None,
            last_p_frame_poc: None,
            stored_ltr_qp: None,
        };
        let aref_state = ArefState::new();
        build_ref_list(&mut f, &altr_state, &aref_state);
        assert_eq!(f.long_term_ref_list, vec![0]);
        assert_eq!(f.ref_list, vec![0]);
    }

    #[test]
    fn retroactive_promotion_reassigns_ltr_slot_and_evicts_old_one() {
        let mut state = AltrState::new();
        let mut dpb = Dpb::new();

        let mut altr0 = frame(0, FrameType::Idr);
        make_altr_decision(&mut altr0, &mut state, &mut dpb);
        dpb.update(&mut altr0, 3);

        let mut p40 = frame(40, FrameType::P);
        dpb.update(&mut p40, 3);

        state.last_p_frame_qp = Some(22);
        state.last_p_frame_poc = Some(40);
        state.stored_ltr_qp = Some(26);

        let mut next = frame(41, FrameType::P);
        next.analysis = Rc::new(AnalysisRecord {
            ltr_hint: true,
            ..(*next.analysis).clone()
        });
        make_altr_decision(&mut next, &mut state, &mut dpb);

        assert_eq!(state.last_ltr_poc, 40);
        assert!(state.altr_on);
        assert_eq!(next.remove_from_dpb, vec![0]);
        assert_eq!(dpb.find(40).unwrap().ltr, LtrKind::Altr);
        assert!(dpb.find(0).is_none());
    }

    #[test]
    fn apq_cumulative_table_matches_hand_expansion() {
        assert_eq!(APQ_CUMULATIVE_DELTA[0], [1, 2, 4, 5]);
        assert_eq!(APQ_CUMULATIVE_DELTA[1], [3, 4, 6, 7]);
        assert_eq!(APQ_CUMULATIVE_DELTA[2], [2, 3, 5, 6]);
        assert_eq!(APQ_CUMULATIVE_DELTA[3], [0, 1, 2, 3]);
    }

    #[test]
    fn adjust_qp_apq_uses_cumulative_table() {
        let mut f = frame(5, FrameType::B);
        f.mini_gop_type = 8;
        f.pyramid_layer = 3;
        f.class_apq = 1;
        adjust_qp_apq(&mut f);
        assert_eq!(f.delta_qp, APQ_CUMULATIVE_DELTA[1][2]);
    }

    #[test]
    fn aref_promotes_every_32_p_frames() {
        let mut state = ArefState::new();
        state.last_aref_poc = Some(0);
        let mut f = frame(32, FrameType::P);
        make_aref_decision(&mut f, &mut state);
        assert_eq!(f.ltr, LtrKind::Aref);
    }
}
