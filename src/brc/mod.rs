// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitrate controller: a two-phase `get_frame_ctrl`/`update` protocol
//! driven once per frame by the caller, backed by an HRD buffer model,
//! a sliding-window max-frame-size tracker, and an optional per-block
//! QP map derived from the scene detector's persistence map.

pub mod hrd;
pub mod paq;
pub mod window;

use crate::aenc::{CodecId, FrameType};
use crate::error::{BrcError, BrcResult};
use hrd::{H264Hrd, HevcHrd, HrdCodecSpec, HrdParams};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use window::AvgBitrate;

const LA_P_UPDATE_DIST: usize = 15;
const MAX_GOP_REFDIST: usize = 16;
const RECODE_BUDGET_NORMAL: u32 = 2;
const RECODE_BUDGET_PANIC: u32 = 4;

/// Look-ahead sub-context: the running memory a look-ahead-driven QP
/// floor model needs between frames.
#[derive(Clone, Debug, Default)]
pub struct LaCtx {
    last_la_p_bits_avg: VecDeque<u64>,
    last_i_bits: u64,
    frames_since_calc: u32,
    frames_since_update: u32,
}

impl LaCtx {
    fn new() -> Self {
        Self {
            last_la_p_bits_avg: VecDeque::with_capacity(LA_P_UPDATE_DIST + MAX_GOP_REFDIST),
            last_i_bits: 0,
            frames_since_calc: 0,
            frames_since_update: 0,
        }
    }

    fn is_calc_la_qp_dist(&self) -> bool {
        self.frames_since_calc == 0
    }

    fn is_update_la_qp_dist(&self) -> bool {
        self.frames_since_update >= LA_P_UPDATE_DIST as u32
    }

    fn push_la_p_bits(&mut self, bits: u64) {
        self.last_la_p_bits_avg.push_back(bits);
        while self.last_la_p_bits_avg.len() > LA_P_UPDATE_DIST + MAX_GOP_REFDIST {
            self.last_la_p_bits_avg.pop_front();
        }
        self.frames_since_update = 0;
    }

    fn la_p_bits_avg(&self) -> Option<u64> {
        if self.last_la_p_bits_avg.is_empty() {
            return None;
        }
        Some(self.last_la_p_bits_avg.iter().sum::<u64>() / self.last_la_p_bits_avg.len() as u64)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BrcParams {
    pub codec: CodecId,
    pub hrd: HrdParams,
    pub window: usize,
    pub gop_pic_size: u32,
    pub quant_idr: u32,
    pub quant_i: u32,
    pub quant_p: u32,
    pub quant_b: u32,
    pub mbbrc: bool,
    pub la_depth: u32,
    pub bpanic: bool,
}

impl BrcParams {
    fn validate(&self) -> BrcResult<()> {
        if self.hrd.bitrate_bps == 0 {
            return Err(BrcError::InvalidParam("bitrate_bps must be nonzero"));
        }
        if self.window == 0 {
            return Err(BrcError::InvalidParam("window must be nonzero"));
        }
        for (name, q) in [
            ("quant_idr", self.quant_idr),
            ("quant_i", self.quant_i),
            ("quant_p", self.quant_p),
            ("quant_b", self.quant_b),
        ] {
            if q == 0 || q > 51 {
                return Err(BrcError::InvalidParam(match name {
                    "quant_idr" => "quant_idr out of [1,51]",
                    "quant_i" => "quant_i out of [1,51]",
                    "quant_p" => "quant_p out of [1,51]",
                    _ => "quant_b out of [1,51]",
                }));
            }
        }
        Ok(())
    }
}

/// Look-ahead hints, present only when the caller drives a look-ahead
/// encode session alongside this one.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookAheadHint {
    pub cur_bits: u64,
    pub avg_bits: u64,
    pub dist_to_next_i: u32,
    pub frame_cmplx: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameParam {
    pub enc_order: u64,
    pub display_order: u32,
    pub frame_type: FrameType,
    pub pyramid_layer: u32,
    pub scene_changed: bool,
    pub long_term_ref: bool,
    pub look_ahead: Option<LookAheadHint>,
}

#[derive(Clone, Debug)]
pub struct FrameCtrl {
    pub qp_y: u32,
    pub qp_delta_map: Option<Vec<i32>>,
    pub max_frame_size_bits: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    BigFrame,
    SmallFrame,
    PanicBigFrame,
    PanicSmallFrame,
}

#[derive(Clone, Copy, Debug)]
struct RunningAverages {
    f_ab_long: f64,
    f_ab_short: f64,
    f_ab_la: f64,
    d_quant_ab: f64,
    total_deviation: i64,
}

impl Default for RunningAverages {
    fn default() -> Self {
        Self {
            f_ab_long: 0.0,
            f_ab_short: 0.0,
            f_ab_la: 0.0,
            d_quant_ab: 0.0,
            total_deviation: 0,
        }
    }
}

pub struct BrcSession {
    params: BrcParams,
    hrd: Box<dyn HrdCodecSpec>,
    window: AvgBitrate,
    la_ctx: LaCtx,
    avg: RunningAverages,
    last_i_qp_raca: Option<f32>,
    last_i_qp: Option<u32>,
    last_i_cmplx: Option<f32>,
    recode_count_normal: u32,
    recode_count_panic: u32,
}

impl BrcSession {
    pub fn new(params: BrcParams) -> BrcResult<Self> {
        params.validate()?;
        let mut hrd: Box<dyn HrdCodecSpec> = match params.codec {
            CodecId::Hevc => Box::new(HevcHrd::new()),
            CodecId::Avc | CodecId::Av1 => Box::new(H264Hrd::new()),
        };
        hrd.init(params.hrd)?;
        let max_bits_per_frame = (params.hrd.bitrate_bps as f64 / 30.0 * 4.0) as u64;
        let avg_bits = (params.hrd.bitrate_bps as f64 / 30.0) as u64;
        Ok(Self {
            params,
            hrd,
            window: AvgBitrate::new(params.window, max_bits_per_frame, avg_bits),
            la_ctx: LaCtx::new(),
            avg: RunningAverages::default(),
            last_i_qp_raca: None,
            last_i_qp: None,
            last_i_cmplx: None,
            recode_count_normal: 0,
            recode_count_panic: 0,
        })
    }

    pub fn reset(&mut self, params: BrcParams) -> BrcResult<()> {
        params.validate()?;
        self.hrd.reset(params.hrd)?;
        let max_bits_per_frame = (params.hrd.bitrate_bps as f64 / 30.0 * 4.0) as u64;
        let avg_bits = (params.hrd.bitrate_bps as f64 / 30.0) as u64;
        self.window = AvgBitrate::new(params.window, max_bits_per_frame, avg_bits);
        self.la_ctx = LaCtx::new();
        self.avg = RunningAverages::default();
        self.recode_count_normal = 0;
        self.recode_count_panic = 0;
        self.params = params;
        Ok(())
    }

    fn base_qp(&self, frame_type: FrameType) -> u32 {
        match frame_type {
            FrameType::Idr => self.params.quant_idr,
            FrameType::I => self.params.quant_i,
            FrameType::P => self.params.quant_p,
            FrameType::B | FrameType::Dummy | FrameType::Undef => self.params.quant_b,
        }
    }

    /// Step 2: derive an intra QP floor from whichever model has data —
    /// the look-ahead P-average when one is running, otherwise a
    /// logistic complexity fit seeded from the previous I frame.
    fn intra_qp_floor(&self, frame: &FrameParam) -> Option<u32> {
        if self.la_ctx.is_calc_la_qp_dist() {
            if let Some(la) = frame.look_ahead {
                if let Some(avg) = self.la_ctx.la_p_bits_avg() {
                    if avg > 0 && self.la_ctx.last_i_bits > 0 {
                        let scale = la.avg_bits as f64 / avg as f64;
                        let floor = (self.last_i_qp.unwrap_or(self.params.quant_i) as f64 * scale.sqrt()) as u32;
                        return Some(floor.clamp(1, 51));
                    }
                }
            }
        }
        if let (Some(raca), Some(cmplx)) = (self.last_i_qp_raca, self.last_i_cmplx) {
            if raca > 0.0 {
                let logit = 1.0 / (1.0 + (-(cmplx as f64 - raca as f64) / 8.0).exp());
                let floor = (self.params.quant_i as f64 * (0.5 + logit)) as u32;
                return Some(floor.clamp(1, 51));
            }
        }
        None
    }

    pub fn get_frame_ctrl(&mut self, frame: FrameParam) -> BrcResult<FrameCtrl> {
        let mut qp = self.base_qp(frame.frame_type) as i32;

        if matches!(frame.frame_type, FrameType::Idr | FrameType::I) {
            if let Some(floor) = self.intra_qp_floor(&frame) {
                qp = qp.max(floor as i32);
            }
        }

        let deviation = self.hrd.buffer_deviation(frame.enc_order);
        let deviation_factor = self.hrd.buffer_deviation_factor(frame.enc_order);
        if deviation_factor > 0.1 {
            qp += 1;
        } else if deviation_factor < -0.1 {
            qp -= 1;
        }

        if self.avg.f_ab_short > 0.0 && self.avg.f_ab_long > 0.0 {
            let short_term = if frame.look_ahead.is_some() && self.avg.f_ab_la > 0.0 {
                self.avg.f_ab_la
            } else {
                self.avg.f_ab_short
            };
            let ratio = short_term / self.avg.f_ab_long;
            if ratio > 1.1 {
                qp += 1;
            } else if ratio < 0.9 {
                qp -= 1;
            }
        }

        let (q_min, q_max) = (self.hrd.get_min_qp().max(1), self.hrd.get_max_qp().min(51));
        qp = qp.clamp(q_min as i32, q_max as i32);
        let qp_y = qp as u32;
        self.pending_qp = Some(qp_y);

        // The per-block map needs the scene detector's persistence map,
        // which this call does not carry; callers that want it go
        // through `apply_persistence_map` once they have it.
        let qp_delta_map = None;

        let max_frame_size_bits = self
            .window
            .get_budget()
            .min(self.hrd.max_frame_size_bits(frame.enc_order, false));

        trace!(
            "brc: enc_order {} type {:?} qp {} max_frame_size {} deviation {} total_deviation {} d_quant_ab {:.4}",
            frame.enc_order,
            frame.frame_type,
            qp_y,
            max_frame_size_bits,
            deviation,
            self.avg.total_deviation,
            self.avg.d_quant_ab
        );

        Ok(FrameCtrl {
            qp_y,
            qp_delta_map,
            max_frame_size_bits,
        })
    }

    /// Applies the caller's per-block QP map to this frame's output,
    /// for callers that want the dense map instead of the defaulted one
    /// produced inside `get_frame_ctrl` (which has no persistence map of
    /// its own — the scene detector owns that state).
    pub fn apply_persistence_map(&self, persistence_map: &[u8; 128], qp_y: u32, dst_width: usize, dst_height: usize) -> Option<Vec<u32>> {
        let delta = paq::build_delta_qp_map(persistence_map, qp_y)?;
        Some(paq::upsample_and_apply(&delta, qp_y, dst_width, dst_height))
    }

    pub fn update(
        &mut self,
        frame: FrameParam,
        ctrl: &FrameCtrl,
        coded_size_bits: u64,
        actual_qp: u32,
    ) -> BrcResult<FrameStatus> {
        self.hrd.update(coded_size_bits, frame.enc_order, matches!(frame.frame_type, FrameType::Idr))?;
        self.window.update_sliding_window(coded_size_bits, frame.scene_changed);

        self.avg.f_ab_short = self.avg.f_ab_short * 0.75 + coded_size_bits as f64 * 0.25;
        self.avg.f_ab_long = self.avg.f_ab_long * 0.95 + coded_size_bits as f64 * 0.05;
        if let Some(la) = frame.look_ahead {
            self.avg.f_ab_la = self.avg.f_ab_la * 0.8 + la.cur_bits as f64 * 0.2;
        }
        if actual_qp > 0 {
            self.avg.d_quant_ab = self.avg.d_quant_ab * 0.9 + (1.0 / actual_qp as f64) * 0.1;
        }
        let target = ctrl.max_frame_size_bits.max(1) as i64;
        self.avg.total_deviation += coded_size_bits as i64 - target;

        if matches!(frame.frame_type, FrameType::Idr | FrameType::I) {
            self.last_i_qp = Some(actual_qp);
            self.last_i_qp_raca = frame.look_ahead.map(|l| l.frame_cmplx);
            self.last_i_cmplx = frame.look_ahead.map(|l| l.frame_cmplx);
            self.la_ctx.last_i_bits = coded_size_bits;
        } else if matches!(frame.frame_type, FrameType::P) && self.la_ctx.is_update_la_qp_dist() {
            self.la_ctx.push_la_p_bits(coded_size_bits);
        }
        self.la_ctx.frames_since_calc = self.la_ctx.frames_since_calc.wrapping_add(1) % self.params.gop_pic_size.max(1);
        self.la_ctx.frames_since_update = self.la_ctx.frames_since_update.saturating_add(1);

        let max_bits = ctrl.max_frame_size_bits;
        let min_bits = self.hrd.min_frame_size_bits(frame.enc_order, false);
        let (q_min, q_max) = (self.hrd.get_min_qp().max(1), self.hrd.get_max_qp().min(51));

        let violated_big = coded_size_bits > max_bits;
        let violated_small = min_bits > 0 && coded_size_bits < min_bits;

        if !violated_big && !violated_small {
            self.recode_count_normal = 0;
            self.recode_count_panic = 0;
            return Ok(FrameStatus::Ok);
        }

        if violated_big {
            if self.recode_count_panic >= RECODE_BUDGET_PANIC {
                warn!("brc: enc_order {} panic budget exhausted, forcing max qp", frame.enc_order);
                return Ok(FrameStatus::PanicBigFrame);
            }
            if self.recode_count_normal >= RECODE_BUDGET_NORMAL {
                self.recode_count_panic += 1;
                if !self.params.bpanic {
                    return Err(BrcError::NotEnoughBuffer);
                }
                return Ok(FrameStatus::PanicBigFrame);
            }
            self.recode_count_normal += 1;
            if actual_qp < q_max {
                debug!("brc: enc_order {} big frame, recode #{}", frame.enc_order, self.recode_count_normal);
                return Ok(FrameStatus::BigFrame);
            }
            self.recode_count_panic += 1;
            return Ok(FrameStatus::PanicBigFrame);
        }

        // violated_small
        if self.recode_count_panic >= RECODE_BUDGET_PANIC {
            return Ok(FrameStatus::PanicSmallFrame);
        }
        if self.recode_count_normal >= RECODE_BUDGET_NORMAL {
            self.recode_count_panic += 1;
            if !self.params.bpanic {
                return Err(BrcError::NotEnoughBuffer);
            }
            return Ok(FrameStatus::PanicSmallFrame);
        }
        self.recode_count_normal += 1;
        if actual_qp > q_min {
            debug!("brc: enc_order {} small frame, recode #{}", frame.enc_order, self.recode_count_normal);
            return Ok(FrameStatus::SmallFrame);
        }
        self.recode_count_panic += 1;
        Ok(FrameStatus::PanicSmallFrame)
    }

    /// Proposes a new QP for a recode, inverting the fixed Q-step/size
    /// power law against the size overshoot/undershoot.
    pub fn propose_recode_qp(&self, prev_qp: u32, coded_size_bits: u64, target_bits: u64, pow: f64) -> u32 {
        if target_bits == 0 || coded_size_bits == 0 {
            return prev_qp;
        }
        let qstep = qp_to_qstep(prev_qp);
        let ratio = (coded_size_bits as f64 / target_bits as f64).powf(pow);
        let qstep_new = qstep * ratio;
        qstep_to_qp(qstep_new).clamp(1, 51)
    }
}

fn qp_to_qstep(qp: u32) -> f64 {
    2f64.powf((qp as f64 - 4.0) / 6.0)
}

fn qstep_to_qp(qstep: f64) -> u32 {
    ((qstep.max(f64::MIN_POSITIVE).log2() * 6.0) + 4.0).round() as u32
}
