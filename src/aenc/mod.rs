// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Adaptive Encode controller (component C): a single-threaded pipeline
//! that ingests [`crate::scd::AnalysisRecord`]s, makes IDR/I decisions,
//! assembles mini-GOPs, manages the DPB with LTR/AREF promotion, and
//! emits per-frame QP deltas.

pub mod decisions;
pub mod dpb;
pub mod minigop;
pub mod types;

use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;

use crate::error::{AEncError, AEncResult};
use crate::scd::{classify::AgopCodec, ScdConfig, ScdEngine};

use decisions::{AltrState, ArefState, ApqAverages};
use dpb::Dpb;
pub use types::{AEncParams, CodecId, ColorFormat, ExternalFrame, FrameType, InternalFrame, LtrKind};

pub type Decision = ExternalFrame;

pub struct AEnc {
    params: AEncParams,
    scd: ScdEngine,
    frame_buffer: VecDeque<InternalFrame>,
    output_buffer: VecDeque<ExternalFrame>,
    dpb: Dpb,
    poc_of_last_i: Option<u32>,
    poc_of_last_idr: Option<u32>,
    mini_gop_counter: u32,
    altr_state: AltrState,
    aref_state: ArefState,
    apq_averages: ApqAverages,
    p_pyramid_idx: u32,
    remove_from_dpb_delayed: Vec<u32>,
}

impl AEnc {
    /// Validates `params` and builds a fresh controller. Fails with
    /// [`AEncError::InvalidParam`] on invalid configuration.
    pub fn init(params: AEncParams) -> AEncResult<Self> {
        params.validate()?;
        let codec = match params.codec_id {
            CodecId::Avc => AgopCodec::Avc,
            CodecId::Hevc => AgopCodec::Hevc,
            CodecId::Av1 => AgopCodec::Av1,
        };
        Ok(Self {
            params,
            scd: ScdEngine::new(ScdConfig { codec }),
            frame_buffer: VecDeque::new(),
            output_buffer: VecDeque::new(),
            dpb: Dpb::new(),
            poc_of_last_i: None,
            poc_of_last_idr: None,
            mini_gop_counter: 0,
            altr_state: AltrState::new(),
            aref_state: ArefState::new(),
            apq_averages: ApqAverages::default(),
            p_pyramid_idx: 0,
            remove_from_dpb_delayed: Vec::new(),
        })
    }

    /// Feeds one frame. `frame_pixels = None` signals EOS and flushes
    /// whatever remains in `frame_buffer`. Returns at most one finished
    /// decision per call; callers should keep calling with no new input
    /// if they need to drain a deep `output_buffer`.
    pub fn process_frame(&mut self, poc: u32, frame_pixels: Option<&[u8]>) -> AEncResult<Option<Decision>> {
        match frame_pixels {
            Some(pixels) => {
                let analysis = self
                    .scd
                    .process_frame(poc, pixels)
                    .map_err(|_| AEncError::Internal("scd not configured for this frame"))?;
                let mut frame = InternalFrame::new(Rc::new(analysis));
                self.make_i_frame_decision(&mut frame);
                self.frame_buffer.push_back(frame);
                self.try_close_mini_gops()?;
            }
            None => {
                self.flush_remaining()?;
            }
        }
        Ok(self.pop_output())
    }

    /// Late feedback: propagates an encoded QP/type to the matching
    /// frame, wherever it currently lives. Missing-frame lookups are
    /// silent, per the "not found" tolerance in the failure semantics.
    pub fn update_frame(&mut self, display_order: u32, _encoded_bits: u64, qp_y: u32, frame_type: FrameType) {
        let mut updated = false;
        for frame in self.frame_buffer.iter_mut() {
            if frame.poc() == display_order {
                frame.qp_y = Some(qp_y);
                updated = true;
            }
        }
        if let Some(frame) = self.dpb.find_mut(display_order) {
            frame.qp_y = Some(qp_y);
            updated = true;
        }

        if updated && frame_type == FrameType::P {
            self.altr_state.last_p_frame_qp = Some(qp_y);
            self.altr_state.last_p_frame_poc = Some(display_order);
            if self.altr_state.stored_ltr_qp.is_none() {
                if let Some(ltr) = self.dpb.ltr_entry() {
                    self.altr_state.stored_ltr_qp = ltr.qp_y;
                }
            }
        }
    }

    pub fn get_intra_decision(&self, display_order: u32) -> Option<FrameType> {
        self.frame_buffer
            .iter()
            .find(|f| f.poc() == display_order)
            .filter(|f| matches!(f.frame_type, FrameType::I | FrameType::Idr))
            .map(|f| f.frame_type)
    }

    pub fn get_persistence_map(&self, display_order: u32) -> [u8; 128] {
        self.frame_buffer
            .iter()
            .find(|f| f.poc() == display_order)
            .map(|f| f.analysis.persistence_map)
            .unwrap_or_else(|| self.scd.persistence_map())
    }

    pub fn get_last_p_qp(&self) -> Option<u32> {
        self.altr_state.last_p_frame_qp
    }

    /// `apq_predict`: looks up the APQ delta-QP table directly, for
    /// callers that want a prediction without running the full pipeline.
    pub fn apq_predict(&self, sc: u32, tsc: u32, mv_size: u32, contrast: u32, pyr_layer: u32, base_qp: i8) -> i8 {
        use crate::scd::classify::{contrast_index, mv_index, sc_index, tsc_index};
        let qsc = sc_index(sc).min(3) as usize;
        let qcon = contrast_index(contrast).min(2) as usize;
        let qmv = mv_index(mv_size).min(2) as usize;
        let qtsc = tsc_index(tsc).min(5) as usize;
        let class = match self.params.codec_id {
            CodecId::Hevc => decisions::APQ_LOOKUP_HEVC[qsc][qcon][qmv][qtsc],
            _ => decisions::APQ_LOOKUP_AVC[qsc][qcon][qmv][qtsc],
        }
        .min(3) as usize;
        let level = pyr_layer.clamp(1, 4) as usize;
        let delta = decisions::APQ_CUMULATIVE_DELTA[class][level - 1];
        (base_qp as i32 + delta).clamp(i8::MIN as i32, i8::MAX as i32) as i8
    }

    fn pop_output(&mut self) -> Option<Decision> {
        self.output_buffer.pop_front()
    }

    /// IDR/I decision, §4.3.2, evaluated in source order.
    fn make_i_frame_decision(&mut self, frame: &mut InternalFrame) {
        let poc = frame.poc();

        if poc == 0 {
            frame.frame_type = FrameType::Idr;
            self.poc_of_last_i = Some(poc);
            self.poc_of_last_idr = Some(poc);
            return;
        }

        if self.params.strict_i_frame {
            frame.frame_type = if poc % self.params.gop_pic_size == 0 {
                if poc % self.params.max_idr_dist == 0 {
                    FrameType::Idr
                } else {
                    FrameType::I
                }
            } else {
                FrameType::P
            };
            match frame.frame_type {
                FrameType::Idr => {
                    self.poc_of_last_idr = Some(poc);
                    self.poc_of_last_i = Some(poc);
                }
                FrameType::I => self.poc_of_last_i = Some(poc),
                _ => {}
            }
            return;
        }

        let gop_age = poc.saturating_sub(self.poc_of_last_i.unwrap_or(0));
        if gop_age < self.params.min_gop_size {
            frame.frame_type = FrameType::P;
            return;
        }

        if poc.saturating_sub(self.poc_of_last_idr.unwrap_or(0)) >= self.params.max_idr_dist {
            frame.frame_type = FrameType::Idr;
            self.poc_of_last_idr = Some(poc);
            self.poc_of_last_i = Some(poc);
            return;
        }

        if frame.analysis.scene_changed {
            match self.params.codec_id {
                CodecId::Avc | CodecId::Av1 => {
                    frame.frame_type = FrameType::Idr;
                    self.poc_of_last_idr = Some(poc);
                    self.poc_of_last_i = Some(poc);
                    return;
                }
                CodecId::Hevc => {
                    frame.frame_type = FrameType::I;
                    self.poc_of_last_i = Some(poc);
                    return;
                }
            }
        }

        if gop_age >= self.params.max_gop_size {
            frame.frame_type = FrameType::I;
            self.poc_of_last_i = Some(poc);
            return;
        }

        frame.frame_type = FrameType::P;
    }

    fn try_close_mini_gops(&mut self) -> AEncResult<()> {
        while minigop::gop_closed(self.frame_buffer.make_contiguous(), self.params.max_mini_gop_size) {
            self.close_one_mini_gop()?;
        }
        Ok(())
    }

    fn flush_remaining(&mut self) -> AEncResult<()> {
        while !self.frame_buffer.is_empty() {
            self.close_one_mini_gop()?;
        }
        Ok(())
    }

    fn close_one_mini_gop(&mut self) -> AEncResult<()> {
        let slice = self.frame_buffer.make_contiguous();
        let common = minigop::common_size(slice, self.params.strict_i_frame);
        let agop = minigop::agop_size(slice, self.params.max_mini_gop_size, self.params.agop);
        let size = common.min(agop).max(1).min(self.frame_buffer.len() as u32) as usize;

        let mut gop: Vec<InternalFrame> = self.frame_buffer.drain(..size).collect();
        minigop::mark_frames_in_mini_gop(&mut gop, self.mini_gop_counter);
        self.mini_gop_counter += 1;

        for mut frame in gop {
            self.decide_one_frame(&mut frame)?;
            self.output_buffer.push_back(ExternalFrame::from_internal(&frame, self.predict_qp(&frame)));
        }
        Ok(())
    }

    fn decide_one_frame(&mut self, frame: &mut InternalFrame) -> AEncResult<()> {
        if self.params.altr {
            decisions::make_altr_decision(frame, &mut self.altr_state, &mut self.dpb);
        }
        if self.params.aref {
            decisions::make_aref_decision(frame, &mut self.aref_state);
        }
        decisions::compute_apq_stats(frame, &mut self.apq_averages, self.params.codec_id);
        decisions::build_ref_list(frame, &self.altr_state, &self.aref_state);

        let low_activity = frame.analysis.sc_idx == 0 && frame.analysis.tsc_idx == 0;
        decisions::adjust_qp(
            frame,
            self.params.altr,
            self.params.aref,
            self.params.apq,
            self.params.agop,
            &self.altr_state,
            low_activity,
            &mut self.p_pyramid_idx,
        );

        self.dpb.update(frame, self.params.num_ref_p);

        if frame.frame_type == FrameType::B {
            self.remove_from_dpb_delayed.append(&mut frame.remove_from_dpb);
        } else {
            frame.remove_from_dpb.append(&mut self.remove_from_dpb_delayed);
        }

        if !self.dpb.check_invariants() {
            return Err(AEncError::Internal("dpb invariant violated"));
        }

        debug!(
            "aenc: poc {} type {:?} layer {} delta_qp {}",
            frame.poc(),
            frame.frame_type,
            frame.pyramid_layer,
            frame.delta_qp
        );
        Ok(())
    }

    /// Seed QP used when emitting a frame before BRC has assigned one;
    /// callers ordinarily overwrite `qp_y` once BRC resolves the real
    /// value. Uses the base QP implied by the frame's own delta.
    fn predict_qp(&self, frame: &InternalFrame) -> u32 {
        const DEFAULT_BASE_QP: i32 = 26;
        (DEFAULT_BASE_QP + frame.delta_qp).clamp(1, 51) as u32
    }
}
