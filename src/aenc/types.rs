// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data types shared across the AEnc controller: frame types, LTR kinds,
//! the controller's working copy of a frame, its public output shape, and
//! the validated configuration the controller is built from.

use crate::error::{AEncError, AEncResult};
use crate::scd::AnalysisRecord;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Undef,
    Idr,
    I,
    P,
    B,
    Dummy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LtrKind {
    None,
    Altr,
    Aref,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Nv12,
    Rgb4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecId {
    Avc,
    Hevc,
    Av1,
}

/// Controller configuration, validated once in [`crate::aenc::AEnc::init`].
#[derive(Clone, Copy, Debug)]
pub struct AEncParams {
    pub frame_width: u32,
    pub frame_height: u32,
    pub src_frame_width: u32,
    pub src_frame_height: u32,
    pub pitch: u32,
    pub color_format: ColorFormat,
    pub strict_i_frame: bool,
    pub gop_pic_size: u32,
    pub min_gop_size: u32,
    pub max_gop_size: u32,
    pub max_idr_dist: u32,
    pub max_mini_gop_size: u32,
    pub codec_id: CodecId,
    pub num_ref_p: u32,
    pub agop: bool,
    pub altr: bool,
    pub aref: bool,
    pub apq: bool,
}

impl AEncParams {
    pub fn validate(&self) -> AEncResult<()> {
        if !matches!(self.max_mini_gop_size, 1 | 2 | 4 | 8 | 16) {
            return Err(AEncError::InvalidParam("max_mini_gop_size must be in {1,2,4,8,16}"));
        }
        if !(self.min_gop_size < self.max_gop_size && self.max_gop_size <= self.max_idr_dist) {
            return Err(AEncError::InvalidParam("min_gop_size < max_gop_size <= max_idr_dist required"));
        }
        if self.max_gop_size == 0 || self.max_idr_dist % self.max_gop_size != 0 {
            return Err(AEncError::InvalidParam("max_idr_dist must be a multiple of max_gop_size"));
        }
        if self.min_gop_size > self.max_gop_size.saturating_sub(self.max_mini_gop_size) {
            return Err(AEncError::InvalidParam(
                "min_gop_size must be <= max_gop_size - max_mini_gop_size",
            ));
        }
        Ok(())
    }
}

/// The controller's working copy of a frame: the Analysis Record plus
/// every field the decision pipeline fills in as it moves through
/// `frame_buffer` -> sub-decisions -> `output_buffer`.
#[derive(Clone)]
pub struct InternalFrame {
    pub analysis: Rc<AnalysisRecord>,
    pub frame_type: FrameType,
    pub pyramid_layer: u32,
    pub mini_gop_size: u32,
    pub mini_gop_type: u32,
    pub mini_gop_idx: u32,
    pub ltr: LtrKind,
    pub use_ltr_as_reference: bool,
    pub keep_in_dpb: bool,
    pub remove_from_dpb: Vec<u32>,
    pub ref_list: Vec<u32>,
    pub long_term_ref_list: Vec<u32>,
    pub delta_qp: i32,
    pub class_apq: u32,
    pub qp_delta_explicit_modulation: i8,
    pub p_pyramid_idx: u32,
    pub p_pyramid_layer: u32,
    pub prev_type: FrameType,
    pub qp_y: Option<u32>,
}

impl InternalFrame {
    pub fn new(analysis: Rc<AnalysisRecord>) -> Self {
        Self {
            analysis,
            frame_type: FrameType::Undef,
            pyramid_layer: 0,
            mini_gop_size: 0,
            mini_gop_type: 0,
            mini_gop_idx: 0,
            ltr: LtrKind::None,
            use_ltr_as_reference: true,
            keep_in_dpb: false,
            remove_from_dpb: Vec::new(),
            ref_list: Vec::new(),
            long_term_ref_list: Vec::new(),
            delta_qp: 0,
            class_apq: 0,
            qp_delta_explicit_modulation: 0,
            p_pyramid_idx: 0,
            p_pyramid_layer: 0,
            prev_type: FrameType::Undef,
            qp_y: None,
        }
    }

    pub fn poc(&self) -> u32 {
        self.analysis.poc
    }

    pub fn mark_dummy(&mut self) {
        self.frame_type = FrameType::Dummy;
    }
}

/// Decision handed back to the caller from `process_frame`: a fully
/// decided, ready-to-emit frame.
#[derive(Clone)]
pub struct ExternalFrame {
    pub poc: u32,
    pub qp_y: u32,
    pub scene_changed: bool,
    pub repeated_frame: bool,
    pub temporal_complexity: u32,
    pub spatial_complexity: u32,
    pub ltr: bool,
    pub mini_gop_size: u32,
    pub pyramid_layer: u32,
    pub frame_type: FrameType,
    pub delta_qp: i32,
    pub class_apq: u32,
    pub qp_delta_explicit_modulation: i8,
    pub features_apq: [u32; 4],
    pub keep_in_dpb: bool,
    pub remove_from_dpb: Vec<u32>,
    pub ref_list: Vec<u32>,
    pub long_term_ref_list: Vec<u32>,
    pub persistence_map: [u8; 128],
}

impl ExternalFrame {
    pub fn from_internal(frame: &InternalFrame, qp_y: u32) -> Self {
        Self {
            poc: frame.poc(),
            qp_y,
            scene_changed: frame.analysis.scene_changed,
            repeated_frame: frame.analysis.repeated_frame,
            temporal_complexity: frame.analysis.tsc,
            spatial_complexity: frame.analysis.sc,
            ltr: !matches!(frame.ltr, LtrKind::None),
            mini_gop_size: frame.mini_gop_size,
            pyramid_layer: frame.pyramid_layer,
            frame_type: frame.frame_type,
            delta_qp: frame.delta_qp,
            class_apq: frame.class_apq,
            qp_delta_explicit_modulation: frame.qp_delta_explicit_modulation,
            features_apq: [
                frame.analysis.sc,
                frame.analysis.tsc,
                frame.analysis.mv_size,
                frame.analysis.contrast,
            ],
            keep_in_dpb: frame.keep_in_dpb,
            remove_from_dpb: frame.remove_from_dpb.clone(),
            ref_list: frame.ref_list.clone(),
            long_term_ref_list: frame.long_term_ref_list.clone(),
            persistence_map: frame.analysis.persistence_map,
        }
    }
}
