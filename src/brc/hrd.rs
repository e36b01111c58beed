// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hypothetical Reference Decoder buffer models. Two codec-specific
//! implementations of the same capability, selected once at session
//! init and driven identically by the QP control loop.

use crate::error::{BrcError, BrcResult};

#[derive(Clone, Copy, Debug)]
pub struct HrdParams {
    pub bitrate_bps: u64,
    pub cpb_size_bits: u64,
    pub initial_delay_bits: u64,
    pub is_vbr: bool,
    pub frame_rate: f64,
    pub min_qp: u32,
    pub max_qp: u32,
}

/// Shared capability both HRD variants implement.
pub trait HrdCodecSpec {
    fn init(&mut self, params: HrdParams) -> BrcResult<()>;
    fn reset(&mut self, params: HrdParams) -> BrcResult<()>;
    fn update(&mut self, size_bits: u64, enc_order: u64, is_sei: bool) -> BrcResult<()>;
    fn init_cpb_removal_delay(&self, enc_order: u64) -> u64;
    fn max_frame_size_bits(&self, enc_order: u64, is_sei: bool) -> u64;
    fn min_frame_size_bits(&self, enc_order: u64, is_sei: bool) -> u64;
    fn buffer_deviation(&self, enc_order: u64) -> i64;
    fn buffer_deviation_factor(&self, enc_order: u64) -> f64;
    fn get_min_qp(&self) -> u32;
    fn get_max_qp(&self) -> u32;
}

/// Clock tick in seconds for a 90kHz system clock over one frame period.
fn clock_tick(frame_rate: f64) -> f64 {
    if frame_rate <= 0.0 {
        1.0 / 30.0
    } else {
        1.0 / frame_rate
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct H264Hrd {
    params: Option<HrdParams>,
    trn_cur: f64,
    taf_prv: f64,
    initial_delay_90k: u64,
}

impl H264Hrd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HrdCodecSpec for H264Hrd {
    fn init(&mut self, params: HrdParams) -> BrcResult<()> {
        if params.cpb_size_bits == 0 || params.bitrate_bps == 0 {
            return Err(BrcError::InvalidParam("cpb_size and bitrate must be nonzero"));
        }
        self.trn_cur = 0.0;
        self.taf_prv = 0.0;
        self.params = Some(params);
        self.initial_delay_90k = (params.initial_delay_bits as f64 / params.bitrate_bps as f64 * 90_000.0) as u64;
        Ok(())
    }

    fn reset(&mut self, params: HrdParams) -> BrcResult<()> {
        self.init(params)
    }

    fn update(&mut self, size_bits: u64, _enc_order: u64, _is_sei: bool) -> BrcResult<()> {
        let params = self.params.ok_or(BrcError::NotInitialized)?;
        self.taf_prv += size_bits as f64 / params.bitrate_bps as f64;
        self.trn_cur += clock_tick(params.frame_rate);
        Ok(())
    }

    fn init_cpb_removal_delay(&self, _enc_order: u64) -> u64 {
        let cpb_size_90k = self.cpb_size_90k();
        let delay = ((self.trn_cur - self.taf_prv) * 90_000.0) as i64;
        delay.clamp(1, cpb_size_90k as i64) as u64
    }

    fn max_frame_size_bits(&self, _enc_order: u64, _is_sei: bool) -> u64 {
        let params = self.params.unwrap_or(HrdParams {
            bitrate_bps: 0,
            cpb_size_bits: 0,
            initial_delay_bits: 0,
            is_vbr: false,
            frame_rate: 30.0,
            min_qp: 1,
            max_qp: 51,
        });
        let buffer_remaining = params.cpb_size_bits as f64 - (self.trn_cur - self.taf_prv) * params.bitrate_bps as f64;
        buffer_remaining.max(0.0) as u64
    }

    fn min_frame_size_bits(&self, _enc_order: u64, _is_sei: bool) -> u64 {
        0
    }

    fn buffer_deviation(&self, _enc_order: u64) -> i64 {
        let params = self.params;
        let Some(params) = params else { return 0 };
        let target_delay = self.target_delay_90k(params);
        self.init_cpb_removal_delay(0) as i64 - target_delay as i64
    }

    fn buffer_deviation_factor(&self, enc_order: u64) -> f64 {
        let cpb = self.cpb_size_90k().max(1) as f64;
        self.buffer_deviation(enc_order) as f64 / cpb
    }

    fn get_min_qp(&self) -> u32 {
        self.params.map(|p| p.min_qp).unwrap_or(1)
    }

    fn get_max_qp(&self) -> u32 {
        self.params.map(|p| p.max_qp).unwrap_or(51)
    }
}

impl H264Hrd {
    fn cpb_size_90k(&self) -> u64 {
        let params = self.params.unwrap_or(HrdParams {
            bitrate_bps: 1,
            cpb_size_bits: 0,
            initial_delay_bits: 0,
            is_vbr: false,
            frame_rate: 30.0,
            min_qp: 1,
            max_qp: 51,
        });
        (params.cpb_size_bits as f64 / params.bitrate_bps as f64 * 90_000.0) as u64
    }

    fn target_delay_90k(&self, params: HrdParams) -> u64 {
        let cpb_90k = self.cpb_size_90k();
        if params.is_vbr {
            (3 * cpb_90k / 4).max(self.initial_delay_90k)
        } else {
            cpb_90k / 2
        }
    }
}

/// HEVC tracks CPB removal delay MSB/LSB and the previous buffering
/// period's anchors, per Annex C equations C-3/C-4/C-8. The bitstream
/// syntax split is not meaningful outside a real HEVC writer; what
/// matters here is the arrival-time accounting those equations drive,
/// which we keep as the same `trn_cur`/`taf_prv` pair as H264Hrd plus
/// the extra anchor this codec's spec calls for.
#[derive(Clone, Copy, Debug, Default)]
pub struct HevcHrd {
    inner: H264Hrd,
    prev_buffering_period_trn: f64,
}

impl HevcHrd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HrdCodecSpec for HevcHrd {
    fn init(&mut self, params: HrdParams) -> BrcResult<()> {
        self.inner.init(params)?;
        self.prev_buffering_period_trn = 0.0;
        Ok(())
    }

    fn reset(&mut self, params: HrdParams) -> BrcResult<()> {
        self.init(params)
    }

    fn update(&mut self, size_bits: u64, enc_order: u64, is_sei: bool) -> BrcResult<()> {
        self.inner.update(size_bits, enc_order, is_sei)?;
        if is_sei {
            self.prev_buffering_period_trn = self.inner.trn_cur;
        }
        Ok(())
    }

    fn init_cpb_removal_delay(&self, enc_order: u64) -> u64 {
        self.inner.init_cpb_removal_delay(enc_order)
    }

    fn max_frame_size_bits(&self, enc_order: u64, is_sei: bool) -> u64 {
        self.inner.max_frame_size_bits(enc_order, is_sei)
    }

    fn min_frame_size_bits(&self, enc_order: u64, is_sei: bool) -> u64 {
        self.inner.min_frame_size_bits(enc_order, is_sei)
    }

    fn buffer_deviation(&self, enc_order: u64) -> i64 {
        self.inner.buffer_deviation(enc_order)
    }

    fn buffer_deviation_factor(&self, enc_order: u64) -> f64 {
        self.inner.buffer_deviation_factor(enc_order)
    }

    fn get_min_qp(&self) -> u32 {
        self.inner.get_min_qp()
    }

    fn get_max_qp(&self) -> u32 {
        self.inner.get_max_qp()
    }
}
