// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Quantisation LUTs and the two fixed classifiers (`SCDetectRF`, `AGOP_RF`)
//! the SCD pipeline consults. Both classifiers are linear/threshold
//! approximations of the original random-forest models: the forest weights
//! themselves are not part of the retrieved source, so these stand in as
//! documented fixed-threshold proxies operating over the same feature set.

/// `quant_sc`: spatial-complexity quantiser thresholds.
pub const QUANT_SC: [u32; 3] = [2000, 3500, 7500];

/// `quant_tsc`: temporal-complexity quantiser. Input is pre-scaled by
/// `>> 10` before comparison against these thresholds.
pub const QUANT_TSC: [u32; 5] = [60, 200, 300, 500, 900];

/// `quant_mv`: motion-magnitude quantiser thresholds.
pub const QUANT_MV: [u32; 2] = [400, 1500];

/// `quant_contrast`: block-contrast quantiser thresholds.
pub const QUANT_CONTRAST: [u32; 2] = [35, 65];

fn lut(value: u32, thresholds: &[u32]) -> u32 {
    thresholds.iter().filter(|&&t| value >= t).count() as u32
}

/// `SCindex = lut(Rs+Cs, lmt_sc)`.
pub fn sc_index(rs_plus_cs: u32) -> u32 {
    lut(rs_plus_cs, &QUANT_SC)
}

/// `TSCindex = lut(TSC, lmt_tsc)`, with the `>>10` pre-scale baked in.
pub fn tsc_index(tsc: u32) -> u32 {
    lut(tsc >> 10, &QUANT_TSC)
}

pub fn mv_index(mv_size: u32) -> u32 {
    lut(mv_size, &QUANT_MV)
}

pub fn contrast_index(contrast: u32) -> u32 {
    lut(contrast, &QUANT_CONTRAST)
}

/// Features the two classifiers below key their decision on.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScdFeatures {
    pub sc: u32,
    pub tsc: u32,
    pub sc_idx: u32,
    pub tsc_idx: u32,
    pub contrast: u32,
    pub mv_size: u32,
    pub afd: u32,
}

/// Fixed-threshold stand-in for the original `SCDetectRF` forest: a scene
/// change is flagged when spatial and temporal complexity jump together,
/// or when a single feature spikes hard enough on its own.
pub fn scd_detect_rf(f: ScdFeatures) -> bool {
    if f.sc_idx >= 2 && f.tsc_idx >= 2 {
        return true;
    }
    if f.sc >= QUANT_SC[2] {
        return true;
    }
    if f.tsc_idx >= 4 && f.contrast >= QUANT_CONTRAST[1] {
        return true;
    }
    false
}

/// Codec the `AGOP_RF` classifier is tuned for; AV1 tolerates shorter
/// mini-GOPs before its look-ahead cost outweighs the coding gain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgopCodec {
    Avc,
    Hevc,
    Av1,
}

/// Fixed-threshold stand-in for the original `AGOP_RF` forest: maps
/// motion/complexity features to a suggested mini-GOP size in
/// `{1,2,4,8,16}`, shrinking the suggestion as activity rises.
pub fn agop_rf(f: ScdFeatures, codec: AgopCodec) -> u32 {
    let penalty = if codec == AgopCodec::Av1 { 1 } else { 0 };
    let score = f.sc_idx + f.tsc_idx + penalty;
    match score {
        0 => 16,
        1 | 2 => 8,
        3 | 4 => 4,
        5 | 6 => 2,
        _ => 1,
    }
}
