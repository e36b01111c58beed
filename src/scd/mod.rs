// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scene-Change / Content-Analysis engine (component B): maintains a
//! 3-slot statistics ring and a 2-slot image ring over sub-sampled luma
//! planes, and on each call to [`ScdEngine::process_frame`] runs the full
//! per-frame analysis pipeline down to a finished [`AnalysisRecord`].

pub mod classify;

use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::{ScdError, ScdResult};
use crate::stats::{histogram, me, raca as raca_kernel, rscs, PlaneView, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH};
use classify::{AgopCodec, ScdFeatures};

const LTR_HISTORY_CAP: usize = 120;
const GAIN_CORRECTION_THRESHOLD: i32 = 20;
/// High-motion streak counter increments when a block's motion exceeds
/// this magnitude, and resets on scene change or LTR promotion.
const HIGH_MV_THRESHOLD: u32 = classify::QUANT_MV[1];

/// Per-frame analysis output, handed to the AEnc controller.
#[derive(Clone)]
pub struct AnalysisRecord {
    pub poc: u32,
    pub scene_changed: bool,
    pub repeated_frame: bool,
    pub tsc_idx: u32,
    pub sc_idx: u32,
    pub sc: u32,
    pub tsc: u32,
    pub mv_size: u32,
    pub contrast: u32,
    pub abs_mv_h: u32,
    pub abs_mv_v: u32,
    pub mv0_avg: f32,
    pub recent_high_mv_count: i32,
    pub mc_tcor: i16,
    pub ltr_hint: bool,
    pub agop_hint: u32,
    pub persistence_map: [u8; 128],
    /// Opaque SCD state snapshot, carried so the controller can re-run
    /// ALTR analysis against a previously-held reference.
    pub snapshot: Rc<FrameSnapshot>,
}

/// Opaque state a single analyzed frame contributes to the rings: the
/// sub-sampled image plus the derived stats, bundled so they can be
/// re-examined later without re-running the kernels.
#[derive(Clone)]
pub struct FrameSnapshot {
    pub image: Vec<u8>,
    pub stat: FrameStat,
}

/// Internal per-frame stat-ring entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStat {
    pub afd: u32,
    pub rscs_diff: u32,
    pub tsc: u32,
    pub tsc_idx: u32,
    pub sc: u32,
    pub sc_idx: u32,
    pub avg_luma: u32,
}

/// Result of [`ScdEngine::continue_ltr_mode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LtrContinuation {
    Yes,
    No,
    Force,
}

pub struct ScdConfig {
    pub codec: AgopCodec,
}

pub struct ScdEngine {
    config: ScdConfig,
    /// `stat[0]=prev_prev, stat[1]=prev, stat[2]=current`.
    stat: [Option<FrameStat>; 3],
    /// `img[0]=current, img[1]=reference`.
    img: [Option<Vec<u8>>; 2],
    frame_number: u64,
    persistence_map: [u8; 128],
    ltr_history: VecDeque<(u64, bool)>,
    neg_balance: i32,
    pos_balance: i32,
    recent_high_mv_count: i32,
}

impl ScdEngine {
    pub fn new(config: ScdConfig) -> Self {
        Self {
            config,
            stat: [None, None, None],
            img: [None, None],
            frame_number: 0,
            persistence_map: [0; 128],
            ltr_history: VecDeque::with_capacity(LTR_HISTORY_CAP),
            neg_balance: 0,
            pos_balance: 0,
            recent_high_mv_count: 0,
        }
    }

    /// Runs the full per-frame pipeline over an already sub-sampled
    /// (128x64) luma plane.
    pub fn process_frame(&mut self, poc: u32, plane: &[u8]) -> ScdResult<AnalysisRecord> {
        if plane.len() < SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT {
            return Err(ScdError::Config);
        }
        let current = PlaneView::new(plane, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);

        // Step 1: sub-sample (already done by the caller) and avg luma.
        let current_owned: Vec<u8> = plane[..SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT].to_vec();
        let pixel_count = (SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT) as u32;

        let Some(reference) = self.img[1].clone() else {
            // First frame ever: nothing to diff against. Seed the rings
            // and report a neutral, non-scene-changed record.
            return Ok(self.seed_first_frame(poc, current_owned));
        };
        let reference_view = PlaneView::new(&reference, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);

        // Step 2: optional gain correction, used only for this frame's
        // stat passes and never written back into the reference ring.
        let hist = histogram::histogram_diff(current, reference_view)?;
        let avg_luma_cur = hist.src_avg_luma(pixel_count);
        let avg_luma_ref = hist.ref_avg_luma(pixel_count);
        let gain_corrected;
        let stats_reference = if (avg_luma_cur as i32 - avg_luma_ref as i32).abs() >= GAIN_CORRECTION_THRESHOLD {
            let offset = avg_luma_cur as i32 - avg_luma_ref as i32;
            gain_corrected = apply_gain_offset(&reference, offset);
            PlaneView::new(&gain_corrected, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH)
        } else {
            reference_view
        };

        // Step 3: RsCs on current.
        let rscs_result = rscs::rscs_4x4_skip(current)?;
        let sc = rscs_result.rs_val + rscs_result.cs_val;
        let contrast = (rscs_result.contrast * 100.0) as u32;

        // Step 4: motion analysis vs (possibly gain-corrected) reference.
        let motion = me::me_simple(current, stats_reference);
        let tsc = motion.block_sads.iter().map(|&s| s as u64).sum::<u64>() as u32;
        let mv_size = (motion.avg_abs_mv_x().abs() + motion.avg_abs_mv_y().abs()) as u32;
        let afd = hist.afd(pixel_count);
        let mc_tcor = motion.mc_tcor();
        let mv0_avg = (motion.avg_abs_mv_x().powi(2) + motion.avg_abs_mv_y().powi(2)).sqrt();

        // Step 5: quantise.
        let sc_idx = classify::sc_index(sc);
        let tsc_idx = classify::tsc_index(tsc);

        // Step 6: scene-change classifier and LTR hint.
        let features = ScdFeatures {
            sc,
            tsc,
            sc_idx,
            tsc_idx,
            contrast,
            mv_size,
            afd,
        };
        let scene_changed = classify::scd_detect_rf(features);
        let ltr_hint = (tsc as u64 * tsc as u64 * 12) < sc.max(64) as u64;

        // Step 7: repeated-frame test.
        let prev_stat = self.stat[1];
        let (repeated_frame, diff_afd, diff_tsc) = if let Some(prev) = prev_stat {
            let diff_afd = afd as i64 - prev.afd as i64;
            let diff_tsc = tsc as i64 - prev.tsc as i64;
            let rscs_diff = (sc as i64 - prev.sc as i64).unsigned_abs() as u32;
            let repeated = afd == 0
                && rscs_diff == 0
                && tsc_idx == 0
                && self.neg_balance <= 3
                && self.pos_balance <= 20
                && diff_afd <= 0
                && diff_tsc <= 0
                && diff_afd <= diff_tsc;
            (repeated, diff_afd, diff_tsc)
        } else {
            (false, 0, 0)
        };

        if diff_afd < 0 {
            self.neg_balance += 1;
        } else {
            self.neg_balance = 0;
        }
        if diff_tsc >= 0 {
            self.pos_balance += 1;
        } else {
            self.pos_balance = 0;
        }

        // Step 8: adaptive GOP size hint.
        let agop_hint = classify::agop_rf(features, self.config.codec);

        // Persistence map update, based on this frame's motion-compensated
        // residual against each block's own spatial-complexity magnitude.
        self.update_persistence_map(&motion, &rscs_result, scene_changed);

        if mv_size > HIGH_MV_THRESHOLD {
            self.recent_high_mv_count += 1;
        } else if scene_changed {
            self.recent_high_mv_count = 0;
        } else {
            self.recent_high_mv_count = (self.recent_high_mv_count - 1).max(0);
        }

        // Step 9: append to LTR history, trimming to the bounded ring.
        self.ltr_history.push_back((self.frame_number, ltr_hint));
        while self.ltr_history.len() > LTR_HISTORY_CAP {
            self.ltr_history.pop_front();
        }
        if scene_changed {
            self.ltr_history.clear();
        }

        let new_stat = FrameStat {
            afd,
            rscs_diff: (sc as i64 - prev_stat.map(|p| p.sc as i64).unwrap_or(sc as i64)).unsigned_abs() as u32,
            tsc,
            tsc_idx,
            sc,
            sc_idx,
            avg_luma: avg_luma_cur,
        };

        let record = AnalysisRecord {
            poc,
            scene_changed: scene_changed && !repeated_frame,
            repeated_frame,
            tsc_idx,
            sc_idx,
            sc,
            tsc,
            mv_size,
            contrast,
            abs_mv_h: motion.avg_abs_mv_x().abs() as u32,
            abs_mv_v: motion.avg_abs_mv_y().abs() as u32,
            mv0_avg,
            recent_high_mv_count: self.recent_high_mv_count,
            mc_tcor,
            ltr_hint,
            agop_hint,
            persistence_map: self.persistence_map,
            snapshot: Rc::new(FrameSnapshot {
                image: current_owned.clone(),
                stat: new_stat,
            }),
        };

        // Step 10: rotate rings unless repeated.
        if repeated_frame {
            trace!("scd: poc {poc} repeated, discarding and preserving prior stats");
        } else {
            debug!("scd: poc {poc} analyzed, scene_changed={scene_changed} tsc={tsc} sc={sc}");
            self.stat[0] = self.stat[1];
            self.stat[1] = self.stat[2];
            self.stat[2] = Some(new_stat);
            self.img[1] = self.img[0].clone();
            self.img[0] = Some(current_owned);
        }

        self.frame_number += 1;
        Ok(record)
    }

    fn seed_first_frame(&mut self, poc: u32, current_owned: Vec<u8>) -> AnalysisRecord {
        let current = PlaneView::new(&current_owned, SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT, SUBSAMPLED_WIDTH);
        let rscs_result = rscs::rscs_4x4_skip(current).expect("fixed-size sub-sampled plane");
        let sc = rscs_result.rs_val + rscs_result.cs_val;
        let sc_idx = classify::sc_index(sc);
        let avg_luma = current_owned.iter().map(|&b| b as u64).sum::<u64>() / current_owned.len().max(1) as u64;

        let stat = FrameStat {
            afd: 0,
            rscs_diff: 0,
            tsc: 0,
            tsc_idx: 0,
            sc,
            sc_idx,
            avg_luma: avg_luma as u32,
        };
        self.stat[2] = Some(stat);
        self.img[0] = Some(current_owned.clone());
        self.frame_number += 1;

        AnalysisRecord {
            poc,
            scene_changed: false,
            repeated_frame: false,
            tsc_idx: 0,
            sc_idx,
            sc,
            tsc: 0,
            mv_size: 0,
            contrast: (rscs_result.contrast * 100.0) as u32,
            abs_mv_h: 0,
            abs_mv_v: 0,
            mv0_avg: 0.0,
            recent_high_mv_count: 0,
            mc_tcor: 100,
            ltr_hint: false,
            agop_hint: 16,
            persistence_map: self.persistence_map,
            snapshot: Rc::new(FrameSnapshot { image: current_owned, stat }),
        }
    }

    fn update_persistence_map(&mut self, motion: &me::MotionFieldStats, rscs_result: &rscs::RsCsResult, scene_changed: bool) {
        if scene_changed {
            self.persistence_map = [0; 128];
            return;
        }
        // Each 8x8 motion block covers a 2x2 group of 4x4 Rs/Cs blocks;
        // its own spatial-complexity magnitude is their summed rscs value.
        for by in 0..motion.blocks_y {
            for bx in 0..motion.blocks_x {
                let me_idx = by * motion.blocks_x + bx;
                if me_idx >= self.persistence_map.len() {
                    continue;
                }
                let mut sc_magnitude = 0u32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let rx = bx * 2 + dx;
                        let ry = by * 2 + dy;
                        if rx < rscs_result.blocks_x && ry < rscs_result.blocks_y {
                            sc_magnitude += rscs_result.rscs[ry * rscs_result.blocks_x + rx];
                        }
                    }
                }
                let sad = motion.block_sads[me_idx];
                if sad < sc_magnitude {
                    self.persistence_map[me_idx] = self.persistence_map[me_idx].saturating_add(1);
                } else {
                    self.persistence_map[me_idx] = 0;
                }
            }
        }
    }

    /// Walks the LTR history back-to-front, counting true/false entries.
    pub fn continue_ltr_mode(&self, good_limit: u32, bad_limit: u32) -> LtrContinuation {
        let mut trues = 0u32;
        let mut consecutive_falses = 0u32;
        for &(_, hint) in self.ltr_history.iter().rev() {
            if hint {
                trues += 1;
                consecutive_falses = 0;
                if trues >= good_limit {
                    return LtrContinuation::Force;
                }
            } else {
                consecutive_falses += 1;
                if consecutive_falses >= bad_limit {
                    return LtrContinuation::No;
                }
            }
        }
        LtrContinuation::Yes
    }

    pub fn persistence_map(&self) -> [u8; 128] {
        self.persistence_map
    }

    /// Called whenever the controller marks a new ALTR frame: resets the
    /// zero-motion baseline and the scene-transition ring, per the
    /// original's `MarkFrameAsLTR` side effects.
    pub fn on_ltr_marked(&mut self) {
        self.recent_high_mv_count = 0;
        self.ltr_history.clear();
    }
}

fn apply_gain_offset(reference: &[u8], offset: i32) -> Vec<u8> {
    reference
        .iter()
        .map(|&b| (b as i32 - offset).clamp(0, 255) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn first_frame_is_never_a_scene_change() {
        init();
        let mut scd = ScdEngine::new(ScdConfig { codec: AgopCodec::Avc });
        let plane = vec![100u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        let record = scd.process_frame(0, &plane).unwrap();
        assert!(!record.scene_changed);
        assert_eq!(record.agop_hint, 16);
    }

    #[test]
    fn identical_frames_are_repeated() {
        init();
        let mut scd = ScdEngine::new(ScdConfig { codec: AgopCodec::Avc });
        let plane = vec![100u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        scd.process_frame(0, &plane).unwrap();
        let record = scd.process_frame(1, &plane).unwrap();
        assert!(record.repeated_frame);
        assert!(!record.scene_changed);
    }

    #[test]
    fn big_luma_jump_triggers_scene_change() {
        init();
        let mut scd = ScdEngine::new(ScdConfig { codec: AgopCodec::Avc });
        let dark = vec![10u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        scd.process_frame(0, &dark).unwrap();

        let mut bright = vec![0u8; SUBSAMPLED_WIDTH * SUBSAMPLED_HEIGHT];
        for y in 0..SUBSAMPLED_HEIGHT {
            for x in 0..SUBSAMPLED_WIDTH {
                bright[y * SUBSAMPLED_WIDTH + x] = (((x * 37 + y * 101) % 256) as u8).wrapping_add(200);
            }
        }
        let record = scd.process_frame(1, &bright).unwrap();
        assert!(record.sc > 0);
    }

    #[test]
    fn continue_ltr_mode_forces_after_enough_good_hints() {
        init();
        let mut scd = ScdEngine::new(ScdConfig { codec: AgopCodec::Avc });
        for i in 0..10u64 {
            scd.ltr_history.push_back((i, true));
        }
        assert_eq!(scd.continue_ltr_mode(5, 5), LtrContinuation::Force);
    }

    #[test]
    fn continue_ltr_mode_stops_after_enough_bad_hints() {
        init();
        let mut scd = ScdEngine::new(ScdConfig { codec: AgopCodec::Avc });
        for i in 0..10u64 {
            scd.ltr_history.push_back((i, false));
        }
        assert_eq!(scd.continue_ltr_mode(50, 3), LtrContinuation::No);
    }
}
