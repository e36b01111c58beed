// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decoded picture buffer: an ordered collection of [`InternalFrame`]s
//! kept as reference candidates, capacity `NumRefP` plus at most one
//! LTR/AREF slot.

use super::decisions;
use super::types::{InternalFrame, LtrKind};

#[derive(Default)]
pub struct Dpb {
    entries: Vec<InternalFrame>,
}

impl Dpb {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, poc: u32) -> Option<&InternalFrame> {
        self.entries.iter().find(|f| f.poc() == poc)
    }

    pub fn find_mut(&mut self, poc: u32) -> Option<&mut InternalFrame> {
        self.entries.iter_mut().find(|f| f.poc() == poc)
    }

    pub fn ltr_entry(&self) -> Option<&InternalFrame> {
        self.entries.iter().find(|f| f.ltr != LtrKind::None)
    }

    /// Removes and returns the entry with the given POC, if present.
    pub fn remove(&mut self, poc: u32) -> Option<InternalFrame> {
        let pos = self.entries.iter().position(|f| f.poc() == poc)?;
        Some(self.entries.remove(pos))
    }

    /// Applies the DPB-update sub-decision for `frame`, mutating it with
    /// `remove_from_dpb` and inserting/evicting entries as needed.
    pub fn update(&mut self, frame: &mut InternalFrame, num_ref_p: u32) {
        decisions::update_dpb(&mut self.entries, frame, num_ref_p);
    }

    pub fn iter(&self) -> impl Iterator<Item = &InternalFrame> {
        self.entries.iter()
    }

    /// Invariant check: no two entries share a POC, and at most one
    /// entry is an active LTR/AREF slot.
    pub fn check_invariants(&self) -> bool {
        let mut pocs = std::collections::HashSet::new();
        let mut ltr_count = 0;
        for f in &self.entries {
            if !pocs.insert(f.poc()) {
                return false;
            }
            if f.ltr != LtrKind::None {
                ltr_count += 1;
            }
        }
        ltr_count <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aenc::types::FrameType;
    use crate::scd::{AnalysisRecord, FrameSnapshot};
    use std::rc::Rc;

    fn frame(poc: u32) -> InternalFrame {
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
        f.frame_type = FrameType::P;
        f
    }

    #[test]
    fn evicts_lowest_poc_when_full() {
        let mut dpb = Dpb::new();
        for poc in 0..3 {
            let mut f = frame(poc);
            dpb.update(&mut f, 3);
        }
        assert_eq!(dpb.len(), 3);

        let mut newest = frame(10);
        dpb.update(&mut newest, 3);
        assert_eq!(dpb.len(), 3);
        assert!(dpb.find(0).is_none());
        assert!(dpb.find(10).is_some());
        assert_eq!(newest.remove_from_dpb, vec![0]);
    }

    #[test]
    fn invariants_hold_after_updates() {
        let mut dpb = Dpb::new();
        for poc in 0..5 {
            let mut f = frame(poc);
            dpb.update(&mut f, 2);
        }
        assert!(dpb.check_invariants());
    }
}
