// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `AVGBitrate`: a circular buffer of recent frame sizes backing a
//! sliding-window maximum-frame-size constraint, widened on scene-change
//! or panic and contracted a fixed step after each clean encode.

use std::collections::VecDeque;

const WIDEN_STEP_NUM: u64 = 5;
const WIDEN_STEP_DEN: u64 = 4;
const CONTRACT_STEP_NUM: u64 = 19;
const CONTRACT_STEP_DEN: u64 = 20;

pub struct AvgBitrate {
    window: usize,
    history: VecDeque<u64>,
    max_bits_per_frame: u64,
    avg_bits: u64,
    max_win_bits_lim: u64,
}

impl AvgBitrate {
    pub fn new(window: usize, max_bits_per_frame: u64, avg_bits: u64) -> Self {
        let max_win_bits_lim = avg_bits.saturating_mul(window as u64);
        Self {
            window,
            history: VecDeque::with_capacity(window),
            max_bits_per_frame,
            avg_bits,
            max_win_bits_lim,
        }
    }

    /// Max allowed size for the *next* frame: the window limit minus the
    /// sum of the last `window - 1` frames already accounted for.
    pub fn get_budget(&self) -> u64 {
        let tail_sum: u64 = self
            .history
            .iter()
            .rev()
            .take(self.window.saturating_sub(1))
            .sum();
        self.max_win_bits_lim.saturating_sub(tail_sum).min(self.max_bits_per_frame)
    }

    pub fn get_max_frame_size(&self) -> u64 {
        self.max_bits_per_frame
    }

    /// Pushes a new frame size into the window, dropping the oldest when
    /// full, and relaxes/tightens `max_win_bits_lim` depending on outcome.
    pub fn update_sliding_window(&mut self, size_bits: u64, scene_change_or_panic: bool) {
        self.history.push_back(size_bits);
        while self.history.len() > self.window {
            self.history.pop_front();
        }

        if scene_change_or_panic {
            self.max_win_bits_lim = self
                .max_win_bits_lim
                .saturating_mul(WIDEN_STEP_NUM)
                .saturating_div(WIDEN_STEP_DEN)
                .min(self.max_bits_per_frame.saturating_mul(self.window as u64));
        } else {
            let contracted = self
                .max_win_bits_lim
                .saturating_mul(CONTRACT_STEP_NUM)
                .saturating_div(CONTRACT_STEP_DEN);
            let floor = self.avg_bits.saturating_mul(self.window as u64);
            self.max_win_bits_lim = contracted.max(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_shrinks_as_window_fills() {
        let mut w = AvgBitrate::new(4, 1_000_000, 100_000);
        let initial_budget = w.get_budget();
        w.update_sliding_window(200_000, false);
        w.update_sliding_window(200_000, false);
        assert!(w.get_budget() <= initial_budget);
    }

    #[test]
    fn panic_widens_the_limit() {
        let mut w = AvgBitrate::new(4, 1_000_000, 100_000);
        w.update_sliding_window(50_000, false);
        w.update_sliding_window(50_000, false);
        let before = w.max_win_bits_lim;
        w.update_sliding_window(900_000, true);
        assert!(w.max_win_bits_lim >= before);
    }
}
