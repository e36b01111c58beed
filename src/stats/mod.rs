// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stat Kernels (component A): pure, deterministic routines over 8-bit luma
//! planes. Every kernel here is a scalar reference implementation; a SIMD
//! path would slot in behind the same function signature, dispatched once at
//! startup from detected CPU features (see the design notes on
//! function-pointer dispatch) rather than through a virtual call per pixel.
//! No such dispatch table is implemented here — it is out of scope for this
//! core and would only be an optimization over the scalar path that defines
//! correctness.

pub mod histogram;
pub mod me;
pub mod raca;
pub mod rscs;

use crate::error::{StatKernelError, StatKernelResult};

/// The fixed sub-sampled plane size SCD operates on.
pub const SUBSAMPLED_WIDTH: usize = 128;
pub const SUBSAMPLED_HEIGHT: usize = 64;

/// A borrowed view over an 8-bit luma plane with an explicit stride, so
/// kernels never need to reason about the caller's original pitch.
#[derive(Clone, Copy)]
pub struct PlaneView<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> PlaneView<'a> {
    /// Builds a view, bounds-checking that `data` has enough room for
    /// `height` rows of `stride` bytes.
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride {stride} smaller than width {width}");
        assert!(
            data.len() >= stride * height.saturating_sub(1) + width,
            "plane buffer too small for {width}x{height} stride {stride}"
        );
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.stride + x]
    }

    /// Validates that this view's dimensions match the fixed sub-sampled
    /// plane size every SCD kernel but [`raca`] operates on.
    pub(crate) fn check_subsampled_dims(&self) -> StatKernelResult<()> {
        self.check_dims(SUBSAMPLED_WIDTH, SUBSAMPLED_HEIGHT)
    }

    pub(crate) fn check_dims(&self, expected_width: usize, expected_height: usize) -> StatKernelResult<()> {
        if self.width != expected_width || self.height != expected_height {
            return Err(StatKernelError::InvalidDims {
                width: self.width,
                height: self.height,
                expected_width,
                expected_height,
            });
        }
        Ok(())
    }
}

/// Motion vector in quarter-pel-free, integer sub-sampled-plane units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub x: i32,
    pub y: i32,
}

impl MotionVector {
    #[inline]
    pub fn magnitude_sq(&self) -> i64 {
        (self.x as i64) * (self.x as i64) + (self.y as i64) * (self.y as i64)
    }
}
