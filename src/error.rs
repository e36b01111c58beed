// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error types for the three public subsystems (stat kernels, SCD, AEnc) and
//! the BRC frame-status protocol.

use thiserror::Error;

/// Errors raised by the pure stat kernels in [`crate::stats`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKernelError {
    #[error("plane dimensions {width}x{height} do not match the expected {expected_width}x{expected_height}")]
    InvalidDims {
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },
}

pub type StatKernelResult<T> = Result<T, StatKernelError>;

/// Errors raised by the [`crate::scd`] engine. SCD is infallible on
/// well-formed input; only configuration mismatches are reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScdError {
    #[error("scd not configured for this codec/format combination")]
    Config,
}

pub type ScdResult<T> = Result<T, ScdError>;

/// Errors raised by [`crate::aenc::AEnc`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AEncError {
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),
    #[error("controller used before init")]
    NotInitialized,
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

pub type AEncResult<T> = Result<T, AEncError>;

/// Errors raised by [`crate::brc::BrcSession`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrcError {
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),
    #[error("brc session used before init")]
    NotInitialized,
    #[error("HRD violation could not be resolved within the recode budget")]
    NotEnoughBuffer,
}

pub type BrcResult<T> = Result<T, BrcError>;
