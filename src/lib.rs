// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Adaptive encode control core: per-frame stat kernels, scene-change
//! detection, mini-GOP/LTR/DPB decision making (AEnc), and HRD-aware
//! bitrate control (BRC) for a downstream AVC/HEVC/AV1 encoder.
//!
//! The three public subsystems are independent and composed by the
//! caller in a fixed pipeline: raw planes flow into [`scd::ScdEngine`],
//! whose [`scd::AnalysisRecord`] output drives [`aenc::AEnc`]'s
//! frame-type/mini-GOP/reference decisions, whose [`aenc::ExternalFrame`]
//! output in turn parameterises a [`brc::BrcSession`] frame.

pub mod aenc;
pub mod brc;
pub mod error;
pub mod scd;
pub mod stats;

pub use aenc::{AEnc, AEncParams, ExternalFrame};
pub use brc::{BrcParams, BrcSession, FrameCtrl, FrameParam, FrameStatus};
pub use error::{AEncError, BrcError, ScdError, StatKernelError};
pub use scd::{AnalysisRecord, ScdConfig, ScdEngine};
