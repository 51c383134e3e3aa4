// SPDX-License-Identifier: BSD-3-Clause
//! `tracing` layers for profiling the analysis

mod timing;
pub use timing::SpanTimingLayer;
