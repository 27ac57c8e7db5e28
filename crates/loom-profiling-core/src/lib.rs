// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom CPU profiling SDK.
//!
//! This crate holds the data model shared by the profiling SDK
//! (`loom-profiling`) and anything that consumes its output:
//!
//! - [`RawTrace`]: the output of one start/stop cycle of a sampling profiler
//! - [`EnrichedProfile`]: a raw trace reconciled with the unit of work it profiled
//! - [`ChunkProfile`]: one fixed-interval slice of a continuous profiling session
//! - Identifier types ([`SessionId`], [`ProfilerId`], [`ChunkId`])

pub mod chunk;
pub mod error;
pub mod id;
pub mod profile;
pub mod trace;

pub use chunk::{ChunkBody, ChunkProfile, ChunkSample};
pub use error::{ProfilingError, Result};
pub use id::{is_valid_trace_id, ChunkId, ProfilerId, SessionId};
pub use profile::{
	ClientSdkInfo, DebugImage, DebugMeta, DeviceContext, EnrichedProfile, OsContext, RuntimeContext,
	SampledProfile, ThreadMetadata, TransactionMetadata,
};
pub use trace::{Frame, LoggingMode, Measurement, MeasurementValue, RawTrace, Sample, Stack};

/// Platform reported in profile payloads produced by this SDK.
pub const PLATFORM: &str = "rust";
