// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Chunks produced by continuous profiling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::{ChunkId, ProfilerId};
use crate::profile::{ClientSdkInfo, DebugMeta, ThreadMetadata};
use crate::trace::{Frame, LoggingMode, Measurement, RawTrace, Stack};
use crate::PLATFORM;

/// Profile format version for continuous chunks.
pub const CHUNK_VERSION: &str = "2";

/// A sample positioned on the wall clock instead of relative to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSample {
	pub stack_id: usize,
	pub thread_id: String,
	/// Seconds since the unix epoch.
	pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkBody {
	pub frames: Vec<Frame>,
	pub stacks: Vec<Stack>,
	pub samples: Vec<ChunkSample>,
	pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

/// One fixed-interval slice of a continuous profiling session.
///
/// All chunks of one session share a [`ProfilerId`]; each has its own
/// [`ChunkId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProfile {
	pub chunk_id: ChunkId,
	pub profiler_id: ProfilerId,
	pub platform: String,
	pub version: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub release: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
	pub client_sdk: ClientSdkInfo,
	pub debug_meta: DebugMeta,
	pub profile: ChunkBody,
	#[serde(default)]
	pub logging_mode: LoggingMode,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub measurements: BTreeMap<String, Measurement>,
}

impl ChunkProfile {
	/// Converts a raw trace whose session started at `started_at` into a chunk.
	pub fn from_trace(
		trace: RawTrace,
		profiler_id: ProfilerId,
		chunk_id: ChunkId,
		started_at: DateTime<Utc>,
		client_sdk: ClientSdkInfo,
		debug_meta: DebugMeta,
	) -> Self {
		let base = started_at.timestamp_micros() as f64 / 1_000_000.0;

		let thread_metadata = trace
			.thread_ids()
			.into_iter()
			.map(|id| (id.to_string(), ThreadMetadata::default()))
			.collect();

		let samples = trace
			.samples
			.iter()
			.map(|s| ChunkSample {
				stack_id: s.stack_id,
				thread_id: s.thread_id.to_string(),
				timestamp: base + s.elapsed_since_start_ns as f64 / 1_000_000_000.0,
			})
			.collect();

		Self {
			chunk_id,
			profiler_id,
			platform: PLATFORM.to_string(),
			version: CHUNK_VERSION.to_string(),
			release: None,
			environment: None,
			client_sdk,
			debug_meta,
			profile: ChunkBody {
				frames: trace.frames,
				stacks: trace.stacks,
				samples,
				thread_metadata,
			},
			logging_mode: trace.logging_mode,
			measurements: trace.measurements,
		}
	}

	pub fn with_release(mut self, release: Option<String>) -> Self {
		self.release = release;
		self
	}

	pub fn with_environment(mut self, environment: Option<String>) -> Self {
		self.environment = environment;
		self
	}
}
