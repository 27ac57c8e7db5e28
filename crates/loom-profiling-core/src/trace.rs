// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw sampling traces as produced by a profiler binding.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ProfilingError, Result};

/// Minimum number of samples needed to establish elapsed time.
pub const MIN_SAMPLES: usize = 2;

/// A single stack frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub abs_path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub lineno: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub colno: Option<u32>,
}

/// Frame indices of one call stack, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stack(pub Vec<usize>);

/// One observation of a thread's call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
	pub stack_id: usize,
	pub thread_id: u64,
	/// Nanoseconds since the session started.
	pub elapsed_since_start_ns: u64,
}

/// Whether frame metadata was resolved while sampling or when the session stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingMode {
	Eager,
	#[default]
	Lazy,
}

impl fmt::Display for LoggingMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Eager => write!(f, "eager"),
			Self::Lazy => write!(f, "lazy"),
		}
	}
}

/// A single point in a measurement series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementValue {
	pub elapsed_since_start_ns: u64,
	pub value: f64,
}

/// A time series recorded alongside the samples (e.g. heap usage, cpu%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
	/// "byte", "percent", ...
	pub unit: String,
	pub values: Vec<MeasurementValue>,
}

/// Output of one start/stop cycle of the sampling profiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrace {
	pub frames: Vec<Frame>,
	pub stacks: Vec<Stack>,
	pub samples: Vec<Sample>,
	/// Source files referenced by frames, used for debug-id lookup.
	#[serde(default)]
	pub resources: Vec<String>,
	#[serde(default)]
	pub logging_mode: LoggingMode,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub measurements: BTreeMap<String, Measurement>,
}

impl RawTrace {
	/// Checks that every sample points at a stack and every stack at frames.
	pub fn validate(&self) -> Result<()> {
		for (sample, s) in self.samples.iter().enumerate() {
			if s.stack_id >= self.stacks.len() {
				return Err(ProfilingError::InvalidStackIndex {
					sample,
					stack_id: s.stack_id,
					stacks: self.stacks.len(),
				});
			}
		}

		for (stack, frames) in self.stacks.iter().enumerate() {
			if let Some(&frame_id) = frames.0.iter().find(|&&f| f >= self.frames.len()) {
				return Err(ProfilingError::InvalidFrameIndex {
					stack,
					frame_id,
					frames: self.frames.len(),
				});
			}
		}

		Ok(())
	}

	/// Fails if the trace cannot establish elapsed time.
	pub fn ensure_min_samples(&self) -> Result<()> {
		if self.samples.len() < MIN_SAMPLES {
			return Err(ProfilingError::InsufficientSamples {
				count: self.samples.len(),
				min: MIN_SAMPLES,
			});
		}
		Ok(())
	}

	/// Distinct thread ids that appear in samples, in ascending order.
	pub fn thread_ids(&self) -> BTreeSet<u64> {
		self.samples.iter().map(|s| s.thread_id).collect()
	}

	/// Elapsed time between the first and last sample.
	pub fn sampled_duration_ns(&self) -> u64 {
		let first = self.samples.iter().map(|s| s.elapsed_since_start_ns).min();
		let last = self.samples.iter().map(|s| s.elapsed_since_start_ns).max();
		match (first, last) {
			(Some(first), Some(last)) => last - first,
			_ => 0,
		}
	}
}
