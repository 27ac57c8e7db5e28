// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for profile data.

use thiserror::Error;

/// Errors raised while validating or converting profile data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfilingError {
	#[error("sample {sample} references missing stack {stack_id} ({stacks} stacks)")]
	InvalidStackIndex {
		sample: usize,
		stack_id: usize,
		stacks: usize,
	},

	#[error("stack {stack} references missing frame {frame_id} ({frames} frames)")]
	InvalidFrameIndex {
		stack: usize,
		frame_id: usize,
		frames: usize,
	},

	#[error("trace has {count} samples (min: {min})")]
	InsufficientSamples { count: usize, min: usize },

	#[error("invalid identifier: {0:?}")]
	InvalidId(String),
}

/// Result type for profile data operations.
pub type Result<T> = std::result::Result<T, ProfilingError>;
