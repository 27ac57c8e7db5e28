// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identifier types for profiling sessions and chunks.
//!
//! All identifiers are 32 lowercase hex digits (a v4 UUID without dashes),
//! which is the shape the ingestion side expects for profile and chunk ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProfilingError;

fn random_hex_id() -> String {
	Uuid::new_v4().simple().to_string()
}

/// Identity of one span-scoped profiling session.
///
/// Binds one profiler start/stop cycle to one unit of work and doubles as the
/// event id of the resulting [`EnrichedProfile`](crate::EnrichedProfile).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	pub fn new() -> Self {
		Self(random_hex_id())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for SessionId {
	type Err = ProfilingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(ProfilingError::InvalidId(s.to_string()));
		}
		Ok(Self(s.to_string()))
	}
}

/// Identity shared by every chunk of one continuous profiling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfilerId(String);

impl ProfilerId {
	pub fn new() -> Self {
		Self(random_hex_id())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for ProfilerId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ProfilerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identity of a single chunk within a continuous profiling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
	pub fn new() -> Self {
		Self(random_hex_id())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for ChunkId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ChunkId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Returns true if `trace_id` is a well-formed trace identifier.
///
/// A trace id is exactly 32 hex digits and must not be all zeros.
pub fn is_valid_trace_id(trace_id: &str) -> bool {
	trace_id.len() == 32
		&& trace_id.bytes().all(|b| b.is_ascii_hexdigit())
		&& trace_id.bytes().any(|b| b != b'0')
}
