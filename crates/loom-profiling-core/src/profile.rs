// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Span-scoped profiles reconciled with the unit of work they profiled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::id::SessionId;
use crate::trace::{Frame, LoggingMode, Measurement, RawTrace, Sample, Stack};
use crate::PLATFORM;

/// Profile format version for span-scoped profiles.
pub const PROFILE_VERSION: &str = "1";

/// Name and scheduling priority of a sampled thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMetadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub priority: Option<i32>,
}

/// Identity of the unit of work a profile belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
	pub name: String,
	/// Span id of the profiled unit of work.
	pub id: String,
	pub trace_id: String,
	pub active_thread_id: String,
	/// Offset of the unit of work start relative to the profile start.
	pub relative_start_ns: String,
	/// Offset of the unit of work end relative to the profile start.
	pub relative_end_ns: String,
}

/// Maps a referenced source file to the debug id of its symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugImage {
	/// "sourcemap"
	#[serde(rename = "type")]
	pub image_type: String,
	pub code_file: String,
	pub debug_id: String,
}

impl DebugImage {
	pub fn source_map(code_file: impl Into<String>, debug_id: impl Into<String>) -> Self {
		Self {
			image_type: "sourcemap".to_string(),
			code_file: code_file.into(),
			debug_id: debug_id.into(),
		}
	}

	/// Picks the entries of `table` for the resources a trace referenced.
	///
	/// Output is ordered by resource path so payloads are deterministic.
	pub fn for_resources(resources: &[String], table: &HashMap<String, String>) -> Vec<Self> {
		let mut images: Vec<Self> = resources
			.iter()
			.filter_map(|path| {
				table
					.get(path)
					.map(|debug_id| Self::source_map(path.clone(), debug_id.clone()))
			})
			.collect();
		images.sort_by(|a, b| a.code_file.cmp(&b.code_file));
		images.dedup();
		images
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMeta {
	pub images: Vec<DebugImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsContext {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
	pub name: String,
	pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
	pub architecture: String,
}

impl OsContext {
	pub fn current() -> Self {
		Self {
			name: std::env::consts::OS.to_string(),
			version: None,
		}
	}
}

impl DeviceContext {
	pub fn current() -> Self {
		Self {
			architecture: std::env::consts::ARCH.to_string(),
		}
	}
}

/// SDK that produced a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSdkInfo {
	pub name: String,
	pub version: String,
}

/// The sampled portion of an enriched profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledProfile {
	pub frames: Vec<Frame>,
	pub stacks: Vec<Stack>,
	pub samples: Vec<Sample>,
	pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

/// A raw trace reconciled with the unit of work it profiled.
///
/// Built once when the transport asks for the profile of a session; not
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedProfile {
	pub event_id: SessionId,
	pub timestamp: DateTime<Utc>,
	pub platform: String,
	pub version: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub release: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
	pub os: OsContext,
	pub runtime: RuntimeContext,
	pub device: DeviceContext,
	pub debug_meta: DebugMeta,
	pub transactions: Vec<TransactionMetadata>,
	pub profile: SampledProfile,
	#[serde(default)]
	pub logging_mode: LoggingMode,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub measurements: BTreeMap<String, Measurement>,
}

impl EnrichedProfile {
	/// Combines a raw trace with the context captured when sampling began.
	pub fn new(
		session_id: SessionId,
		timestamp: DateTime<Utc>,
		trace: RawTrace,
		transaction: TransactionMetadata,
		thread_metadata: BTreeMap<String, ThreadMetadata>,
		debug_images: Vec<DebugImage>,
		runtime: RuntimeContext,
	) -> Self {
		Self {
			event_id: session_id,
			timestamp,
			platform: PLATFORM.to_string(),
			version: PROFILE_VERSION.to_string(),
			release: None,
			environment: None,
			os: OsContext::current(),
			runtime,
			device: DeviceContext::current(),
			debug_meta: DebugMeta {
				images: debug_images,
			},
			transactions: vec![transaction],
			profile: SampledProfile {
				frames: trace.frames,
				stacks: trace.stacks,
				samples: trace.samples,
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

	/// The unit of work this profile was reconciled with.
	pub fn transaction(&self) -> Option<&TransactionMetadata> {
		self.transactions.first()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn transaction() -> TransactionMetadata {
		TransactionMetadata {
			name: "GET /users".to_string(),
			id: "a1b2c3d4e5f60718".to_string(),
			trace_id: "0123456789abcdef0123456789abcdef".to_string(),
			active_thread_id: "0".to_string(),
			relative_start_ns: "0".to_string(),
			relative_end_ns: "100000000".to_string(),
		}
	}

	#[test]
	fn debug_images_only_cover_referenced_resources() {
		let table = HashMap::from([
			("/app/b.js".to_string(), "id-b".to_string()),
			("/app/a.js".to_string(), "id-a".to_string()),
			("/app/unused.js".to_string(), "id-x".to_string()),
		]);
		let resources = vec![
			"/app/b.js".to_string(),
			"/app/a.js".to_string(),
			"/app/missing.js".to_string(),
			"/app/a.js".to_string(),
		];

		let images = DebugImage::for_resources(&resources, &table);

		assert_eq!(
			images,
			vec![
				DebugImage::source_map("/app/a.js", "id-a"),
				DebugImage::source_map("/app/b.js", "id-b"),
			]
		);
	}

	#[test]
	fn enriched_profile_serializes_expected_shape() {
		let trace = RawTrace {
			logging_mode: LoggingMode::Eager,
			..Default::default()
		};
		let profile = EnrichedProfile::new(
			SessionId::new(),
			Utc::now(),
			trace,
			transaction(),
			BTreeMap::from([(
				"0".to_string(),
				ThreadMetadata {
					name: Some("main".to_string()),
					priority: None,
				},
			)]),
			vec![DebugImage::source_map("/app/a.js", "id-a")],
			RuntimeContext {
				name: "rustc".to_string(),
				version: "1.80.0".to_string(),
			},
		)
		.with_release(Some("1.0.0".to_string()));

		let json = serde_json::to_value(&profile).unwrap();
		assert_eq!(json["platform"], "rust");
		assert_eq!(json["version"], "1");
		assert_eq!(json["release"], "1.0.0");
		assert!(json.get("environment").is_none());
		assert_eq!(json["transactions"][0]["name"], "GET /users");
		assert_eq!(json["profile"]["thread_metadata"]["0"]["name"], "main");
		assert_eq!(json["debug_meta"]["images"][0]["type"], "sourcemap");
		assert_eq!(json["logging_mode"], "eager");
		assert_eq!(profile.transaction().map(|t| t.id.as_str()), Some("a1b2c3d4e5f60718"));
	}
}
