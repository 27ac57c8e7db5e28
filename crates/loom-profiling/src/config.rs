// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Profiling configuration: defaults, TOML files and environment variables.
//!
//! Layers are merged with environment variables taking precedence over the
//! config file, which takes precedence over built-in defaults.
//!
//! Environment convention: `LOOM_PROFILING_<FIELD>`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::binding::BindingOverrides;
use crate::error::{ProfilingSdkError, Result};
use crate::sampling::ProfilesSampler;

/// Longest a span-scoped session may run before it is force-stopped.
pub const DEFAULT_MAX_PROFILE_DURATION: Duration = Duration::from_secs(30);
/// Completed traces kept awaiting reconciliation.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
/// Length of one continuous profiling chunk.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_secs(60);
/// Longest a continuous profiling session may run before the kill-switch fires.
pub const DEFAULT_MAX_CONTINUOUS_DURATION: Duration = Duration::from_secs(5 * 60);

/// Who decides when continuous profiling runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileLifecycle {
	/// The host calls `start_profiler` / `stop_profiler`.
	#[default]
	Manual,
	/// Profiling runs while at least one sampled root unit of work is active.
	Trace,
}

impl fmt::Display for ProfileLifecycle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Manual => write!(f, "manual"),
			Self::Trace => write!(f, "trace"),
		}
	}
}

impl FromStr for ProfileLifecycle {
	type Err = ProfilingSdkError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"manual" => Ok(Self::Manual),
			"trace" => Ok(Self::Trace),
			_ => Err(ProfilingSdkError::InvalidConfig {
				key: "profile_lifecycle".to_string(),
				message: format!("unknown lifecycle '{s}'"),
			}),
		}
	}
}

/// Resolved profiling configuration.
#[derive(Clone)]
pub struct ProfilingConfig {
	/// Static per-unit-of-work sample rate.
	pub profiles_sample_rate: Option<f64>,
	/// Per-unit-of-work sampler; wins over `profiles_sample_rate`.
	pub profiles_sampler: Option<ProfilesSampler>,
	pub max_profile_duration: Duration,
	pub queue_capacity: usize,
	/// Enables continuous profiling; drawn once per integration.
	pub profile_session_sample_rate: Option<f64>,
	pub profile_lifecycle: ProfileLifecycle,
	pub chunk_interval: Duration,
	pub max_continuous_duration: Duration,
	/// Resource path to debug id.
	pub debug_ids: HashMap<String, String>,
	pub release: Option<String>,
	pub environment: Option<String>,
	pub binding_overrides: BindingOverrides,
}

impl Default for ProfilingConfig {
	fn default() -> Self {
		Self {
			profiles_sample_rate: None,
			profiles_sampler: None,
			max_profile_duration: DEFAULT_MAX_PROFILE_DURATION,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			profile_session_sample_rate: None,
			profile_lifecycle: ProfileLifecycle::default(),
			chunk_interval: DEFAULT_CHUNK_INTERVAL,
			max_continuous_duration: DEFAULT_MAX_CONTINUOUS_DURATION,
			debug_ids: HashMap::new(),
			release: None,
			environment: None,
			binding_overrides: BindingOverrides::default(),
		}
	}
}

impl fmt::Debug for ProfilingConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProfilingConfig")
			.field("profiles_sample_rate", &self.profiles_sample_rate)
			.field("profiles_sampler", &self.profiles_sampler.as_ref().map(|_| "<fn>"))
			.field("max_profile_duration", &self.max_profile_duration)
			.field("queue_capacity", &self.queue_capacity)
			.field("profile_session_sample_rate", &self.profile_session_sample_rate)
			.field("profile_lifecycle", &self.profile_lifecycle)
			.field("chunk_interval", &self.chunk_interval)
			.field("max_continuous_duration", &self.max_continuous_duration)
			.field("debug_ids", &self.debug_ids.len())
			.field("release", &self.release)
			.field("environment", &self.environment)
			.field("binding_overrides", &self.binding_overrides)
			.finish()
	}
}

impl ProfilingConfig {
	/// Rejects settings the SDK cannot run with.
	///
	/// Sample rates are not checked here: an out-of-range rate disables
	/// sampling at decision time instead of failing construction.
	pub fn validate(&self) -> Result<()> {
		let invalid = |key: &str, message: &str| ProfilingSdkError::InvalidConfig {
			key: key.to_string(),
			message: message.to_string(),
		};

		if self.queue_capacity == 0 {
			return Err(invalid("queue_capacity", "must be at least 1"));
		}
		if self.max_profile_duration.is_zero() {
			return Err(invalid("max_profile_duration", "must be non-zero"));
		}
		if self.chunk_interval.is_zero() {
			return Err(invalid("chunk_interval", "must be non-zero"));
		}
		if self.max_continuous_duration.is_zero() {
			return Err(invalid("max_continuous_duration", "must be non-zero"));
		}
		Ok(())
	}

	/// Applies every value set in `layer`.
	pub fn apply_layer(&mut self, layer: ProfilingConfigLayer) {
		if let Some(v) = layer.profiles_sample_rate {
			self.profiles_sample_rate = Some(v);
		}
		if let Some(v) = layer.max_profile_duration_ms {
			self.max_profile_duration = Duration::from_millis(v);
		}
		if let Some(v) = layer.queue_capacity {
			self.queue_capacity = v;
		}
		if let Some(v) = layer.profile_session_sample_rate {
			self.profile_session_sample_rate = Some(v);
		}
		if let Some(v) = layer.profile_lifecycle {
			self.profile_lifecycle = v;
		}
		if let Some(v) = layer.chunk_interval_ms {
			self.chunk_interval = Duration::from_millis(v);
		}
		if let Some(v) = layer.max_continuous_duration_ms {
			self.max_continuous_duration = Duration::from_millis(v);
		}
		if let Some(v) = layer.release {
			self.release = Some(v);
		}
		if let Some(v) = layer.environment {
			self.environment = Some(v);
		}
		if let Some(v) = layer.binary_path {
			self.binding_overrides.binary_path = Some(v);
		}
		if let Some(v) = layer.binary_dir {
			self.binding_overrides.binary_dir = Some(v);
		}
		self.debug_ids.extend(layer.debug_ids);
	}
}

/// Partial configuration from one source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilingConfigLayer {
	pub profiles_sample_rate: Option<f64>,
	pub max_profile_duration_ms: Option<u64>,
	pub queue_capacity: Option<usize>,
	pub profile_session_sample_rate: Option<f64>,
	pub profile_lifecycle: Option<ProfileLifecycle>,
	pub chunk_interval_ms: Option<u64>,
	pub max_continuous_duration_ms: Option<u64>,
	pub release: Option<String>,
	pub environment: Option<String>,
	pub binary_path: Option<PathBuf>,
	pub binary_dir: Option<PathBuf>,
	pub debug_ids: HashMap<String, String>,
}

impl ProfilingConfigLayer {
	/// Values in `other` override values in `self`.
	pub fn merge(mut self, other: Self) -> Self {
		macro_rules! take {
			($($field:ident),*) => {
				$(if other.$field.is_some() {
					self.$field = other.$field;
				})*
			};
		}
		take!(
			profiles_sample_rate,
			max_profile_duration_ms,
			queue_capacity,
			profile_session_sample_rate,
			profile_lifecycle,
			chunk_interval_ms,
			max_continuous_duration_ms,
			release,
			environment,
			binary_path,
			binary_dir
		);
		self.debug_ids.extend(other.debug_ids);
		self
	}

	/// Loads a layer from a TOML file. A missing file yields an empty layer.
	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		if !path.exists() {
			debug!(path = %path.display(), "profiling config file not found, skipping");
			return Ok(Self::default());
		}

		debug!(path = %path.display(), "loading profiling config file");
		let content = std::fs::read_to_string(path).map_err(|e| ProfilingSdkError::FileRead {
			path: path.to_path_buf(),
			source: e,
		})?;

		let layer: Self = toml::from_str(&content).map_err(|e| ProfilingSdkError::TomlParse {
			path: path.to_path_buf(),
			source: e,
		})?;

		trace!("parsed profiling config layer from TOML");
		Ok(layer)
	}

	/// Loads a layer from `LOOM_PROFILING_*` environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let var = |name: &str| lookup(name).filter(|s| !s.is_empty());
		let parsed = |name: &str| -> Result<Option<f64>> { parse_var(name, var(name)) };
		let parsed_u64 = |name: &str| -> Result<Option<u64>> { parse_var(name, var(name)) };

		let overrides = BindingOverrides::from_lookup(&lookup);

		Ok(Self {
			profiles_sample_rate: parsed("LOOM_PROFILING_SAMPLE_RATE")?,
			max_profile_duration_ms: parsed_u64("LOOM_PROFILING_MAX_DURATION_MS")?,
			queue_capacity: parse_var(
				"LOOM_PROFILING_QUEUE_CAPACITY",
				var("LOOM_PROFILING_QUEUE_CAPACITY"),
			)?,
			profile_session_sample_rate: parsed("LOOM_PROFILING_SESSION_SAMPLE_RATE")?,
			profile_lifecycle: var("LOOM_PROFILING_LIFECYCLE")
				.map(|v| v.parse())
				.transpose()?,
			chunk_interval_ms: parsed_u64("LOOM_PROFILING_CHUNK_INTERVAL_MS")?,
			max_continuous_duration_ms: parsed_u64("LOOM_PROFILING_MAX_CONTINUOUS_DURATION_MS")?,
			release: var("LOOM_PROFILING_RELEASE"),
			environment: var("LOOM_PROFILING_ENVIRONMENT"),
			binary_path: overrides.binary_path,
			binary_dir: overrides.binary_dir,
			debug_ids: HashMap::new(),
		})
	}

	/// Defaults, then the TOML file at `path`, then the environment.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::from_toml_file(path)?.merge(Self::from_env()?))
	}
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
	match value {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ProfilingSdkError::InvalidConfig {
				key: name.to_string(),
				message: format!("invalid value '{v}'"),
			}),
		None => Ok(None),
	}
}
