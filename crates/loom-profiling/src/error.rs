// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the profiling SDK.
//!
//! Only construction and configuration loading are fallible. Once built, the
//! SDK degrades to "no profile produced" instead of returning errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for profiling SDK operations.
pub type Result<T> = std::result::Result<T, ProfilingSdkError>;

/// Errors that can occur in the profiling SDK.
#[derive(Debug, Error)]
pub enum ProfilingSdkError {
	/// The integration has been shut down.
	#[error("profiling integration has been shut down")]
	IntegrationShutdown,

	/// A configuration value is out of its allowed range.
	#[error("invalid configuration for {key}: {message}")]
	InvalidConfig {
		/// Name of the offending setting.
		key: String,
		/// Why the value was rejected.
		message: String,
	},

	/// Failed to read a configuration file.
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// Failed to parse a configuration file.
	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

/// Reasons a profiler binding candidate could not be loaded.
#[derive(Debug, Error)]
pub enum BindingError {
	/// Nothing is available at the candidate path.
	#[error("no profiler binding at {0}")]
	NotFound(PathBuf),

	/// Something exists at the path but cannot be used on this host.
	#[error("profiler binding at {path} is unusable: {reason}")]
	Incompatible { path: PathBuf, reason: String },
}
