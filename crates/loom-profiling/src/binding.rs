// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Locating and loading the sampling profiler binding for this host.
//!
//! The binding itself is opaque to the SDK: anything implementing
//! [`SamplingBinding`] can drive a profile. Resolution only decides *which*
//! artifact to hand to a [`BindingLoader`], in this order:
//!
//! 1. explicit full path (`LOOM_PROFILER_BINARY_PATH`)
//! 2. explicit directory (`LOOM_PROFILER_BINARY_DIR`) plus the computed artifact name
//! 3. the static table of known `(os, arch, libc, abi)` combinations
//! 4. a generic path assembled from the same tuple

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loom_profiling_core::RawTrace;
use tracing::{debug, info};

use crate::error::BindingError;

/// ABI revision of the binding interface this SDK speaks.
pub const BINDING_ABI_VERSION: u32 = 1;

/// Common prefix of every profiler artifact name.
pub const ARTIFACT_PREFIX: &str = "loom-cpu-profiler";

pub const BINARY_PATH_ENV: &str = "LOOM_PROFILER_BINARY_PATH";
pub const BINARY_DIR_ENV: &str = "LOOM_PROFILER_BINARY_DIR";

/// A platform sampling profiler.
///
/// Implementations may sample on their own OS thread; they must be safe to
/// call from any thread.
pub trait SamplingBinding: Send + Sync {
	/// Begins a sampling session identified by `name`.
	fn start_profiling(&self, name: &str);

	/// Ends the session identified by `name`, returning what was sampled.
	///
	/// Returns `None` for unknown or already-stopped sessions.
	fn stop_profiling(&self, name: &str) -> Option<RawTrace>;

	/// Thread id the binding reports in samples for the calling thread.
	fn current_thread_id(&self) -> u64 {
		0
	}

	/// ABI version the binding was built against.
	fn abi_version(&self) -> u32 {
		BINDING_ABI_VERSION
	}
}

/// C library family the host process links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Libc {
	Glibc,
	Musl,
	/// Platforms without a libc distinction (macOS, Windows).
	None,
}

impl fmt::Display for Libc {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Glibc => write!(f, "glibc"),
			Self::Musl => write!(f, "musl"),
			Self::None => Ok(()),
		}
	}
}

/// Canonical identity of the host for binding lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformTuple {
	pub os: String,
	pub arch: String,
	pub libc: Libc,
	pub abi: u32,
}

impl PlatformTuple {
	pub fn new(os: impl Into<String>, arch: impl Into<String>, libc: Libc, abi: u32) -> Self {
		Self {
			os: os.into(),
			arch: arch.into(),
			libc,
			abi,
		}
	}

	/// The tuple this binary was compiled for.
	pub fn current() -> Self {
		let libc = if cfg!(target_env = "musl") {
			Libc::Musl
		} else if cfg!(target_os = "linux") {
			Libc::Glibc
		} else {
			Libc::None
		};

		Self::new(
			std::env::consts::OS,
			std::env::consts::ARCH,
			libc,
			BINDING_ABI_VERSION,
		)
	}

	fn library_extension(&self) -> &'static str {
		match self.os.as_str() {
			"macos" | "ios" => "dylib",
			"windows" => "dll",
			_ => "so",
		}
	}

	/// Artifact file name computed from the tuple.
	///
	/// e.g. `loom-cpu-profiler-linux-x86_64-musl-1.so`
	pub fn artifact_file_name(&self) -> String {
		let ext = self.library_extension();
		match self.libc {
			Libc::None => format!(
				"{ARTIFACT_PREFIX}-{}-{}-{}.{ext}",
				self.os, self.arch, self.abi
			),
			libc => format!(
				"{ARTIFACT_PREFIX}-{}-{}-{libc}-{}.{ext}",
				self.os, self.arch, self.abi
			),
		}
	}
}

/// Prebuilt artifacts shipped for known hosts, relative to the search root.
static KNOWN_BINDINGS: &[(&str, &str, Libc, u32, &str)] = &[
	("linux", "x86_64", Libc::Glibc, 1, "linux-x86_64-glibc/libloom_cpu_profiler.so"),
	("linux", "x86_64", Libc::Musl, 1, "linux-x86_64-musl/libloom_cpu_profiler.so"),
	("linux", "aarch64", Libc::Glibc, 1, "linux-aarch64-glibc/libloom_cpu_profiler.so"),
	("linux", "aarch64", Libc::Musl, 1, "linux-aarch64-musl/libloom_cpu_profiler.so"),
	("macos", "x86_64", Libc::None, 1, "darwin-x86_64/libloom_cpu_profiler.dylib"),
	("macos", "aarch64", Libc::None, 1, "darwin-aarch64/libloom_cpu_profiler.dylib"),
	("windows", "x86_64", Libc::None, 1, "win32-x86_64/loom_cpu_profiler.dll"),
];

fn known_binding(platform: &PlatformTuple) -> Option<&'static str> {
	KNOWN_BINDINGS
		.iter()
		.find(|(os, arch, libc, abi, _)| {
			*os == platform.os && *arch == platform.arch && *libc == platform.libc && *abi == platform.abi
		})
		.map(|(.., path)| *path)
}

/// Explicit locations that take precedence over the lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingOverrides {
	/// Full path to an artifact.
	pub binary_path: Option<PathBuf>,
	/// Directory holding an artifact with the computed name.
	pub binary_dir: Option<PathBuf>,
	/// Root for table and fallback paths. Defaults to the executable's directory.
	pub search_root: Option<PathBuf>,
}

impl BindingOverrides {
	/// Reads `LOOM_PROFILER_BINARY_PATH` and `LOOM_PROFILER_BINARY_DIR`.
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let get = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
		Self {
			binary_path: get(BINARY_PATH_ENV),
			binary_dir: get(BINARY_DIR_ENV),
			search_root: None,
		}
	}

	fn search_root(&self) -> PathBuf {
		if let Some(root) = &self.search_root {
			return root.clone();
		}
		std::env::current_exe()
			.ok()
			.and_then(|exe| exe.parent().map(Path::to_path_buf))
			.unwrap_or_else(|| PathBuf::from("."))
	}
}

/// Turns a candidate artifact path into a usable binding.
pub trait BindingLoader: Send + Sync {
	fn load(&self, path: &Path) -> Result<Arc<dyn SamplingBinding>, BindingError>;
}

/// Loader for bindings linked into the host process.
///
/// Bindings are registered under an artifact file name; any candidate whose
/// file name matches is served the registered binding.
#[derive(Default, Clone)]
pub struct StaticBindingLoader {
	bindings: HashMap<String, Arc<dyn SamplingBinding>>,
}

impl StaticBindingLoader {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_binding(
		mut self,
		file_name: impl Into<String>,
		binding: Arc<dyn SamplingBinding>,
	) -> Self {
		self.bindings.insert(file_name.into(), binding);
		self
	}
}

impl BindingLoader for StaticBindingLoader {
	fn load(&self, path: &Path) -> Result<Arc<dyn SamplingBinding>, BindingError> {
		let binding = path
			.file_name()
			.and_then(|name| name.to_str())
			.and_then(|name| self.bindings.get(name))
			.cloned()
			.ok_or_else(|| BindingError::NotFound(path.to_path_buf()))?;

		if binding.abi_version() != BINDING_ABI_VERSION {
			return Err(BindingError::Incompatible {
				path: path.to_path_buf(),
				reason: format!(
					"built for ABI {}, expected {}",
					binding.abi_version(),
					BINDING_ABI_VERSION
				),
			});
		}
		Ok(binding)
	}
}

/// Candidate artifact paths in resolution order.
pub fn candidate_paths(platform: &PlatformTuple, overrides: &BindingOverrides) -> Vec<PathBuf> {
	let mut candidates = Vec::with_capacity(4);
	let file_name = platform.artifact_file_name();

	if let Some(path) = &overrides.binary_path {
		candidates.push(path.clone());
	}
	if let Some(dir) = &overrides.binary_dir {
		candidates.push(dir.join(&file_name));
	}

	let root = overrides.search_root();
	if let Some(relative) = known_binding(platform) {
		candidates.push(root.join(relative));
	}
	candidates.push(root.join(&file_name));

	candidates
}

/// Finds the first candidate the loader accepts.
///
/// Returns `None` rather than failing when nothing loads, so callers can
/// fall back to a no-op profiler.
pub fn resolve(
	platform: &PlatformTuple,
	overrides: &BindingOverrides,
	loader: &dyn BindingLoader,
) -> Option<Arc<dyn SamplingBinding>> {
	for path in candidate_paths(platform, overrides) {
		match loader.load(&path) {
			Ok(binding) => {
				info!(path = %path.display(), "Loaded profiler binding");
				return Some(binding);
			}
			Err(e) => debug!(error = %e, "Profiler binding candidate rejected"),
		}
	}

	debug!(
		os = %platform.os,
		arch = %platform.arch,
		libc = %platform.libc,
		abi = platform.abi,
		"No profiler binding available for this platform"
	);
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	struct NullBinding;

	impl SamplingBinding for NullBinding {
		fn start_profiling(&self, _name: &str) {}

		fn stop_profiling(&self, _name: &str) -> Option<RawTrace> {
			None
		}
	}

	/// Records every path it is asked about and accepts only `accept`.
	struct RecordingLoader {
		accept: Option<PathBuf>,
		seen: Mutex<Vec<PathBuf>>,
	}

	impl RecordingLoader {
		fn accepting(accept: Option<PathBuf>) -> Self {
			Self {
				accept,
				seen: Mutex::new(Vec::new()),
			}
		}
	}

	impl BindingLoader for RecordingLoader {
		fn load(&self, path: &Path) -> Result<Arc<dyn SamplingBinding>, BindingError> {
			self.seen.lock().push(path.to_path_buf());
			if self.accept.as_deref() == Some(path) {
				Ok(Arc::new(NullBinding))
			} else {
				Err(BindingError::NotFound(path.to_path_buf()))
			}
		}
	}

	fn linux_glibc() -> PlatformTuple {
		PlatformTuple::new("linux", "x86_64", Libc::Glibc, 1)
	}

	fn overrides() -> BindingOverrides {
		BindingOverrides {
			binary_path: Some(PathBuf::from("/opt/custom/profiler.so")),
			binary_dir: Some(PathBuf::from("/opt/bindings")),
			search_root: Some(PathBuf::from("/app")),
		}
	}

	#[test]
	fn artifact_names_include_libc_only_when_relevant() {
		assert_eq!(
			linux_glibc().artifact_file_name(),
			"loom-cpu-profiler-linux-x86_64-glibc-1.so"
		);
		assert_eq!(
			PlatformTuple::new("macos", "aarch64", Libc::None, 1).artifact_file_name(),
			"loom-cpu-profiler-macos-aarch64-1.dylib"
		);
		assert_eq!(
			PlatformTuple::new("windows", "x86_64", Libc::None, 1).artifact_file_name(),
			"loom-cpu-profiler-windows-x86_64-1.dll"
		);
	}

	#[test]
	fn candidates_follow_resolution_order() {
		let candidates = candidate_paths(&linux_glibc(), &overrides());
		assert_eq!(
			candidates,
			vec![
				PathBuf::from("/opt/custom/profiler.so"),
				PathBuf::from("/opt/bindings/loom-cpu-profiler-linux-x86_64-glibc-1.so"),
				PathBuf::from("/app/linux-x86_64-glibc/libloom_cpu_profiler.so"),
				PathBuf::from("/app/loom-cpu-profiler-linux-x86_64-glibc-1.so"),
			]
		);
	}

	#[test]
	fn unknown_platform_skips_table() {
		let platform = PlatformTuple::new("freebsd", "riscv64", Libc::None, 1);
		let overrides = BindingOverrides {
			search_root: Some(PathBuf::from("/app")),
			..Default::default()
		};
		assert_eq!(
			candidate_paths(&platform, &overrides),
			vec![PathBuf::from("/app/loom-cpu-profiler-freebsd-riscv64-1.so")]
		);
	}

	#[test]
	fn table_lookup_respects_abi() {
		let platform = PlatformTuple::new("linux", "x86_64", Libc::Glibc, 2);
		assert!(known_binding(&platform).is_none());
		assert!(known_binding(&linux_glibc()).is_some());
	}

	#[test]
	fn full_path_override_wins() {
		let loader = RecordingLoader::accepting(Some(PathBuf::from("/opt/custom/profiler.so")));
		assert!(resolve(&linux_glibc(), &overrides(), &loader).is_some());
		assert_eq!(loader.seen.lock().len(), 1);
	}

	#[test]
	fn falls_through_to_generic_path() {
		let generic = PathBuf::from("/app/loom-cpu-profiler-linux-x86_64-glibc-1.so");
		let loader = RecordingLoader::accepting(Some(generic));
		assert!(resolve(&linux_glibc(), &overrides(), &loader).is_some());
		assert_eq!(loader.seen.lock().len(), 4);
	}

	#[test]
	fn returns_none_when_nothing_loads() {
		let loader = RecordingLoader::accepting(None);
		assert!(resolve(&linux_glibc(), &overrides(), &loader).is_none());
	}

	#[test]
	fn static_loader_matches_by_file_name() {
		let loader = StaticBindingLoader::new().with_binding(
			"libloom_cpu_profiler.so",
			Arc::new(NullBinding) as Arc<dyn SamplingBinding>,
		);
		let overrides = BindingOverrides {
			search_root: Some(PathBuf::from("/srv")),
			..Default::default()
		};
		assert!(resolve(&linux_glibc(), &overrides, &loader).is_some());

		let musl_arm = PlatformTuple::new("linux", "riscv64", Libc::Musl, 1);
		assert!(resolve(&musl_arm, &overrides, &loader).is_none());
	}

	#[test]
	fn env_overrides_ignore_empty_values() {
		let overrides = BindingOverrides::from_lookup(|key| match key {
			BINARY_PATH_ENV => Some(String::new()),
			BINARY_DIR_ENV => Some("/opt/bindings".to_string()),
			_ => None,
		});
		assert_eq!(overrides.binary_path, None);
		assert_eq!(overrides.binary_dir, Some(PathBuf::from("/opt/bindings")));
	}

	#[test]
	fn current_platform_never_panics() {
		let platform = PlatformTuple::current();
		assert_eq!(platform.abi, BINDING_ABI_VERSION);
		let _ = candidate_paths(&platform, &BindingOverrides::default());
	}

	#[test]
	fn static_loader_rejects_other_abi() {
		struct FutureBinding;

		impl SamplingBinding for FutureBinding {
			fn start_profiling(&self, _name: &str) {}

			fn stop_profiling(&self, _name: &str) -> Option<RawTrace> {
				None
			}

			fn abi_version(&self) -> u32 {
				BINDING_ABI_VERSION + 1
			}
		}

		let platform = linux_glibc();
		let loader = StaticBindingLoader::new().with_binding(
			platform.artifact_file_name(),
			Arc::new(FutureBinding) as Arc<dyn SamplingBinding>,
		);
		let path = PathBuf::from("/srv").join(platform.artifact_file_name());
		assert!(matches!(
			loader.load(&path),
			Err(BindingError::Incompatible { .. })
		));
	}
}
