// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loading a profiler binding from a shared library on disk.
//!
//! The library exports a small C interface:
//!
//! ```text
//! uint32_t loom_profiler_abi_version(void);
//! void     loom_profiler_start(const char *name);
//! uint8_t *loom_profiler_stop(const char *name, size_t *len);  // JSON trace or NULL
//! void     loom_profiler_free(uint8_t *buf, size_t len);
//! uint64_t loom_profiler_current_thread_id(void);               // optional
//! ```

use std::ffi::{c_char, CString};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use loom_profiling_core::RawTrace;
use tracing::warn;

use crate::binding::{BindingLoader, SamplingBinding, BINDING_ABI_VERSION};
use crate::error::BindingError;

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type StartFn = unsafe extern "C" fn(*const c_char);
type StopFn = unsafe extern "C" fn(*const c_char, *mut usize) -> *mut u8;
type FreeFn = unsafe extern "C" fn(*mut u8, usize);
type ThreadIdFn = unsafe extern "C" fn() -> u64;

/// Loader that opens candidate paths as shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibBindingLoader;

impl DylibBindingLoader {
	pub fn new() -> Self {
		Self
	}
}

fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, libloading::Error> {
	// SAFETY: callers name symbols whose signatures match `T`.
	unsafe { library.get::<T>(name).map(|sym| *sym) }
}

impl BindingLoader for DylibBindingLoader {
	fn load(&self, path: &Path) -> Result<Arc<dyn SamplingBinding>, BindingError> {
		if !path.is_file() {
			return Err(BindingError::NotFound(path.to_path_buf()));
		}

		let incompatible = |reason: String| BindingError::Incompatible {
			path: path.to_path_buf(),
			reason,
		};

		// SAFETY: running the library's initialisers is the point of loading it.
		let library = unsafe { Library::new(path) }.map_err(|e| incompatible(e.to_string()))?;

		let abi_version: AbiVersionFn =
			symbol(&library, b"loom_profiler_abi_version\0").map_err(|e| incompatible(e.to_string()))?;
		// SAFETY: takes no arguments and only reports a constant.
		let abi = unsafe { abi_version() };
		if abi != BINDING_ABI_VERSION {
			return Err(incompatible(format!(
				"built for ABI {abi}, expected {BINDING_ABI_VERSION}"
			)));
		}

		let start = symbol(&library, b"loom_profiler_start\0").map_err(|e| incompatible(e.to_string()))?;
		let stop = symbol(&library, b"loom_profiler_stop\0").map_err(|e| incompatible(e.to_string()))?;
		let free = symbol(&library, b"loom_profiler_free\0").map_err(|e| incompatible(e.to_string()))?;
		let thread_id = symbol(&library, b"loom_profiler_current_thread_id\0").ok();

		Ok(Arc::new(DylibBinding {
			start,
			stop,
			free,
			thread_id,
			abi,
			_library: library,
		}))
	}
}

/// A binding backed by a loaded shared library.
///
/// The function pointers stay valid for as long as `_library` is held.
struct DylibBinding {
	start: StartFn,
	stop: StopFn,
	free: FreeFn,
	thread_id: Option<ThreadIdFn>,
	abi: u32,
	_library: Library,
}

impl DylibBinding {
	fn c_name(name: &str) -> Option<CString> {
		match CString::new(name) {
			Ok(name) => Some(name),
			Err(_) => {
				warn!(name, "Profile name contains a NUL byte, ignoring");
				None
			}
		}
	}
}

impl SamplingBinding for DylibBinding {
	fn start_profiling(&self, name: &str) {
		let Some(name) = Self::c_name(name) else {
			return;
		};
		// SAFETY: `name` is a valid NUL-terminated string for the call.
		unsafe { (self.start)(name.as_ptr()) }
	}

	fn stop_profiling(&self, name: &str) -> Option<RawTrace> {
		let name = Self::c_name(name)?;
		let mut len = 0usize;
		// SAFETY: `name` outlives the call and `len` is a valid out pointer.
		let buf = unsafe { (self.stop)(name.as_ptr(), &mut len) };
		if buf.is_null() {
			return None;
		}

		// SAFETY: the library hands back `len` initialised bytes at `buf`,
		// owned by us until passed to `free`.
		let bytes = unsafe { std::slice::from_raw_parts(buf, len) }.to_vec();
		unsafe { (self.free)(buf, len) };

		match serde_json::from_slice(&bytes) {
			Ok(trace) => Some(trace),
			Err(e) => {
				warn!(error = %e, "Profiler binding returned an unreadable trace");
				None
			}
		}
	}

	fn current_thread_id(&self) -> u64 {
		match self.thread_id {
			// SAFETY: takes no arguments and reads the calling thread's id.
			Some(thread_id) => unsafe { thread_id() },
			None => 0,
		}
	}

	fn abi_version(&self) -> u32 {
		self.abi
	}
}
