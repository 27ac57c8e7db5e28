// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stable start/stop interface over an optional profiler binding.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_profiling_core::RawTrace;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binding::SamplingBinding;

/// Drives a [`SamplingBinding`] by session name.
///
/// Without a binding every call is a no-op and `stop` returns `None`. The
/// facade never panics: binding panics and malformed traces both become
/// "no trace".
pub struct SamplingProfiler {
	binding: Option<Arc<dyn SamplingBinding>>,
	running: Mutex<HashSet<String>>,
	warned_start: AtomicBool,
	warned_stop: AtomicBool,
}

impl SamplingProfiler {
	pub fn new(binding: Option<Arc<dyn SamplingBinding>>) -> Self {
		Self {
			binding,
			running: Mutex::new(HashSet::new()),
			warned_start: AtomicBool::new(false),
			warned_stop: AtomicBool::new(false),
		}
	}

	/// A facade that never profiles.
	pub fn disabled() -> Self {
		Self::new(None)
	}

	pub fn is_available(&self) -> bool {
		self.binding.is_some()
	}

	/// Number of sessions started and not yet stopped.
	pub fn running_sessions(&self) -> usize {
		self.running.lock().len()
	}

	pub fn is_running(&self, name: &str) -> bool {
		self.running.lock().contains(name)
	}

	pub fn start(&self, name: &str) {
		let Some(binding) = &self.binding else {
			if !self.warned_start.swap(true, Ordering::Relaxed) {
				warn!("Profiler binding unavailable, profiling start is a no-op");
			}
			return;
		};

		if !self.running.lock().insert(name.to_string()) {
			debug!(session = %name, "Profiler session already running, ignoring start");
			return;
		}

		if catch_unwind(AssertUnwindSafe(|| binding.start_profiling(name))).is_err() {
			self.running.lock().remove(name);
			warn!(session = %name, "Profiler binding panicked while starting");
		}
	}

	pub fn stop(&self, name: &str) -> Option<RawTrace> {
		let Some(binding) = &self.binding else {
			if !self.warned_stop.swap(true, Ordering::Relaxed) {
				warn!("Profiler binding unavailable, profiling stop is a no-op");
			}
			return None;
		};

		if !self.running.lock().remove(name) {
			debug!(session = %name, "Profiler session not running, ignoring stop");
			return None;
		}

		let trace = match catch_unwind(AssertUnwindSafe(|| binding.stop_profiling(name))) {
			Ok(trace) => trace?,
			Err(_) => {
				warn!(session = %name, "Profiler binding panicked while stopping");
				return None;
			}
		};

		if let Err(e) = trace.validate() {
			warn!(session = %name, error = %e, "Discarding malformed trace");
			return None;
		}

		Some(trace)
	}

	/// Thread id the binding uses for the calling thread.
	pub fn current_thread_id(&self) -> u64 {
		self
			.binding
			.as_ref()
			.map(|b| b.current_thread_id())
			.unwrap_or(0)
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use super::*;
	use loom_profiling_core::{Frame, Sample, Stack};
	use std::collections::HashMap;
	use std::sync::atomic::AtomicUsize;

	/// In-memory binding that hands back a fixed number of samples per session.
	pub struct FakeBinding {
		pub samples_per_trace: usize,
		pub starts: AtomicUsize,
		pub stops: AtomicUsize,
		pub started: Mutex<Vec<String>>,
		/// Sessions for which `stop_profiling` returns `None`.
		pub fail_stop: Mutex<HashSet<String>>,
		active: Mutex<HashMap<String, u64>>,
		next_thread: AtomicUsize,
	}

	impl FakeBinding {
		pub fn new(samples_per_trace: usize) -> Self {
			Self {
				samples_per_trace,
				starts: AtomicUsize::new(0),
				stops: AtomicUsize::new(0),
				started: Mutex::new(Vec::new()),
				fail_stop: Mutex::new(HashSet::new()),
				active: Mutex::new(HashMap::new()),
				next_thread: AtomicUsize::new(0),
			}
		}

		pub fn starts(&self) -> usize {
			self.starts.load(Ordering::SeqCst)
		}

		pub fn stops(&self) -> usize {
			self.stops.load(Ordering::SeqCst)
		}
	}

	impl SamplingBinding for FakeBinding {
		fn start_profiling(&self, name: &str) {
			self.starts.fetch_add(1, Ordering::SeqCst);
			self.started.lock().push(name.to_string());
			let thread = self.next_thread.fetch_add(1, Ordering::SeqCst) as u64;
			self.active.lock().insert(name.to_string(), thread);
		}

		fn stop_profiling(&self, name: &str) -> Option<RawTrace> {
			self.stops.fetch_add(1, Ordering::SeqCst);
			let thread_id = self.active.lock().remove(name)?;
			if self.fail_stop.lock().contains(name) {
				return None;
			}

			// The frame name carries the session so tests can tell traces apart.
			Some(RawTrace {
				frames: vec![Frame {
					function: Some(format!("work_{name}")),
					abs_path: Some("/app/src/main.rs".to_string()),
					lineno: Some(10),
					colno: None,
				}],
				stacks: vec![Stack(vec![0])],
				samples: (0..self.samples_per_trace)
					.map(|i| Sample {
						stack_id: 0,
						thread_id,
						elapsed_since_start_ns: i as u64 * 10_000_000,
					})
					.collect(),
				resources: vec!["/app/src/main.rs".to_string()],
				..Default::default()
			})
		}
	}

	pub fn fake_profiler(samples_per_trace: usize) -> (Arc<FakeBinding>, Arc<SamplingProfiler>) {
		let binding = Arc::new(FakeBinding::new(samples_per_trace));
		let profiler = Arc::new(SamplingProfiler::new(Some(
			binding.clone() as Arc<dyn SamplingBinding>
		)));
		(binding, profiler)
	}
}

#[cfg(test)]
mod tests {
	use super::testing::*;
	use super::*;

	struct PanickingBinding;

	impl SamplingBinding for PanickingBinding {
		fn start_profiling(&self, _name: &str) {
			panic!("start failed");
		}

		fn stop_profiling(&self, _name: &str) -> Option<RawTrace> {
			panic!("stop failed");
		}
	}

	#[test]
	fn missing_binding_is_a_noop() {
		let profiler = SamplingProfiler::disabled();
		profiler.start("a");
		profiler.start("b");
		assert!(profiler.stop("a").is_none());
		assert!(!profiler.is_available());
		assert_eq!(profiler.running_sessions(), 0);
	}

	#[test]
	fn start_then_stop_returns_trace() {
		let (binding, profiler) = fake_profiler(3);
		profiler.start("session");
		assert!(profiler.is_running("session"));

		let trace = profiler.stop("session").unwrap();
		assert_eq!(trace.samples.len(), 3);
		assert_eq!(binding.stops(), 1);
		assert!(!profiler.is_running("session"));
	}

	#[test]
	fn stop_unknown_session_returns_none_without_calling_binding() {
		let (binding, profiler) = fake_profiler(3);
		assert!(profiler.stop("never-started").is_none());
		assert_eq!(binding.stops(), 0);
	}

	#[test]
	fn second_stop_returns_none() {
		let (binding, profiler) = fake_profiler(3);
		profiler.start("session");
		assert!(profiler.stop("session").is_some());
		assert!(profiler.stop("session").is_none());
		assert_eq!(binding.stops(), 1);
	}

	#[test]
	fn duplicate_start_is_ignored() {
		let (binding, profiler) = fake_profiler(3);
		profiler.start("session");
		profiler.start("session");
		assert_eq!(binding.starts(), 1);
	}

	#[test]
	fn binding_panics_are_contained() {
		let profiler = SamplingProfiler::new(Some(Arc::new(PanickingBinding)));
		profiler.start("session");
		assert!(!profiler.is_running("session"));
		assert!(profiler.stop("session").is_none());
	}

	#[test]
	fn malformed_trace_is_discarded() {
		struct BrokenBinding;

		impl SamplingBinding for BrokenBinding {
			fn start_profiling(&self, _name: &str) {}

			fn stop_profiling(&self, _name: &str) -> Option<RawTrace> {
				Some(RawTrace {
					samples: vec![loom_profiling_core::Sample {
						stack_id: 3,
						thread_id: 0,
						elapsed_since_start_ns: 0,
					}],
					..Default::default()
				})
			}
		}

		let profiler = SamplingProfiler::new(Some(Arc::new(BrokenBinding)));
		profiler.start("session");
		assert!(profiler.stop("session").is_none());
	}
}
