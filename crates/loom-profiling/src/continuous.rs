// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Continuous profiling in fixed-size chunks.
//!
//! While running, the controller keeps one profiler session open at a time,
//! rotating it every chunk interval. All chunks of one run share a
//! [`ProfilerId`]. A run never lasts longer than the maximum session
//! duration: when it is reached the controller emits the last chunk and stops
//! itself. Starting again always begins a new profiler id.
//!
//! When the chunk interval does not evenly divide the maximum duration, the
//! final chunk is cut short at the deadline and still emitted.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use loom_profiling_core::{
	ChunkId, ChunkProfile, ClientSdkInfo, DebugImage, DebugMeta, ProfilerId, RawTrace,
};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_CHUNK_INTERVAL, DEFAULT_MAX_CONTINUOUS_DURATION};
use crate::facade::SamplingProfiler;
use crate::timer::{runtime_available, spawn_detached};
use crate::{SDK_NAME, SDK_VERSION};

/// Subscriber for finished chunks.
pub type ChunkCallback = Arc<dyn Fn(&ChunkProfile) + Send + Sync>;

const MIN_CHUNK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ContinuousOptions {
	pub chunk_interval: Duration,
	pub max_session_duration: Duration,
	pub release: Option<String>,
	pub environment: Option<String>,
	pub debug_ids: HashMap<String, String>,
	pub client_sdk: ClientSdkInfo,
}

impl Default for ContinuousOptions {
	fn default() -> Self {
		Self {
			chunk_interval: DEFAULT_CHUNK_INTERVAL,
			max_session_duration: DEFAULT_MAX_CONTINUOUS_DURATION,
			release: None,
			environment: None,
			debug_ids: HashMap::new(),
			client_sdk: ClientSdkInfo {
				name: SDK_NAME.to_string(),
				version: SDK_VERSION.to_string(),
			},
		}
	}
}

struct Run {
	generation: u64,
	profiler_id: ProfilerId,
	chunk_id: ChunkId,
	chunk_started_at: DateTime<Utc>,
	deadline: Instant,
	timer: Option<AbortHandle>,
}

#[derive(Default)]
struct State {
	generation: u64,
	run: Option<Run>,
}

/// A chunk taken off the profiler, ready to be enriched outside the lock.
struct FinishedChunk {
	profiler_id: ProfilerId,
	chunk_id: ChunkId,
	started_at: DateTime<Utc>,
	trace: Option<RawTrace>,
}

struct Inner {
	facade: Arc<SamplingProfiler>,
	options: ContinuousOptions,
	state: Mutex<State>,
	callbacks: Mutex<Vec<ChunkCallback>>,
}

/// Drives the sampling profiler on a fixed interval.
#[derive(Clone)]
pub struct ChunkController {
	inner: Arc<Inner>,
}

impl ChunkController {
	pub fn new(facade: Arc<SamplingProfiler>, options: ContinuousOptions) -> Self {
		Self {
			inner: Arc::new(Inner {
				facade,
				options,
				state: Mutex::new(State::default()),
				callbacks: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Registers a subscriber for finished chunks.
	pub fn on_chunk_ready(&self, callback: ChunkCallback) {
		self.inner.callbacks.lock().push(callback);
	}

	pub fn is_running(&self) -> bool {
		self.inner.state.lock().run.is_some()
	}

	/// Profiler id of the current run.
	pub fn profiler_id(&self) -> Option<ProfilerId> {
		self
			.inner
			.state
			.lock()
			.run
			.as_ref()
			.map(|run| run.profiler_id.clone())
	}

	/// Starts a new run. A no-op if one is already in progress.
	///
	/// Refuses to start outside a tokio runtime, where neither chunk rotation
	/// nor the kill-switch could be scheduled.
	pub fn start(&self) {
		if !runtime_available() {
			warn!("No tokio runtime available, continuous profiler not started");
			return;
		}

		let interval = self.inner.options.chunk_interval.max(MIN_CHUNK_INTERVAL);
		let now = Instant::now();

		let mut state = self.inner.state.lock();
		if let Some(run) = &state.run {
			debug!(profiler_id = %run.profiler_id, "Continuous profiler already running");
			return;
		}

		state.generation += 1;
		let generation = state.generation;
		let deadline = now + self.inner.options.max_session_duration;
		let chunk_id = ChunkId::new();
		self.inner.facade.start(chunk_id.as_str());

		let run = Run {
			generation,
			profiler_id: ProfilerId::new(),
			chunk_id,
			chunk_started_at: Utc::now(),
			deadline,
			timer: None,
		};
		info!(
			profiler_id = %run.profiler_id,
			chunk_interval_ms = interval.as_millis() as u64,
			max_duration_ms = self.inner.options.max_session_duration.as_millis() as u64,
			"Continuous profiler started"
		);
		state.run = Some(run);

		let first_wake = (now + interval).min(deadline);
		let timer = spawn_detached(run_chunks(
			Arc::downgrade(&self.inner),
			generation,
			first_wake,
		));
		if let Some(run) = state.run.as_mut() {
			run.timer = timer;
		}
	}

	/// Stops the current run and emits its partial chunk. A no-op when idle.
	pub fn stop(&self) {
		let finished = {
			let mut state = self.inner.state.lock();
			let Some(run) = state.run.take() else {
				debug!("Continuous profiler not running");
				return;
			};
			if let Some(timer) = &run.timer {
				timer.abort();
			}
			info!(profiler_id = %run.profiler_id, "Continuous profiler stopped");
			self.inner.close(run)
		};
		self.inner.emit(finished);
	}
}

async fn run_chunks(inner: Weak<Inner>, generation: u64, first_wake: Instant) {
	let mut wake = first_wake;
	loop {
		tokio::time::sleep_until(wake).await;
		let Some(inner) = inner.upgrade() else {
			return;
		};
		match inner.rotate(generation, wake) {
			Some(next) => wake = next,
			None => return,
		}
	}
}

impl Inner {
	/// Closes the current chunk at `now` and opens the next one, unless the
	/// run has reached its deadline. Returns when to rotate again.
	fn rotate(&self, generation: u64, now: Instant) -> Option<Instant> {
		let (finished, next) = {
			let mut state = self.state.lock();
			let deadline = match &state.run {
				Some(run) if run.generation == generation => run.deadline,
				_ => return None,
			};

			if now >= deadline {
				let run = state.run.take()?;
				info!(
					profiler_id = %run.profiler_id,
					max_duration_ms = self.options.max_session_duration.as_millis() as u64,
					"Continuous profiler reached maximum session duration, stopping"
				);
				(self.close(run), None)
			} else {
				let run = state.run.as_mut()?;
				let chunk_id = std::mem::replace(&mut run.chunk_id, ChunkId::new());
				let started_at = std::mem::replace(&mut run.chunk_started_at, Utc::now());
				let trace = self.facade.stop(chunk_id.as_str());
				self.facade.start(run.chunk_id.as_str());

				let interval = self.options.chunk_interval.max(MIN_CHUNK_INTERVAL);
				let finished = FinishedChunk {
					profiler_id: run.profiler_id.clone(),
					chunk_id,
					started_at,
					trace,
				};
				(finished, Some((now + interval).min(deadline)))
			}
		};

		self.emit(finished);
		next
	}

	/// Stops the profiler session of a run that has ended.
	fn close(&self, run: Run) -> FinishedChunk {
		let trace = self.facade.stop(run.chunk_id.as_str());
		FinishedChunk {
			profiler_id: run.profiler_id,
			chunk_id: run.chunk_id,
			started_at: run.chunk_started_at,
			trace,
		}
	}

	fn emit(&self, finished: FinishedChunk) {
		let Some(trace) = finished.trace else {
			warn!(
				profiler_id = %finished.profiler_id,
				chunk_id = %finished.chunk_id,
				"Profiler returned no trace for chunk, dropping it"
			);
			return;
		};
		if trace.samples.is_empty() {
			debug!(chunk_id = %finished.chunk_id, "Chunk has no samples, dropping it");
			return;
		}

		let debug_meta = DebugMeta {
			images: DebugImage::for_resources(&trace.resources, &self.options.debug_ids),
		};
		let chunk = ChunkProfile::from_trace(
			trace,
			finished.profiler_id,
			finished.chunk_id,
			finished.started_at,
			self.options.client_sdk.clone(),
			debug_meta,
		)
		.with_release(self.options.release.clone())
		.with_environment(self.options.environment.clone());

		debug!(
			profiler_id = %chunk.profiler_id,
			chunk_id = %chunk.chunk_id,
			samples = chunk.profile.samples.len(),
			"Chunk ready"
		);

		let callbacks = self.callbacks.lock().clone();
		for callback in callbacks {
			if catch_unwind(AssertUnwindSafe(|| callback(&chunk))).is_err() {
				warn!(chunk_id = %chunk.chunk_id, "Chunk subscriber panicked");
			}
		}
	}
}
