// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Span-scoped profiling sessions.
//!
//! Each sampled root unit of work gets its own session id, its own profiler
//! session and its own safety timeout. Nothing is shared between sessions, so
//! overlapping units of work never interfere.
//!
//! A session stops exactly once: on the unit of work ending or on the timeout
//! firing, whichever comes first. Later stop requests return the cached
//! result without touching the profiler again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use loom_profiling_core::{is_valid_trace_id, RawTrace, SessionId};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_PROFILE_DURATION, DEFAULT_QUEUE_CAPACITY};
use crate::facade::SamplingProfiler;
use crate::queue::{PendingProfile, ProfileQueue, SessionContext};
use crate::sampling::{should_profile, ProfilesSampler, SamplingContext};
use crate::timer::spawn_detached;

/// A unit of work as seen by the profiler when it starts.
pub trait UnitOfWork {
	/// True for the outermost unit of work of a trace in this process.
	fn is_root(&self) -> bool;
	/// True if the unit of work was selected for tracing.
	fn is_sampled(&self) -> bool;
	fn name(&self) -> &str;
	fn span_id(&self) -> &str;
	fn trace_id(&self) -> &str;
	fn start_timestamp(&self) -> DateTime<Utc>;

	fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
		serde_json::Map::new()
	}
}

/// Read-only view of a unit of work once it has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanSnapshot {
	pub name: String,
	pub span_id: String,
	pub trace_id: String,
	pub attributes: serde_json::Map<String, serde_json::Value>,
	pub start_timestamp: DateTime<Utc>,
	pub end_timestamp: DateTime<Utc>,
}

/// Sampling and timeout settings for span-scoped profiling.
#[derive(Clone)]
pub struct SpanProfilerOptions {
	pub profiles_sample_rate: Option<f64>,
	pub profiles_sampler: Option<ProfilesSampler>,
	pub max_profile_duration: Duration,
	/// How many stopped sessions to remember for repeated end events.
	pub finished_capacity: usize,
}

impl Default for SpanProfilerOptions {
	fn default() -> Self {
		Self {
			profiles_sample_rate: None,
			profiles_sampler: None,
			max_profile_duration: DEFAULT_MAX_PROFILE_DURATION,
			finished_capacity: DEFAULT_QUEUE_CAPACITY,
		}
	}
}

enum SessionState {
	Running { timeout: Option<AbortHandle> },
	Stopped(Option<Arc<RawTrace>>),
}

enum StopCause<'a> {
	Ended(&'a SpanSnapshot),
	TimedOut,
	Shutdown,
}

struct Session {
	id: SessionId,
	name: String,
	span_id: String,
	trace_id: String,
	start_timestamp: DateTime<Utc>,
	active_thread_id: u64,
	active_thread_name: Option<String>,
	state: Mutex<SessionState>,
}

struct Shared {
	facade: Arc<SamplingProfiler>,
	queue: Arc<ProfileQueue>,
	options: SpanProfilerOptions,
	/// Running sessions by span id.
	active: Mutex<HashMap<String, Arc<Session>>>,
	/// Recently stopped sessions by span id, oldest first.
	finished: Mutex<VecDeque<(String, Arc<Session>)>>,
}

/// Handle to one span-scoped profiling session.
#[derive(Clone)]
pub struct SpanProfile {
	session: Arc<Session>,
	shared: Arc<Shared>,
}

impl SpanProfile {
	pub fn session_id(&self) -> &SessionId {
		&self.session.id
	}

	pub fn is_stopped(&self) -> bool {
		matches!(*self.session.state.lock(), SessionState::Stopped(_))
	}

	/// Stops the session for an ended unit of work.
	///
	/// Idempotent: only the first call (or the timeout) stops the profiler;
	/// every call returns the same trace.
	pub fn finish(&self, snapshot: &SpanSnapshot) -> Option<Arc<RawTrace>> {
		self.shared.stop(&self.session, StopCause::Ended(snapshot))
	}
}

/// Starts and stops profiling sessions from unit-of-work lifecycle events.
#[derive(Clone)]
pub struct SpanProfiler {
	shared: Arc<Shared>,
}

impl SpanProfiler {
	pub fn new(
		facade: Arc<SamplingProfiler>,
		queue: Arc<ProfileQueue>,
		options: SpanProfilerOptions,
	) -> Self {
		Self {
			shared: Arc::new(Shared {
				facade,
				queue,
				options,
				active: Mutex::new(HashMap::new()),
				finished: Mutex::new(VecDeque::new()),
			}),
		}
	}

	/// Handles a unit of work starting. Returns a handle if it is being profiled.
	pub fn on_span_start(&self, span: &dyn UnitOfWork) -> Option<SpanProfile> {
		if !span.is_root() {
			return None;
		}
		if !span.is_sampled() {
			debug!(name = %span.name(), "Unit of work not sampled for tracing, not profiling");
			return None;
		}

		if let Some(session) = self.shared.active.lock().get(span.span_id()) {
			debug!(span_id = %span.span_id(), "Unit of work already profiled");
			return Some(self.handle(session.clone()));
		}

		let attributes = span.attributes();
		let ctx = SamplingContext {
			name: span.name(),
			trace_id: span.trace_id(),
			span_id: span.span_id(),
			attributes: &attributes,
		};
		let options = &self.shared.options;
		if !should_profile(
			&ctx,
			options.profiles_sampler.as_ref(),
			options.profiles_sample_rate,
		) {
			return None;
		}

		let session = Arc::new(Session {
			id: SessionId::new(),
			name: span.name().to_string(),
			span_id: span.span_id().to_string(),
			trace_id: span.trace_id().to_string(),
			start_timestamp: span.start_timestamp(),
			active_thread_id: self.shared.facade.current_thread_id(),
			active_thread_name: std::thread::current().name().map(str::to_string),
			state: Mutex::new(SessionState::Running { timeout: None }),
		});

		self.shared.facade.start(session.id.as_str());
		self
			.shared
			.active
			.lock()
			.insert(session.span_id.clone(), session.clone());
		self.arm_timeout(&session);

		debug!(
			session_id = %session.id,
			name = %session.name,
			trace_id = %session.trace_id,
			"Started span profile"
		);

		Some(self.handle(session))
	}

	/// Handles a unit of work ending. Returns the session's trace, if any.
	pub fn on_span_end(&self, snapshot: &SpanSnapshot) -> Option<Arc<RawTrace>> {
		let session = self.shared.find(&snapshot.span_id);
		let Some(session) = session else {
			debug!(span_id = %snapshot.span_id, "No profile session for ended unit of work");
			return None;
		};
		self.shared.stop(&session, StopCause::Ended(snapshot))
	}

	/// Stops every running session.
	pub fn stop_all(&self) {
		let sessions: Vec<_> = self.shared.active.lock().values().cloned().collect();
		for session in sessions {
			self.shared.stop(&session, StopCause::Shutdown);
		}
	}

	/// Number of sessions still running.
	pub fn active_sessions(&self) -> usize {
		self.shared.active.lock().len()
	}

	fn handle(&self, session: Arc<Session>) -> SpanProfile {
		SpanProfile {
			session,
			shared: self.shared.clone(),
		}
	}

	fn arm_timeout(&self, session: &Arc<Session>) {
		let max = self.shared.options.max_profile_duration;
		let deadline = tokio::time::Instant::now() + max;
		let shared: Weak<Shared> = Arc::downgrade(&self.shared);
		let weak_session = Arc::downgrade(session);

		let handle = spawn_detached(async move {
			tokio::time::sleep_until(deadline).await;
			let (Some(shared), Some(session)) = (shared.upgrade(), weak_session.upgrade()) else {
				return;
			};
			shared.stop(&session, StopCause::TimedOut);
		});

		let Some(handle) = handle else {
			return;
		};
		let mut state = session.state.lock();
		match &mut *state {
			SessionState::Running { timeout } => *timeout = Some(handle),
			SessionState::Stopped(_) => handle.abort(),
		}
	}
}

impl Shared {
	fn find(&self, span_id: &str) -> Option<Arc<Session>> {
		if let Some(session) = self.active.lock().get(span_id) {
			return Some(session.clone());
		}
		self
			.finished
			.lock()
			.iter()
			.rev()
			.find(|(id, _)| id == span_id)
			.map(|(_, session)| session.clone())
	}

	fn stop(&self, session: &Arc<Session>, cause: StopCause<'_>) -> Option<Arc<RawTrace>> {
		let mut state = session.state.lock();
		let timeout = match &mut *state {
			SessionState::Stopped(cached) => {
				debug!(session_id = %session.id, "Profile session already stopped");
				return cached.clone();
			}
			SessionState::Running { timeout } => timeout.take(),
		};

		if let Some(handle) = timeout {
			// The timeout task is the caller when it fired; it finishes on its own.
			if !matches!(cause, StopCause::TimedOut) {
				handle.abort();
			}
		}

		let trace = self.facade.stop(session.id.as_str()).map(Arc::new);
		*state = SessionState::Stopped(trace.clone());
		drop(state);

		self.retire(session);

		let (name, end_timestamp) = match cause {
			StopCause::Ended(snapshot) => (snapshot.name.clone(), snapshot.end_timestamp),
			StopCause::TimedOut => {
				info!(
					session_id = %session.id,
					name = %session.name,
					max_duration_ms = self.options.max_profile_duration.as_millis() as u64,
					"Profile exceeded maximum duration, stopped by timeout"
				);
				let max = chrono::Duration::from_std(self.options.max_profile_duration)
					.unwrap_or(chrono::Duration::MAX);
				(session.name.clone(), session.start_timestamp + max)
			}
			StopCause::Shutdown => (session.name.clone(), Utc::now()),
		};

		if let Some(trace) = &trace {
			self.enqueue(session, trace.clone(), name, end_timestamp);
		}
		trace
	}

	fn retire(&self, session: &Arc<Session>) {
		{
			let mut active = self.active.lock();
			if active
				.get(&session.span_id)
				.is_some_and(|s| Arc::ptr_eq(s, session))
			{
				active.remove(&session.span_id);
			}
		}

		let mut finished = self.finished.lock();
		while finished.len() >= self.options.finished_capacity.max(1) {
			finished.pop_front();
		}
		finished.push_back((session.span_id.clone(), session.clone()));
	}

	fn enqueue(
		&self,
		session: &Session,
		trace: Arc<RawTrace>,
		name: String,
		end_timestamp: DateTime<Utc>,
	) {
		if let Err(e) = trace.ensure_min_samples() {
			warn!(session_id = %session.id, error = %e, "Discarding profile");
			return;
		}
		if !is_valid_trace_id(&session.trace_id) {
			warn!(
				session_id = %session.id,
				trace_id = %session.trace_id,
				"Discarding profile with malformed trace id"
			);
			return;
		}

		debug!(
			session_id = %session.id,
			samples = trace.samples.len(),
			sampled_duration_ms = trace.sampled_duration_ns() / 1_000_000,
			"Queued profile for reconciliation"
		);
		self.queue.push(PendingProfile {
			session_id: session.id.clone(),
			trace,
			context: SessionContext {
				name,
				span_id: session.span_id.clone(),
				trace_id: session.trace_id.clone(),
				active_thread_id: session.active_thread_id,
				active_thread_name: session.active_thread_name.clone(),
				start_timestamp: session.start_timestamp,
				end_timestamp,
			},
		});
	}
}
