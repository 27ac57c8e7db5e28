// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded queue of completed traces awaiting reconciliation.
//!
//! Producers push traces as span sessions stop; the transport takes them by
//! session id when it sends the telemetry batch that references them. When
//! the queue is full the oldest entry is evicted, since reconciliation
//! normally happens shortly after a trace is produced.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loom_profiling_core::{
	DebugImage, EnrichedProfile, RawTrace, RuntimeContext, SessionId, ThreadMetadata,
	TransactionMetadata,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::DEFAULT_QUEUE_CAPACITY;

/// What was known about a unit of work when its session was sampled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
	pub name: String,
	pub span_id: String,
	pub trace_id: String,
	pub active_thread_id: u64,
	pub active_thread_name: Option<String>,
	pub start_timestamp: DateTime<Utc>,
	pub end_timestamp: DateTime<Utc>,
}

/// A completed trace plus the context needed to enrich it.
#[derive(Debug, Clone)]
pub struct PendingProfile {
	pub session_id: SessionId,
	pub trace: Arc<RawTrace>,
	pub context: SessionContext,
}

/// Values applied to every profile at enrichment time.
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
	pub release: Option<String>,
	pub environment: Option<String>,
	pub debug_ids: HashMap<String, String>,
	pub runtime: RuntimeContext,
}

impl Default for EnrichmentOptions {
	fn default() -> Self {
		Self {
			release: None,
			environment: None,
			debug_ids: HashMap::new(),
			runtime: RuntimeContext {
				name: "rust".to_string(),
				version: env!("CARGO_PKG_RUST_VERSION").to_string(),
			},
		}
	}
}

impl PendingProfile {
	/// Builds the transport-ready profile.
	pub fn enrich(self, options: &EnrichmentOptions) -> EnrichedProfile {
		let ctx = self.context;
		let trace = Arc::unwrap_or_clone(self.trace);

		let duration_ns = (ctx.end_timestamp - ctx.start_timestamp)
			.num_nanoseconds()
			.unwrap_or(i64::MAX)
			.max(0);

		let mut thread_metadata: BTreeMap<String, ThreadMetadata> = trace
			.thread_ids()
			.into_iter()
			.map(|id| (id.to_string(), ThreadMetadata::default()))
			.collect();
		thread_metadata.insert(
			ctx.active_thread_id.to_string(),
			ThreadMetadata {
				name: Some(
					ctx.active_thread_name
						.clone()
						.unwrap_or_else(|| "main".to_string()),
				),
				priority: None,
			},
		);

		let debug_images = DebugImage::for_resources(&trace.resources, &options.debug_ids);

		let transaction = TransactionMetadata {
			name: ctx.name,
			id: ctx.span_id,
			trace_id: ctx.trace_id,
			active_thread_id: ctx.active_thread_id.to_string(),
			relative_start_ns: "0".to_string(),
			relative_end_ns: duration_ns.to_string(),
		};

		EnrichedProfile::new(
			self.session_id,
			ctx.start_timestamp,
			trace,
			transaction,
			thread_metadata,
			debug_images,
			options.runtime.clone(),
		)
		.with_release(options.release.clone())
		.with_environment(options.environment.clone())
	}
}

/// Bounded FIFO of pending profiles.
pub struct ProfileQueue {
	entries: Mutex<VecDeque<PendingProfile>>,
	capacity: usize,
}

impl ProfileQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: Mutex::new(VecDeque::with_capacity(capacity)),
			capacity,
		}
	}

	pub fn with_default_capacity() -> Self {
		Self::new(DEFAULT_QUEUE_CAPACITY)
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Adds a profile, evicting the oldest entries if the queue is full.
	pub fn push(&self, profile: PendingProfile) {
		if self.capacity == 0 {
			warn!(session_id = %profile.session_id, "Profile queue has no capacity, dropping profile");
			return;
		}

		let mut entries = self.entries.lock();
		while entries.len() >= self.capacity {
			if let Some(evicted) = entries.pop_front() {
				warn!(
					session_id = %evicted.session_id,
					capacity = self.capacity,
					"Profile queue full, evicted oldest profile"
				);
			}
		}
		entries.push_back(profile);
	}

	/// Removes and returns the profile for `session_id`, if still queued.
	pub fn take_by_session_id(&self, session_id: &SessionId) -> Option<PendingProfile> {
		let mut entries = self.entries.lock();
		let index = entries.iter().position(|p| &p.session_id == session_id)?;
		let profile = entries.remove(index);
		drop(entries);

		debug!(session_id = %session_id, "Reconciled profile with telemetry batch");
		profile
	}

	pub fn contains(&self, session_id: &SessionId) -> bool {
		self.entries.lock().iter().any(|p| &p.session_id == session_id)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}

impl Default for ProfileQueue {
	fn default() -> Self {
		Self::with_default_capacity()
	}
}
