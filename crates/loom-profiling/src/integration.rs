// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The profiling integration a host application installs.
//!
//! One [`ProfilingIntegration`] owns its own profiler facade, reconciliation
//! queue, span sessions and chunk controller. Several integrations can live in
//! one process without sharing any state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_profiling_core::{ClientSdkInfo, EnrichedProfile, RawTrace, SessionId};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::binding::{resolve, BindingLoader, PlatformTuple, SamplingBinding};
use crate::config::{ProfileLifecycle, ProfilingConfig, ProfilingConfigLayer};
use crate::continuous::{ChunkCallback, ChunkController, ContinuousOptions};
use crate::dylib::DylibBindingLoader;
use crate::error::{ProfilingSdkError, Result};
use crate::facade::SamplingProfiler;
use crate::queue::{EnrichmentOptions, ProfileQueue};
use crate::sampling::{sample_rate, SampleDecision, SamplingContext};
use crate::session::{SpanProfile, SpanProfiler, SpanProfilerOptions, SpanSnapshot, UnitOfWork};
use crate::{SDK_NAME, SDK_VERSION};

/// Builder for constructing a [`ProfilingIntegration`].
///
/// Setters and config layers apply in call order; later calls win.
pub struct ProfilingIntegrationBuilder {
	config: ProfilingConfig,
	binding: Option<Arc<dyn SamplingBinding>>,
	loader: Option<Arc<dyn BindingLoader>>,
	platform: Option<PlatformTuple>,
}

impl Default for ProfilingIntegrationBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ProfilingIntegrationBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			config: ProfilingConfig::default(),
			binding: None,
			loader: None,
			platform: None,
		}
	}

	/// Sets the static per-unit-of-work sample rate (0.0-1.0).
	pub fn profiles_sample_rate(mut self, rate: f64) -> Self {
		self.config.profiles_sample_rate = Some(rate);
		self
	}

	/// Sets a sampler function. Takes priority over the static rate.
	///
	/// # Example
	///
	/// ```ignore
	/// let integration = ProfilingIntegration::builder()
	///     .profiles_sampler(|ctx| {
	///         if ctx.name.starts_with("health") { false.into() } else { 0.25.into() }
	///     })
	///     .build()?;
	/// ```
	pub fn profiles_sampler(
		mut self,
		sampler: impl Fn(&SamplingContext<'_>) -> SampleDecision + Send + Sync + 'static,
	) -> Self {
		self.config.profiles_sampler = Some(Arc::new(sampler));
		self
	}

	/// Sets how long a span profile may run before it is force-stopped.
	pub fn max_profile_duration(mut self, duration: Duration) -> Self {
		self.config.max_profile_duration = duration;
		self
	}

	/// Sets how many finished profiles are kept awaiting reconciliation.
	pub fn queue_capacity(mut self, capacity: usize) -> Self {
		self.config.queue_capacity = capacity;
		self
	}

	/// Enables continuous profiling for the given fraction of processes.
	///
	/// Continuous and span-scoped profiling are mutually exclusive; when both
	/// are configured continuous mode wins.
	pub fn profile_session_sample_rate(mut self, rate: f64) -> Self {
		self.config.profile_session_sample_rate = Some(rate);
		self
	}

	/// Sets who drives continuous mode.
	pub fn profile_lifecycle(mut self, lifecycle: ProfileLifecycle) -> Self {
		self.config.profile_lifecycle = lifecycle;
		self
	}

	/// Sets the length of one continuous chunk.
	pub fn chunk_interval(mut self, interval: Duration) -> Self {
		self.config.chunk_interval = interval;
		self
	}

	/// Sets the longest a continuous run may last before it stops itself.
	pub fn max_continuous_duration(mut self, duration: Duration) -> Self {
		self.config.max_continuous_duration = duration;
		self
	}

	/// Maps a resource path to its debug id.
	pub fn debug_id(mut self, path: impl Into<String>, debug_id: impl Into<String>) -> Self {
		self.config.debug_ids.insert(path.into(), debug_id.into());
		self
	}

	/// Sets the release version.
	///
	/// Example: `1.2.3` or `git commit SHA`
	pub fn release(mut self, release: impl Into<String>) -> Self {
		self.config.release = Some(release.into());
		self
	}

	/// Sets the environment name.
	///
	/// Example: `production`, `staging`, `development`
	pub fn environment(mut self, env: impl Into<String>) -> Self {
		self.config.environment = Some(env.into());
		self
	}

	/// Sets an explicit path to the profiler binding artifact.
	pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.binding_overrides.binary_path = Some(path.into());
		self
	}

	/// Sets a directory holding the profiler binding artifact.
	pub fn binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.binding_overrides.binary_dir = Some(dir.into());
		self
	}

	/// Uses `binding` directly and skips resolution.
	pub fn binding(mut self, binding: Arc<dyn SamplingBinding>) -> Self {
		self.binding = Some(binding);
		self
	}

	/// Sets the loader used to resolve the binding.
	///
	/// Defaults to [`DylibBindingLoader`], which opens shared libraries on disk.
	pub fn binding_loader(mut self, loader: Arc<dyn BindingLoader>) -> Self {
		self.loader = Some(loader);
		self
	}

	/// Overrides the detected platform used for binding resolution.
	pub fn platform(mut self, platform: PlatformTuple) -> Self {
		self.platform = Some(platform);
		self
	}

	/// Applies a configuration layer, e.g. from [`ProfilingConfigLayer::load`].
	pub fn config_layer(mut self, layer: ProfilingConfigLayer) -> Self {
		self.config.apply_layer(layer);
		self
	}

	/// Builds the integration.
	///
	/// Fails only on invalid configuration. A missing profiler binding is not
	/// an error: the integration then produces no profiles.
	pub fn build(self) -> Result<ProfilingIntegration> {
		let mut config = self.config;
		config.validate()?;

		let binding = match self.binding {
			Some(binding) => Some(binding),
			None => {
				let platform = self.platform.unwrap_or_else(PlatformTuple::current);
				let loader = self
					.loader
					.unwrap_or_else(|| Arc::new(DylibBindingLoader::new()));
				resolve(&platform, &config.binding_overrides, loader.as_ref())
			}
		};
		let facade = Arc::new(SamplingProfiler::new(binding));

		let continuous_enabled = config.profile_session_sample_rate.is_some();
		if continuous_enabled
			&& (config.profiles_sample_rate.is_some() || config.profiles_sampler.is_some())
		{
			warn!(
				"Both span and continuous profiling are configured, using continuous profiling only"
			);
			config.profiles_sample_rate = None;
			config.profiles_sampler = None;
		}
		let session_sampled = config
			.profile_session_sample_rate
			.map(sample_rate)
			.unwrap_or(false);

		let queue = Arc::new(ProfileQueue::new(config.queue_capacity));
		let spans = SpanProfiler::new(
			facade.clone(),
			queue.clone(),
			SpanProfilerOptions {
				profiles_sample_rate: config.profiles_sample_rate,
				profiles_sampler: config.profiles_sampler.clone(),
				max_profile_duration: config.max_profile_duration,
				finished_capacity: config.queue_capacity,
			},
		);
		let chunks = ChunkController::new(
			facade.clone(),
			ContinuousOptions {
				chunk_interval: config.chunk_interval,
				max_session_duration: config.max_continuous_duration,
				release: config.release.clone(),
				environment: config.environment.clone(),
				debug_ids: config.debug_ids.clone(),
				client_sdk: ClientSdkInfo {
					name: SDK_NAME.to_string(),
					version: SDK_VERSION.to_string(),
				},
			},
		);

		info!(
			binding_available = facade.is_available(),
			continuous = continuous_enabled,
			session_sampled,
			lifecycle = %config.profile_lifecycle,
			"Profiling integration initialized"
		);

		Ok(ProfilingIntegration {
			inner: Arc::new(IntegrationInner {
				facade,
				queue,
				spans,
				chunks,
				enrichment: EnrichmentOptions {
					release: config.release,
					environment: config.environment,
					debug_ids: config.debug_ids,
					..Default::default()
				},
				lifecycle: config.profile_lifecycle,
				continuous_enabled,
				session_sampled,
				trace_roots: Mutex::new(HashSet::new()),
				closed: AtomicBool::new(false),
			}),
		})
	}
}

struct IntegrationInner {
	facade: Arc<SamplingProfiler>,
	queue: Arc<ProfileQueue>,
	spans: SpanProfiler,
	chunks: ChunkController,
	enrichment: EnrichmentOptions,
	lifecycle: ProfileLifecycle,
	continuous_enabled: bool,
	session_sampled: bool,
	/// Root units of work keeping the current trace-lifecycle run alive.
	trace_roots: Mutex<HashSet<String>>,
	closed: AtomicBool,
}

/// Span-scoped and continuous CPU profiling for one client.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProfilingIntegration {
	inner: Arc<IntegrationInner>,
}

impl ProfilingIntegration {
	/// Creates a new builder for constructing an integration.
	pub fn builder() -> ProfilingIntegrationBuilder {
		ProfilingIntegrationBuilder::new()
	}

	/// Whether a profiler binding was found.
	pub fn is_profiler_available(&self) -> bool {
		self.inner.facade.is_available()
	}

	/// Whether this process was selected for continuous profiling.
	pub fn is_session_sampled(&self) -> bool {
		self.inner.session_sampled
	}

	/// Handles a unit of work starting.
	///
	/// Returns a handle when a span profile was started for it.
	pub fn on_span_start(&self, span: &dyn UnitOfWork) -> Option<SpanProfile> {
		if self.is_closed() {
			return None;
		}
		if self.inner.continuous_enabled {
			self.track_trace_root_start(span);
			return None;
		}
		self.inner.spans.on_span_start(span)
	}

	/// Handles a unit of work ending.
	pub fn on_span_end(&self, snapshot: &SpanSnapshot) -> Option<Arc<RawTrace>> {
		if self.inner.continuous_enabled {
			self.track_trace_root_end(snapshot);
			return None;
		}
		self.inner.spans.on_span_end(snapshot)
	}

	/// Removes and enriches the profile recorded for `session_id`.
	///
	/// Returns `None` if it was never produced, was discarded, was evicted or
	/// was already taken. Never waits for a profile to appear.
	pub fn take_profile_for_session(&self, session_id: &SessionId) -> Option<EnrichedProfile> {
		let Some(pending) = self.inner.queue.take_by_session_id(session_id) else {
			debug!(session_id = %session_id, "No profile pending for session");
			return None;
		};
		Some(pending.enrich(&self.inner.enrichment))
	}

	/// Takes every available profile for `session_ids`.
	pub fn take_profiles_for_sessions(
		&self,
		session_ids: &[SessionId],
	) -> HashMap<SessionId, EnrichedProfile> {
		session_ids
			.iter()
			.filter_map(|id| {
				self
					.take_profile_for_session(id)
					.map(|profile| (id.clone(), profile))
			})
			.collect()
	}

	/// Number of finished profiles awaiting reconciliation.
	pub fn pending_profiles(&self) -> usize {
		self.inner.queue.len()
	}

	/// Subscribes to continuous chunks.
	pub fn on_chunk_ready(&self, callback: ChunkCallback) {
		self.inner.chunks.on_chunk_ready(callback);
	}

	pub fn is_continuous_running(&self) -> bool {
		self.inner.chunks.is_running()
	}

	/// Starts continuous profiling under the manual lifecycle.
	///
	/// Has no effect outside a tokio runtime.
	pub fn start_profiler(&self) -> Result<()> {
		if self.is_closed() {
			return Err(ProfilingSdkError::IntegrationShutdown);
		}
		if !self.continuous_available() {
			return Ok(());
		}
		if self.inner.lifecycle != ProfileLifecycle::Manual {
			warn!(
				lifecycle = %self.inner.lifecycle,
				"start_profiler has no effect unless the profile lifecycle is manual"
			);
			return Ok(());
		}
		self.inner.chunks.start();
		Ok(())
	}

	/// Stops continuous profiling under the manual lifecycle.
	pub fn stop_profiler(&self) {
		if !self.continuous_available() {
			return;
		}
		if self.inner.lifecycle != ProfileLifecycle::Manual {
			warn!(
				lifecycle = %self.inner.lifecycle,
				"stop_profiler has no effect unless the profile lifecycle is manual"
			);
			return;
		}
		self.inner.chunks.stop();
	}

	/// Stops continuous mode and every running span profile.
	///
	/// Idempotent. Profiles finished by shutdown remain available to
	/// [`take_profile_for_session`](Self::take_profile_for_session).
	pub fn shutdown(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			debug!("Profiling integration already shut down");
			return;
		}
		self.inner.trace_roots.lock().clear();
		if self.inner.chunks.is_running() {
			self.inner.chunks.stop();
		}
		self.inner.spans.stop_all();
		info!("Profiling integration shut down");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn continuous_available(&self) -> bool {
		if !self.inner.continuous_enabled {
			warn!("Continuous profiling is not configured, set profile_session_sample_rate");
			return false;
		}
		if !self.inner.session_sampled {
			debug!("Process not sampled for continuous profiling");
			return false;
		}
		true
	}

	fn track_trace_root_start(&self, span: &dyn UnitOfWork) {
		if self.inner.lifecycle != ProfileLifecycle::Trace
			|| !self.inner.session_sampled
			|| !span.is_root()
			|| !span.is_sampled()
		{
			return;
		}
		// Held across start so concurrent roots agree on which run they join.
		let mut roots = self.inner.trace_roots.lock();
		if !self.inner.chunks.is_running() {
			// Left over from a run that already ended, e.g. by the kill-switch.
			roots.clear();
			self.inner.chunks.start();
		}
		roots.insert(span.span_id().to_string());
	}

	fn track_trace_root_end(&self, snapshot: &SpanSnapshot) {
		if self.inner.lifecycle != ProfileLifecycle::Trace {
			return;
		}
		let last = {
			let mut roots = self.inner.trace_roots.lock();
			roots.remove(&snapshot.span_id) && roots.is_empty()
		};
		if last {
			self.inner.chunks.stop();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::binding::{Libc, StaticBindingLoader};
	use crate::facade::testing::FakeBinding;
	use crate::session::testing::{advance, TestSpan};
	use loom_profiling_core::ChunkProfile;

	fn fake_binding() -> (Arc<FakeBinding>, Arc<dyn SamplingBinding>) {
		let binding = Arc::new(FakeBinding::new(5));
		(binding.clone(), binding as Arc<dyn SamplingBinding>)
	}

	fn collect_chunks(integration: &ProfilingIntegration) -> Arc<Mutex<Vec<ChunkProfile>>> {
		let chunks = Arc::new(Mutex::new(Vec::new()));
		let sink = chunks.clone();
		integration.on_chunk_ready(Arc::new(move |chunk: &ChunkProfile| {
			sink.lock().push(chunk.clone());
		}));
		chunks
	}

	#[tokio::test(start_paused = true)]
	async fn reconciles_enriched_profile_for_root_unit() {
		let (_fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profiles_sample_rate(1.0)
			.release("1.0.0")
			.environment("test")
			.debug_id("/app/src/main.rs", "d4c3b2a1-0000-4000-8000-000000000001")
			.binding(binding)
			.build()
			.unwrap();

		let span = TestSpan::root("root-1");
		let profile = integration.on_span_start(&span).unwrap();
		advance(Duration::from_millis(100)).await;
		integration.on_span_end(&span.snapshot_after(100));

		let enriched = integration
			.take_profile_for_session(profile.session_id())
			.unwrap();
		assert_eq!(enriched.transactions[0].name, "root-1");
		assert_eq!(enriched.transactions[0].trace_id, span.trace_id);
		assert_eq!(enriched.release.as_deref(), Some("1.0.0"));
		assert_eq!(enriched.environment.as_deref(), Some("test"));
		assert_eq!(enriched.debug_meta.images.len(), 1);
		assert_eq!(enriched.debug_meta.images[0].code_file, "/app/src/main.rs");

		assert!(integration
			.take_profile_for_session(profile.session_id())
			.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn takes_profiles_for_several_sessions() {
		let (_fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profiles_sample_rate(1.0)
			.binding(binding)
			.build()
			.unwrap();

		let spans: Vec<_> = (0..3).map(|i| TestSpan::root(&format!("op-{i}"))).collect();
		let ids: Vec<_> = spans
			.iter()
			.map(|s| integration.on_span_start(s).unwrap().session_id().clone())
			.collect();
		for span in &spans[..2] {
			integration.on_span_end(&span.snapshot_after(10));
		}

		let taken = integration.take_profiles_for_sessions(&ids);
		assert_eq!(taken.len(), 2);
		assert!(taken.contains_key(&ids[0]));
		assert!(!taken.contains_key(&ids[2]));
		assert_eq!(integration.pending_profiles(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn missing_binding_produces_no_profiles() {
		let integration = ProfilingIntegration::builder()
			.profiles_sample_rate(1.0)
			.platform(PlatformTuple::new("plan9", "mips", Libc::None, 1))
			.build()
			.unwrap();
		assert!(!integration.is_profiler_available());

		let span = TestSpan::root("root");
		let profile = integration.on_span_start(&span).unwrap();
		assert!(integration.on_span_end(&span.snapshot_after(10)).is_none());
		assert!(integration
			.take_profile_for_session(profile.session_id())
			.is_none());
	}

	#[test]
	fn default_loader_opens_binary_path_from_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("profiler.so");
		std::fs::write(&path, b"not a shared object").unwrap();

		let integration = ProfilingIntegration::builder()
			.binary_path(&path)
			.binary_dir(dir.path())
			.profiles_sample_rate(1.0)
			.build()
			.unwrap();
		assert!(!integration.is_profiler_available());
	}

	#[test]
	fn binding_resolved_through_loader() {
		let platform = PlatformTuple::new("linux", "x86_64", Libc::Glibc, 1);
		let (_fake, binding) = fake_binding();
		let loader = StaticBindingLoader::new().with_binding(platform.artifact_file_name(), binding);

		let integration = ProfilingIntegration::builder()
			.binary_dir("/opt/loom/bindings")
			.platform(platform)
			.binding_loader(Arc::new(loader))
			.build()
			.unwrap();
		assert!(integration.is_profiler_available());
	}

	#[test]
	fn invalid_config_is_rejected() {
		let result = ProfilingIntegration::builder().queue_capacity(0).build();
		assert!(matches!(
			result,
			Err(ProfilingSdkError::InvalidConfig { ref key, .. }) if key == "queue_capacity"
		));
	}

	#[test]
	fn config_layer_applies_in_call_order() {
		let layer = ProfilingConfigLayer {
			profiles_sample_rate: Some(0.0),
			..Default::default()
		};
		let (fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.config_layer(layer)
			.profiles_sample_rate(1.0)
			.binding(binding)
			.build()
			.unwrap();

		integration.on_span_start(&TestSpan::root("root")).unwrap();
		assert_eq!(fake.starts(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn continuous_mode_wins_over_span_profiling() {
		let (fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profiles_sample_rate(1.0)
			.profile_session_sample_rate(1.0)
			.binding(binding)
			.build()
			.unwrap();

		assert!(integration.on_span_start(&TestSpan::root("root")).is_none());
		assert_eq!(fake.starts(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn manual_lifecycle_starts_and_stops_chunks() {
		let (_fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profile_session_sample_rate(1.0)
			.binding(binding)
			.build()
			.unwrap();
		let chunks = collect_chunks(&integration);

		integration.start_profiler().unwrap();
		assert!(integration.is_continuous_running());
		advance(Duration::from_secs(60)).await;
		integration.stop_profiler();

		assert!(!integration.is_continuous_running());
		let chunks = chunks.lock();
		assert_eq!(chunks.len(), 2);
		assert_eq!(chunks[0].profiler_id, chunks[1].profiler_id);
	}

	#[tokio::test(start_paused = true)]
	async fn unsampled_session_never_runs_continuous_mode() {
		let (fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profile_session_sample_rate(0.0)
			.binding(binding)
			.build()
			.unwrap();

		assert!(!integration.is_session_sampled());
		integration.start_profiler().unwrap();
		assert!(!integration.is_continuous_running());
		assert_eq!(fake.starts(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn trace_lifecycle_follows_root_units() {
		let (_fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profile_session_sample_rate(1.0)
			.profile_lifecycle(ProfileLifecycle::Trace)
			.binding(binding)
			.build()
			.unwrap();
		let chunks = collect_chunks(&integration);

		let a = TestSpan::root("a");
		let b = TestSpan::root("b");
		integration.on_span_start(&a);
		let profiler_id = integration.inner.chunks.profiler_id();
		integration.on_span_start(&b);
		assert_eq!(integration.inner.chunks.profiler_id(), profiler_id);

		integration.on_span_end(&a.snapshot_after(10));
		assert!(integration.is_continuous_running());
		integration.on_span_end(&b.snapshot_after(20));
		assert!(!integration.is_continuous_running());
		assert_eq!(chunks.lock().len(), 1);

		// Manual control is ignored under the trace lifecycle.
		integration.start_profiler().unwrap();
		assert!(!integration.is_continuous_running());
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_stops_everything_once() {
		let (fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profiles_sample_rate(1.0)
			.binding(binding)
			.build()
			.unwrap();

		let span = TestSpan::root("in-flight");
		let profile = integration.on_span_start(&span).unwrap();

		integration.shutdown();
		integration.shutdown();
		assert!(integration.is_closed());
		assert!(profile.is_stopped());
		assert_eq!(fake.stops(), 1);

		// The timeout was cancelled along with the session.
		advance(Duration::from_secs(60)).await;
		assert_eq!(fake.stops(), 1);

		assert!(integration
			.take_profile_for_session(profile.session_id())
			.is_some());
		assert!(integration.on_span_start(&TestSpan::root("late")).is_none());
		assert!(matches!(
			integration.start_profiler(),
			Err(ProfilingSdkError::IntegrationShutdown)
		));
	}

	#[tokio::test(start_paused = true)]
	async fn trace_lifecycle_restarts_after_kill_switch() {
		let (_fake, binding) = fake_binding();
		let integration = ProfilingIntegration::builder()
			.profile_session_sample_rate(1.0)
			.profile_lifecycle(ProfileLifecycle::Trace)
			.binding(binding)
			.build()
			.unwrap();

		let stuck = TestSpan::root("stuck");
		integration.on_span_start(&stuck);
		let first_run = integration.inner.chunks.profiler_id();
		assert!(first_run.is_some());

		for _ in 0..31 {
			advance(Duration::from_secs(10)).await;
		}
		assert!(!integration.is_continuous_running());

		let roots: Vec<_> = (0..100)
			.map(|i| TestSpan::root(&format!("after-{i}")))
			.collect();
		for root in &roots {
			integration.on_span_start(root);
		}
		assert!(integration.is_continuous_running());
		assert_ne!(integration.inner.chunks.profiler_id(), first_run);
		assert_eq!(integration.inner.trace_roots.lock().len(), 100);

		// The stuck root belongs to the old run and cannot keep this one alive.
		integration.on_span_end(&stuck.snapshot_after(400_000));
		assert!(integration.is_continuous_running());
		for root in &roots {
			integration.on_span_end(&root.snapshot_after(10));
		}
		assert!(!integration.is_continuous_running());
		assert!(integration.inner.trace_roots.lock().is_empty());
	}
}
