// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CPU profiling Rust SDK for Loom.
//!
//! This crate samples the CPU while units of work (spans) run and reconciles
//! each finished profile with the telemetry describing its unit of work. It
//! can also profile continuously in fixed-size chunks.
//!
//! # Features
//!
//! - **Span-scoped profiling**: one independent session per sampled root unit of work
//! - **Safety timeouts**: sessions that never end are stopped after a maximum duration
//! - **Reconciliation queue**: bounded, drops the oldest profile under overload
//! - **Continuous profiling**: chunked sessions with a hard kill-switch
//! - **Graceful degradation**: without a profiler binding every operation is a no-op
//!
//! # Example
//!
//! ```ignore
//! use loom_profiling::ProfilingIntegration;
//!
//! let profiling = ProfilingIntegration::builder()
//!     .profiles_sample_rate(0.1)
//!     .release("1.2.3")
//!     .build()?;
//!
//! // From the tracing layer:
//! let profile = profiling.on_span_start(&span);
//! // ...
//! profiling.on_span_end(&snapshot);
//!
//! // From the transport, when sending the span's telemetry:
//! if let Some(profile) = profile {
//!     let attachment = profiling.take_profile_for_session(profile.session_id());
//! }
//! ```

mod binding;
mod config;
mod continuous;
mod dylib;
mod error;
mod facade;
mod integration;
mod queue;
mod sampling;
mod session;
mod timer;

pub use binding::{
	candidate_paths, resolve, BindingLoader, BindingOverrides, Libc, PlatformTuple, SamplingBinding,
	StaticBindingLoader, ARTIFACT_PREFIX, BINARY_DIR_ENV, BINARY_PATH_ENV, BINDING_ABI_VERSION,
};
pub use config::{
	ProfileLifecycle, ProfilingConfig, ProfilingConfigLayer, DEFAULT_CHUNK_INTERVAL,
	DEFAULT_MAX_CONTINUOUS_DURATION, DEFAULT_MAX_PROFILE_DURATION, DEFAULT_QUEUE_CAPACITY,
};
pub use continuous::{ChunkCallback, ChunkController, ContinuousOptions};
pub use dylib::DylibBindingLoader;
pub use error::{BindingError, ProfilingSdkError, Result};
pub use facade::SamplingProfiler;
pub use integration::{ProfilingIntegration, ProfilingIntegrationBuilder};
pub use queue::{EnrichmentOptions, PendingProfile, ProfileQueue, SessionContext};
pub use sampling::{sample_rate, should_profile, ProfilesSampler, SampleDecision, SamplingContext};
pub use session::{SpanProfile, SpanProfiler, SpanProfilerOptions, SpanSnapshot, UnitOfWork};

// Re-export core types for convenience
pub use loom_profiling_core::{
	ChunkId, ChunkProfile, EnrichedProfile, Frame, ProfilerId, RawTrace, Sample, SessionId, Stack,
};

/// SDK version for identification.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// SDK name for identification.
pub const SDK_NAME: &str = "loom-profiling-rust";
