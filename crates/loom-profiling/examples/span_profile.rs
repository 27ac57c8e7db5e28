// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: profile a unit of work and reconcile its profile.
//!
//! Uses a synthetic binding that reports a fixed call stack, so it runs on
//! any platform.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example span_profile -p loom-profiling

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use loom_profiling::{
	ChunkProfile, Frame, ProfilingIntegration, RawTrace, Sample, SamplingBinding, SpanSnapshot,
	Stack, UnitOfWork,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Pretends to sample every 10ms between start and stop.
#[derive(Default)]
struct SyntheticBinding {
	sessions: Mutex<HashMap<String, Instant>>,
}

impl SamplingBinding for SyntheticBinding {
	fn start_profiling(&self, name: &str) {
		self.sessions.lock().insert(name.to_string(), Instant::now());
	}

	fn stop_profiling(&self, name: &str) -> Option<RawTrace> {
		let started = self.sessions.lock().remove(name)?;
		let elapsed = started.elapsed().as_nanos() as u64;
		let step = 10_000_000;

		Some(RawTrace {
			frames: vec![
				Frame {
					function: Some("handle_request".to_string()),
					abs_path: Some("/srv/app/src/handler.rs".to_string()),
					lineno: Some(42),
					colno: None,
				},
				Frame {
					function: Some("main".to_string()),
					abs_path: Some("/srv/app/src/main.rs".to_string()),
					lineno: Some(7),
					colno: None,
				},
			],
			stacks: vec![Stack(vec![0, 1])],
			samples: (0..=elapsed / step)
				.map(|i| Sample {
					stack_id: 0,
					thread_id: 1,
					elapsed_since_start_ns: i * step,
				})
				.collect(),
			resources: vec!["/srv/app/src/handler.rs".to_string()],
			..Default::default()
		})
	}

	fn current_thread_id(&self) -> u64 {
		1
	}
}

struct Request {
	span_id: String,
	trace_id: String,
	start: DateTime<Utc>,
}

impl UnitOfWork for Request {
	fn is_root(&self) -> bool {
		true
	}

	fn is_sampled(&self) -> bool {
		true
	}

	fn name(&self) -> &str {
		"GET /orders"
	}

	fn span_id(&self) -> &str {
		&self.span_id
	}

	fn trace_id(&self) -> &str {
		&self.trace_id
	}

	fn start_timestamp(&self) -> DateTime<Utc> {
		self.start
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let binding: Arc<dyn SamplingBinding> = Arc::new(SyntheticBinding::default());

	// Span-scoped profiling.
	let profiling = ProfilingIntegration::builder()
		.profiles_sample_rate(1.0)
		.release("0.1.0-example")
		.environment("development")
		.debug_id("/srv/app/src/handler.rs", "2f1c0b9e-6f0a-4b4e-9a53-5d7e0c1a2b3c")
		.binding(binding.clone())
		.build()?;

	let request = Request {
		span_id: "b7ad6b7169203331".to_string(),
		trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
		start: Utc::now(),
	};

	let profile = profiling.on_span_start(&request);
	tokio::time::sleep(Duration::from_millis(120)).await;
	profiling.on_span_end(&SpanSnapshot {
		name: request.name().to_string(),
		span_id: request.span_id.clone(),
		trace_id: request.trace_id.clone(),
		attributes: serde_json::Map::new(),
		start_timestamp: request.start,
		end_timestamp: Utc::now(),
	});

	if let Some(profile) = profile {
		match profiling.take_profile_for_session(profile.session_id()) {
			Some(enriched) => println!("{}", serde_json::to_string_pretty(&enriched)?),
			None => println!("No profile was produced"),
		}
	}
	profiling.shutdown();

	// Continuous profiling with short chunks.
	let continuous = ProfilingIntegration::builder()
		.profile_session_sample_rate(1.0)
		.chunk_interval(Duration::from_millis(100))
		.max_continuous_duration(Duration::from_millis(350))
		.binding(binding)
		.build()?;

	continuous.on_chunk_ready(Arc::new(|chunk: &ChunkProfile| {
		println!(
			"chunk {} of profiler {}: {} samples",
			chunk.chunk_id,
			chunk.profiler_id,
			chunk.profile.samples.len()
		);
	}));
	continuous.start_profiler()?;
	tokio::time::sleep(Duration::from_millis(500)).await;
	println!("continuous profiler running: {}", continuous.is_continuous_running());

	Ok(())
}
