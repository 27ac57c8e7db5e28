// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-unit-of-work profiling sample decisions.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

/// What a unit of work looks like to a sampler function.
#[derive(Debug, Clone, Copy)]
pub struct SamplingContext<'a> {
	pub name: &'a str,
	pub trace_id: &'a str,
	pub span_id: &'a str,
	pub attributes: &'a serde_json::Map<String, serde_json::Value>,
}

/// Return value of a sampler function: a yes/no or a rate in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleDecision {
	Sampled(bool),
	Rate(f64),
}

impl From<bool> for SampleDecision {
	fn from(sampled: bool) -> Self {
		Self::Sampled(sampled)
	}
}

impl From<f64> for SampleDecision {
	fn from(rate: f64) -> Self {
		Self::Rate(rate)
	}
}

impl fmt::Display for SampleDecision {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Sampled(b) => write!(f, "{b}"),
			Self::Rate(r) => write!(f, "{r}"),
		}
	}
}

impl SampleDecision {
	/// The rate this decision stands for, or `None` if it is out of range.
	pub fn rate(self) -> Option<f64> {
		match self {
			Self::Sampled(true) => Some(1.0),
			Self::Sampled(false) => Some(0.0),
			Self::Rate(r) if r.is_finite() && (0.0..=1.0).contains(&r) => Some(r),
			Self::Rate(_) => None,
		}
	}
}

/// User-supplied per-unit-of-work sampler.
pub type ProfilesSampler = Arc<dyn Fn(&SamplingContext<'_>) -> SampleDecision + Send + Sync>;

/// Draws once against `rate`. `1` always samples and `0` never does.
pub fn sample_rate(rate: f64) -> bool {
	if rate >= 1.0 {
		return true;
	}
	if rate <= 0.0 {
		return false;
	}
	fastrand::f64() < rate
}

/// Decides whether to profile a unit of work already selected for tracing.
///
/// The sampler takes priority over the static rate. Invalid values, and
/// samplers that panic, mean "do not profile".
pub fn should_profile(
	ctx: &SamplingContext<'_>,
	sampler: Option<&ProfilesSampler>,
	static_rate: Option<f64>,
) -> bool {
	let decision = match sampler {
		Some(sampler) => match catch_unwind(AssertUnwindSafe(|| sampler(ctx))) {
			Ok(decision) => decision,
			Err(_) => {
				warn!(name = %ctx.name, "Profiles sampler panicked, not profiling");
				return false;
			}
		},
		None => match static_rate {
			Some(rate) => SampleDecision::Rate(rate),
			None => {
				debug!(name = %ctx.name, "No profiles sample rate configured, not profiling");
				return false;
			}
		},
	};

	let Some(rate) = decision.rate() else {
		warn!(
			name = %ctx.name,
			value = %decision,
			"Invalid profiles sample rate, expected a boolean or a number between 0 and 1"
		);
		return false;
	};

	let sampled = sample_rate(rate);
	if !sampled {
		debug!(name = %ctx.name, rate, "Unit of work not sampled for profiling");
	}
	sampled
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn ctx<'a>(attributes: &'a serde_json::Map<String, serde_json::Value>) -> SamplingContext<'a> {
		SamplingContext {
			name: "GET /users",
			trace_id: "0123456789abcdef0123456789abcdef",
			span_id: "0123456789abcdef",
			attributes,
		}
	}

	fn sampler(f: impl Fn(&SamplingContext<'_>) -> SampleDecision + Send + Sync + 'static) -> ProfilesSampler {
		Arc::new(f)
	}

	#[test]
	fn rate_one_always_samples_and_zero_never() {
		let attrs = serde_json::Map::new();
		for _ in 0..1000 {
			assert!(should_profile(&ctx(&attrs), None, Some(1.0)));
			assert!(!should_profile(&ctx(&attrs), None, Some(0.0)));
		}
	}

	#[test]
	fn boolean_sampler_results_are_absolute() {
		let attrs = serde_json::Map::new();
		let yes = sampler(|_| true.into());
		let no = sampler(|_| false.into());
		for _ in 0..1000 {
			assert!(should_profile(&ctx(&attrs), Some(&yes), Some(0.0)));
			assert!(!should_profile(&ctx(&attrs), Some(&no), Some(1.0)));
		}
	}

	#[test]
	fn sampler_takes_priority_over_rate() {
		let attrs = serde_json::Map::new();
		let no = sampler(|_| 0.0.into());
		assert!(!should_profile(&ctx(&attrs), Some(&no), Some(1.0)));
	}

	#[test]
	fn sampler_sees_unit_of_work_context() {
		let mut attrs = serde_json::Map::new();
		attrs.insert("http.method".into(), "POST".into());
		let by_method = sampler(|ctx| (ctx.attributes.get("http.method") == Some(&"POST".into())).into());
		assert!(should_profile(&ctx(&attrs), Some(&by_method), None));
	}

	#[test]
	fn invalid_values_do_not_sample() {
		let attrs = serde_json::Map::new();
		for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
			assert!(!should_profile(&ctx(&attrs), None, Some(bad)));
			let s = sampler(move |_| bad.into());
			assert!(!should_profile(&ctx(&attrs), Some(&s), Some(1.0)));
		}
	}

	#[test]
	fn panicking_sampler_does_not_sample() {
		let attrs = serde_json::Map::new();
		let s = sampler(|_| panic!("sampler bug"));
		assert!(!should_profile(&ctx(&attrs), Some(&s), Some(1.0)));
	}

	#[test]
	fn unconfigured_does_not_sample() {
		let attrs = serde_json::Map::new();
		assert!(!should_profile(&ctx(&attrs), None, None));
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn empirical_frequency_tracks_rate(rate in 0.0f64..=1.0) {
			let attrs = serde_json::Map::new();
			let trials = 20_000;
			let hits = (0..trials)
				.filter(|_| should_profile(&ctx(&attrs), None, Some(rate)))
				.count();
			let observed = hits as f64 / trials as f64;
			prop_assert!((observed - rate).abs() < 0.03, "rate {rate} observed {observed}");
		}
	}
}
