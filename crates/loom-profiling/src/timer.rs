// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Detached timer tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::warn;

static NO_RUNTIME_WARNED: AtomicBool = AtomicBool::new(false);

/// True when called from within a tokio runtime.
pub(crate) fn runtime_available() -> bool {
	Handle::try_current().is_ok()
}

/// Spawns `future` on the current tokio runtime without keeping a join handle.
///
/// Detached tasks never hold the process open: they are dropped with the
/// runtime. Returns `None` when called outside a runtime, in which case the
/// timer simply never fires.
pub(crate) fn spawn_detached<F>(future: F) -> Option<AbortHandle>
where
	F: Future<Output = ()> + Send + 'static,
{
	match Handle::try_current() {
		Ok(handle) => Some(handle.spawn(future).abort_handle()),
		Err(_) => {
			if !NO_RUNTIME_WARNED.swap(true, Ordering::Relaxed) {
				warn!("No tokio runtime available, profiling timers are disabled");
			}
			None
		}
	}
}
