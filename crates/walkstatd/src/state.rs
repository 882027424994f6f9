//! Shared application state and memory management.

// Allocator imports are unused on msvc.
#[cfg(not(target_env = "msvc"))]
use std::ptr;
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// A walk allocates a full generation of series; purging afterwards keeps RSS
/// close to one generation.
#[cfg(not(target_env = "msvc"))]
pub(crate) fn release_memory_to_os() {
    unsafe {
        // MALLCTL_ARENAS_ALL = 4096: the walk runs on a blocking-pool thread
        // with its own arena, so purge all of them.
        tikv_jemalloc_sys::mallctl(
            c"arena.4096.purge".as_ptr().cast(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        );
    }
}

#[cfg(target_env = "msvc")]
pub(crate) fn release_memory_to_os() {}

use std::sync::{Arc, Mutex, PoisonError};

use walkstat_core::walker::{Backend, WalkReport};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) backend: Arc<dyn Backend>,
    /// Report of the last completed walk.
    pub(crate) last_report: Arc<Mutex<Option<WalkReport>>>,
    pub(crate) metrics_path: Arc<str>,
}

impl AppState {
    pub(crate) fn new(backend: Arc<dyn Backend>, metrics_path: &str) -> Self {
        Self {
            backend,
            last_report: Arc::new(Mutex::new(None)),
            metrics_path: Arc::from(metrics_path),
        }
    }

    pub(crate) fn last_report(&self) -> Option<WalkReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_last_report(&self, report: WalkReport) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);
    }
}
