//! Core configuration and the context handed to every component.
//!
//! Nothing here is process-global: a [`CoreContext`] is built once by the
//! host and passed down explicitly, so tests can swap in a fake watcher
//! and clock.

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;

use crate::watch::{FileWatch, NotifyFileWatcher, WatchEvent};

/// Default interpretation of a search pattern typed into a fresh view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexpType {
    ExtendedRegexp,
    FixedString,
}

/// Tunables for the indexing and search paths.
///
/// Unknown fields are rejected so a typo in a host-side config file fails
/// loudly instead of silently using a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bytes read per block during indexing.
    pub index_read_buffer_size: usize,
    /// Lines per chunk handed to one search matcher.
    pub search_read_buffer_size_lines: u64,
    /// When false the search pipeline runs a single matcher.
    pub use_parallel_search: bool,
    /// Matcher count; 0 means hardware parallelism.
    pub search_thread_pool_size: usize,
    /// When false the supervisor never follows file changes.
    pub any_file_watch_enabled: bool,
    /// Install the stock ANSI-escape prefilter on open.
    pub hide_ansi_color_sequences: bool,
    /// Default use-regex flag for new views.
    pub main_regexp_type: RegexpType,
    /// Decoded lines kept in the supervisor's LRU cache.
    pub line_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_read_buffer_size: 16 * 1024 * 1024,
            search_read_buffer_size_lines: 5000,
            use_parallel_search: true,
            search_thread_pool_size: 0,
            any_file_watch_enabled: true,
            hide_ansi_color_sequences: false,
            main_regexp_type: RegexpType::ExtendedRegexp,
            line_cache_size: 10_000,
        }
    }
}

/// Source of "now", injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The real wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Shared services for one core instance: configuration, the file watcher
/// and the clock. Every constructor takes an `Arc<CoreContext>`.
pub struct CoreContext {
    pub config: Config,
    pub watcher: Arc<dyn FileWatch>,
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    /// Production context backed by the OS file watcher and wall clock.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            watcher: Arc::new(NotifyFileWatcher::new()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Context with explicit collaborators, used by tests and embedders.
    pub fn with_services(
        config: Config,
        watcher: Arc<dyn FileWatch>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            watcher,
            clock,
        })
    }

    /// Start watching `path` if following is enabled; `None` otherwise.
    pub fn watch_file(&self, path: &Path) -> Option<Receiver<WatchEvent>> {
        if !self.config.any_file_watch_enabled {
            return None;
        }
        match self.watcher.watch(path) {
            Ok(rx) => Some(rx),
            Err(err) => {
                tracing::warn!("cannot watch {}: {err:#}", path.display());
                None
            }
        }
    }
}
