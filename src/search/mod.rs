//! Search orchestration: pattern compilation, one worker per source that
//! runs the pipeline, and the observer-facing search state machine.

mod pipeline;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use regex::{Regex, RegexBuilder};

use crate::cancel::CancelToken;
use crate::config::CoreContext;
use crate::error::CoreError;
use crate::filtered::FilteredLines;
use crate::search::pipeline::PipelineParams;

/// A search request as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPattern {
    pub pattern: String,
    pub ignore_case: bool,
}

impl SearchPattern {
    pub fn new(pattern: impl Into<String>, ignore_case: bool) -> Self {
        Self {
            pattern: pattern.into(),
            ignore_case,
        }
    }

    /// Compile the pattern, rejecting empty input. The only synchronous
    /// failure of the search path.
    pub fn compile(&self) -> Result<Regex, CoreError> {
        if self.pattern.is_empty() {
            return Err(CoreError::BadPattern("empty pattern".into()));
        }
        let regex = RegexBuilder::new(&self.pattern)
            .case_insensitive(self.ignore_case)
            .build()?;
        Ok(regex)
    }
}

/// Runs at most one search at a time against one projection.
///
/// `search` starts from scratch; `update_search` continues from the last
/// processed line after the source grew. Both compile the pattern
/// synchronously and run the pipeline on a background thread.
pub struct SearchWorker {
    filtered: Arc<FilteredLines>,
    context: Arc<CoreContext>,
    cancel: CancelToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SearchWorker {
    pub fn new(filtered: Arc<FilteredLines>, context: Arc<CoreContext>) -> Self {
        Self {
            filtered,
            context,
            cancel: CancelToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Fresh search over `[start_line, end_line)`. Clears previous matches.
    pub fn search(
        &self,
        pattern: &SearchPattern,
        start_line: u64,
        end_line: u64,
    ) -> Result<(), CoreError> {
        let regex = pattern.compile()?;
        tracing::info!("search requested: {:?}", pattern.pattern);
        self.stop_current();
        self.filtered.clear_search(false);
        self.spawn(regex, start_line, end_line, start_line);
        Ok(())
    }

    /// Continue a search after the source grew. The line just before the
    /// resume point is re-examined: it may have been unterminated on the
    /// previous pass, so its old match is removed before any chunk runs.
    pub fn update_search(
        &self,
        pattern: &SearchPattern,
        start_line: u64,
        end_line: u64,
        position: u64,
    ) -> Result<(), CoreError> {
        let regex = pattern.compile()?;
        tracing::info!("search update requested from line {position}");
        self.stop_current();

        let mut initial_line = self.filtered.last_processed_line().max(position);
        if initial_line >= 1 {
            initial_line -= 1;
            self.filtered.delete_match(initial_line);
        }
        self.spawn(regex, start_line, end_line, initial_line);
        Ok(())
    }

    /// Ask the running pipeline to stop; `search_finished` still fires.
    pub fn interrupt(&self) {
        tracing::info!("search interruption requested");
        self.cancel.cancel();
    }

    /// Block until the in-flight search (if any) has wound down.
    pub fn wait(&self) {
        if let Some(handle) = self.worker.lock().expect("worker poisoned").take() {
            let _ = handle.join();
        }
    }

    fn stop_current(&self) {
        let mut worker = self.worker.lock().expect("worker poisoned");
        self.cancel.cancel();
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        self.cancel.reset();
    }

    fn matcher_count(&self) -> usize {
        let config = &self.context.config;
        if !config.use_parallel_search {
            return 1;
        }
        let count = if config.search_thread_pool_size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.search_thread_pool_size
        };
        count.max(1)
    }

    fn spawn(&self, regex: Regex, start_line: u64, end_line: u64, initial_line: u64) {
        let params = PipelineParams {
            regex,
            start_line,
            end_line,
            initial_line,
            chunk_lines: self.context.config.search_read_buffer_size_lines,
            matcher_count: self.matcher_count(),
        };
        let filtered = Arc::clone(&self.filtered);
        let events = filtered.source().events().sink();
        let cancel = self.cancel.clone();

        let mut worker = self.worker.lock().expect("worker poisoned");
        *worker = Some(std::thread::spawn(move || {
            pipeline::run_search(&filtered, &events, &cancel, params);
        }));
    }
}

impl Drop for SearchWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().expect("worker poisoned").take() {
            let _ = handle.join();
        }
    }
}

/// Observer-facing search lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPhase {
    #[default]
    NoSearch,
    Static,
    Autorefreshing,
    FileTruncated,
    TruncatedAutorefreshing,
}

/// Tracks the phase a view's search is in as patterns change, auto-refresh
/// toggles and the file gets truncated underneath it.
#[derive(Debug, Default)]
pub struct SearchTracker {
    auto_refresh_requested: bool,
    phase: SearchPhase,
}

impl SearchTracker {
    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn start_search(&mut self) {
        self.phase = if self.auto_refresh_requested {
            SearchPhase::Autorefreshing
        } else {
            SearchPhase::Static
        };
    }

    pub fn change_pattern(&mut self) {
        if matches!(self.phase, SearchPhase::Static | SearchPhase::Autorefreshing) {
            self.phase = SearchPhase::Static;
        }
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh_requested = enabled;
        // A truncated phase is left alone: it only resolves through
        // file_truncated() bookkeeping or the next start_search().
        match self.phase {
            SearchPhase::Static if enabled => self.phase = SearchPhase::Autorefreshing,
            SearchPhase::Autorefreshing if !enabled => self.phase = SearchPhase::Static,
            _ => {}
        }
    }

    pub fn stop_search(&mut self) {
        if self.phase == SearchPhase::Autorefreshing {
            self.phase = SearchPhase::Static;
        }
    }

    pub fn file_truncated(&mut self) {
        self.phase = match self.phase {
            SearchPhase::Autorefreshing | SearchPhase::TruncatedAutorefreshing => {
                SearchPhase::TruncatedAutorefreshing
            }
            SearchPhase::NoSearch => SearchPhase::NoSearch,
            _ => SearchPhase::FileTruncated,
        };
    }
}
