//! The log-source supervisor: owns the index of one on-disk file, follows
//! its growth and truncation, and serves raw or decoded line ranges to
//! higher layers.

pub mod monitor;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use lru::LruCache;
use regex::Regex;

use crate::ansi::Prefilter;
use crate::cancel::CancelToken;
use crate::config::CoreContext;
use crate::encoding::TextCodec;
use crate::error::CoreError;
use crate::event::{CoreEvent, EventDispatcher, LoadStatus, MonitoredStatus, Observer};
use crate::filtered::FilteredLines;
use crate::index::builder::IndexPass;
use crate::index::{LineIndex, LineIndexWriter};
use crate::source::monitor::{FileMonitor, FileTransition};
use crate::watch::WatchEvent;

/// The narrow read surface higher layers need from any log-like source.
pub trait LogView: Send + Sync {
    fn nb_lines(&self) -> u64;
    fn max_length(&self) -> u64;
    fn get_line(&self, n: u64) -> Option<String>;
    fn get_lines(&self, first: u64, count: u64) -> Vec<String>;
}

/// A concrete source handed to view-level consumers.
pub enum LogSource {
    File(Arc<LogFile>),
    Filtered(Arc<FilteredLines>),
}

impl LogView for LogSource {
    fn nb_lines(&self) -> u64 {
        match self {
            LogSource::File(log) => log.nb_lines(),
            LogSource::Filtered(filtered) => filtered.nb_lines(),
        }
    }

    fn max_length(&self) -> u64 {
        match self {
            LogSource::File(log) => log.max_length(),
            LogSource::Filtered(filtered) => filtered.max_length(),
        }
    }

    fn get_line(&self, n: u64) -> Option<String> {
        match self {
            LogSource::File(log) => log.get_line(n),
            LogSource::Filtered(filtered) => filtered.get_line(n),
        }
    }

    fn get_lines(&self, first: u64, count: u64) -> Vec<String> {
        match self {
            LogSource::File(log) => log.get_lines(first, count),
            LogSource::Filtered(filtered) => filtered.get_lines(first, count),
        }
    }
}

/// Supervisor phase, driven by loads and file transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Closed,
    Loading,
    Idle,
    UpdatingTail,
}

#[derive(Debug)]
struct SourceState {
    phase: SourcePhase,
    file_size: u64,
    max_length: u64,
    partial_line_len: u64,
    monitor: Option<FileMonitor>,
    initial_load: bool,
}

#[derive(Debug, Default)]
struct AttachState {
    attached: usize,
    deferred: Vec<FileTransition>,
}

enum PassKind {
    Full,
    Tail,
}

/// One indexed, monitored log file.
pub struct LogFile {
    path: PathBuf,
    codec: TextCodec,
    context: Arc<CoreContext>,
    index: Arc<LineIndex>,
    state: Mutex<SourceState>,
    attach: Mutex<AttachState>,
    dispatcher: EventDispatcher,
    cancel: CancelToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    read_handle: Mutex<File>,
    cache: Mutex<LruCache<u64, String>>,
    prefilter: Mutex<Option<Prefilter>>,
    watch_rx: Mutex<Option<Receiver<WatchEvent>>>,
}

impl LogFile {
    /// Open `path` and start the initial indexing pass in the background.
    /// Observers subscribed right after `open` returns will see progress
    /// events followed by one `loading_finished`.
    pub fn open(
        path: impl AsRef<Path>,
        codec: Option<TextCodec>,
        context: Arc<CoreContext>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let read_handle =
            File::open(&path).with_context(|| format!("opening {}", path.display()))?;

        let prefilter = context
            .config
            .hide_ansi_color_sequences
            .then(Prefilter::ansi);
        let cache_size =
            NonZeroUsize::new(context.config.line_cache_size.max(1)).expect("max(1) is non-zero");
        let watch_rx = context.watch_file(&path);

        let log = Arc::new(Self {
            codec: codec.unwrap_or_default(),
            index: Arc::new(LineIndex::new()),
            state: Mutex::new(SourceState {
                phase: SourcePhase::Closed,
                file_size: 0,
                max_length: 0,
                partial_line_len: 0,
                monitor: None,
                initial_load: true,
            }),
            attach: Mutex::new(AttachState::default()),
            dispatcher: EventDispatcher::new(),
            cancel: CancelToken::new(),
            worker: Mutex::new(None),
            read_handle: Mutex::new(read_handle),
            cache: Mutex::new(LruCache::new(cache_size)),
            prefilter: Mutex::new(prefilter),
            watch_rx: Mutex::new(watch_rx),
            context,
            path,
        });

        log.start_pass(PassKind::Full);
        Ok(log)
    }

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.dispatcher.subscribe(observer);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> TextCodec {
        self.codec
    }

    pub fn phase(&self) -> SourcePhase {
        self.state.lock().expect("state poisoned").phase
    }

    pub fn file_size(&self) -> u64 {
        self.state.lock().expect("state poisoned").file_size
    }

    pub fn nb_lines(&self) -> u64 {
        self.index.len()
    }

    pub fn max_length(&self) -> u64 {
        self.state.lock().expect("state poisoned").max_length
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Request that any in-flight indexing pass stop at its next block
    /// boundary.
    pub fn interrupt_loading(&self) {
        self.cancel.cancel();
    }

    /// Discard the index and re-index from scratch. Observers see this as
    /// a first load: progress then `loading_finished`, no data-added badge.
    pub fn reload(self: &Arc<Self>) {
        tracing::info!("reload of {}", self.path.display());
        {
            let mut state = self.state.lock().expect("state poisoned");
            state.initial_load = true;
            state.max_length = 0;
            state.partial_line_len = 0;
        }
        self.cache.lock().expect("cache poisoned").clear();
        self.reopen_read_handle();
        self.start_pass(PassKind::Full);
    }

    /// Drop every cached decoded line.
    pub fn clear_line_cache(&self) {
        self.cache.lock().expect("cache poisoned").clear();
    }

    /// Install or remove the per-line prefilter (e.g. the ANSI stripper).
    /// Affects decoded reads only; line numbering is untouched.
    pub fn set_prefilter(&self, pattern: Option<Regex>) {
        *self.prefilter.lock().expect("prefilter poisoned") = pattern.map(Prefilter::new);
        self.cache.lock().expect("cache poisoned").clear();
    }

    /// Pin the current file view. While at least one reader is attached,
    /// observed growth and truncation are queued instead of applied.
    pub fn attach_reader(&self) {
        self.attach.lock().expect("attach poisoned").attached += 1;
    }

    /// Release a pin; the last detach applies whatever was queued.
    pub fn detach_reader(self: &Arc<Self>) {
        let deferred = {
            let mut attach = self.attach.lock().expect("attach poisoned");
            attach.attached = attach.attached.saturating_sub(1);
            if attach.attached == 0 {
                std::mem::take(&mut attach.deferred)
            } else {
                Vec::new()
            }
        };
        if deferred
            .iter()
            .any(|t| matches!(t, FileTransition::TruncatedOrReplaced))
        {
            self.apply_truncation();
        } else if deferred
            .iter()
            .any(|t| matches!(t, FileTransition::Grown { .. }))
        {
            self.apply_growth();
        }
    }

    /// Drain pending watcher notifications, re-statting on each one.
    pub fn process_watch_events(self: &Arc<Self>) {
        let events: Vec<WatchEvent> = {
            let rx = self.watch_rx.lock().expect("watch poisoned");
            let Some(rx) = rx.as_ref() else { return };
            rx.try_iter().collect()
        };
        if events.contains(&WatchEvent::PossiblyChanged) {
            self.poll_file_status();
        }
    }

    /// Re-stat the file and classify the transition. Actions (and their
    /// `file_changed` notifications) are deferred while a reader is
    /// attached.
    pub fn poll_file_status(self: &Arc<Self>) -> MonitoredStatus {
        let transition = {
            let state = self.state.lock().expect("state poisoned");
            match &state.monitor {
                Some(monitor) => monitor.classify(&self.path),
                None => return MonitoredStatus::Unchanged,
            }
        };
        tracing::debug!("poll of {}: {transition:?}", self.path.display());

        if transition == FileTransition::Unchanged {
            return MonitoredStatus::Unchanged;
        }

        {
            let mut attach = self.attach.lock().expect("attach poisoned");
            if attach.attached > 0 {
                attach.deferred.push(transition);
                return match transition {
                    FileTransition::Grown { .. } => MonitoredStatus::DataAdded,
                    _ => MonitoredStatus::Truncated,
                };
            }
        }

        match transition {
            FileTransition::Grown { .. } => {
                self.apply_growth();
                MonitoredStatus::DataAdded
            }
            FileTransition::TruncatedOrReplaced => {
                self.apply_truncation();
                MonitoredStatus::Truncated
            }
            FileTransition::Unchanged => MonitoredStatus::Unchanged,
        }
    }

    /// Decoded, prefiltered line `n`, served through the LRU cache.
    pub fn get_line(&self, n: u64) -> Option<String> {
        {
            let mut cache = self.cache.lock().expect("cache poisoned");
            if let Some(line) = cache.get(&n) {
                return Some(line.clone());
            }
        }
        let raw = match self.get_lines_raw(n, 1) {
            Ok(mut lines) if !lines.is_empty() => lines.remove(0),
            Ok(_) => return None,
            Err(err) => {
                tracing::warn!("reading line {n} of {} failed: {err:#}", self.path.display());
                return None;
            }
        };
        let line = self.decode(&raw);
        self.cache
            .lock()
            .expect("cache poisoned")
            .put(n, line.clone());
        Some(line)
    }

    /// Decoded, prefiltered range; short reads are clamped to the index.
    pub fn get_lines(&self, first: u64, count: u64) -> Vec<String> {
        match self.get_lines_checked(first, count) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!(
                    "reading lines [{first}, +{count}) of {} failed: {err:#}",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }

    /// Like [`get_lines`](Self::get_lines) but surfaces read errors, for
    /// callers that must stop on I/O failure.
    pub fn get_lines_checked(&self, first: u64, count: u64) -> Result<Vec<String>> {
        let raw = self.get_lines_raw(first, count)?;
        Ok(raw.iter().map(|bytes| self.decode(bytes)).collect())
    }

    /// Tab-expanded length of line `n`.
    pub fn get_line_length(&self, n: u64) -> Option<u64> {
        self.get_line(n)
            .map(|line| crate::lines::untabified_length(line.as_bytes()))
    }

    /// Raw content bytes for `[first, first + count)`, one read for the
    /// whole span, terminators excluded. Pins the handle for the duration.
    pub fn get_lines_raw(&self, first: u64, count: u64) -> Result<Vec<Vec<u8>>> {
        let snapshot = self.index.snapshot();
        if first >= snapshot.len() || count == 0 {
            return Ok(Vec::new());
        }
        let last = (first + count).min(snapshot.len()) - 1;
        let cr_size = self.codec.cr_size();

        let span_start = snapshot
            .line_start(first)
            .ok_or(CoreError::Internal("line index shorter than its length"))?;
        let span_end = snapshot
            .entry(last)
            .ok_or(CoreError::Internal("line index shorter than its length"))?;
        let mut buf = vec![0u8; (span_end - span_start) as usize];
        {
            let mut file = self.read_handle.lock().expect("read handle poisoned");
            file.seek(SeekFrom::Start(span_start))
                .with_context(|| format!("seek to {span_start} in {}", self.path.display()))?;
            file.read_exact(&mut buf)
                .with_context(|| format!("read of {} bytes failed", buf.len()))?;
        }

        let lines = (first..=last)
            .map(|n| {
                let range = snapshot.line_range(n, cr_size).expect("n <= last < len");
                buf[(range.start - span_start) as usize..(range.end - span_start) as usize].to_vec()
            })
            .collect();
        Ok(lines)
    }

    /// The unterminated tail after the last complete line, if any.
    pub fn partial_tail_line(&self) -> Option<String> {
        let (partial_len, file_size) = {
            let state = self.state.lock().expect("state poisoned");
            (state.partial_line_len, state.file_size)
        };
        if partial_len == 0 {
            return None;
        }
        let start = self.index.snapshot().end_of_last_line();
        let mut buf = vec![0u8; (file_size - start) as usize];
        {
            let mut file = self.read_handle.lock().expect("read handle poisoned");
            file.seek(SeekFrom::Start(start)).ok()?;
            file.read_exact(&mut buf).ok()?;
        }
        Some(self.decode(&buf))
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let decoded = self.codec.decode(bytes);
        match self.prefilter.lock().expect("prefilter poisoned").as_ref() {
            Some(prefilter) => prefilter.apply(&decoded).into_owned(),
            None => decoded,
        }
    }

    fn apply_growth(self: &Arc<Self>) {
        self.dispatcher
            .post(CoreEvent::FileChanged(MonitoredStatus::DataAdded));
        self.start_pass(PassKind::Tail);
    }

    fn apply_truncation(self: &Arc<Self>) {
        tracing::info!("{} truncated or replaced", self.path.display());
        self.dispatcher
            .post(CoreEvent::FileChanged(MonitoredStatus::Truncated));
        {
            let mut state = self.state.lock().expect("state poisoned");
            state.max_length = 0;
            state.partial_line_len = 0;
        }
        self.cache.lock().expect("cache poisoned").clear();
        self.reopen_read_handle();
        self.start_pass(PassKind::Full);
    }

    fn reopen_read_handle(&self) {
        match File::open(&self.path) {
            Ok(file) => *self.read_handle.lock().expect("read handle poisoned") = file,
            Err(err) => tracing::error!("reopening {} failed: {err}", self.path.display()),
        }
    }

    /// Stop any running pass, then run `kind` on a fresh worker thread.
    fn start_pass(self: &Arc<Self>, kind: PassKind) {
        let mut worker = self.worker.lock().expect("worker poisoned");
        self.cancel.cancel();
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        self.cancel.reset();

        {
            let mut state = self.state.lock().expect("state poisoned");
            state.phase = match kind {
                PassKind::Full => SourcePhase::Loading,
                PassKind::Tail => SourcePhase::UpdatingTail,
            };
        }

        let log = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || log.run_pass(kind)));
    }

    fn run_pass(self: Arc<Self>, kind: PassKind) {
        let sink = self.dispatcher.sink();

        let outcome = (|| -> Result<_> {
            let mut file = File::open(&self.path)
                .with_context(|| format!("opening {}", self.path.display()))?;
            // Stat before scanning: bytes appended while the pass runs must
            // still classify as growth on the next poll.
            let monitor = FileMonitor::capture(&self.path, self.context.clock.as_ref()).ok();
            let file_size = file.metadata()?.len();

            let (mut writer, start, prev_max) = match kind {
                PassKind::Full => {
                    let writer = LineIndexWriter::new(Arc::clone(&self.index));
                    writer.publish(); // readers see the empty index at once
                    (writer, 0, 0)
                }
                PassKind::Tail => {
                    let writer = LineIndexWriter::resume(Arc::clone(&self.index));
                    let start = writer.end_of_last_line();
                    (writer, start, self.max_length())
                }
            };

            let pass = IndexPass::new(
                self.codec,
                self.context.config.index_read_buffer_size,
                self.cancel.clone(),
            )
            .with_events(sink.clone());
            let outcome = pass.run(&mut file, file_size, &mut writer, start, prev_max);
            Ok((outcome, file_size, monitor))
        })();

        match outcome {
            Ok((outcome, file_size, monitor)) => {
                let was_initial;
                {
                    let mut state = self.state.lock().expect("state poisoned");
                    was_initial = state.initial_load;
                    state.file_size = file_size;
                    state.max_length = outcome.max_length;
                    state.partial_line_len = outcome.partial_line_len;
                    state.monitor = monitor;
                    state.phase = match outcome.status {
                        LoadStatus::Interrupted if was_initial => SourcePhase::Closed,
                        _ => SourcePhase::Idle,
                    };
                    if outcome.status == LoadStatus::Successful {
                        state.initial_load = false;
                    }
                }
                tracing::info!(
                    "indexing of {} finished: {:?}, {} lines",
                    self.path.display(),
                    outcome.status,
                    self.index.len()
                );
                sink.post(CoreEvent::LoadingFinished(outcome.status));
            }
            Err(err) => {
                tracing::error!("indexing of {} failed: {err:#}", self.path.display());
                self.state.lock().expect("state poisoned").phase = SourcePhase::Idle;
                sink.post(CoreEvent::LoadingFinished(LoadStatus::Failed));
            }
        }
    }

    /// Block until the in-flight pass (if any) has finished.
    pub fn wait_for_load(&self) {
        if let Some(handle) = self.worker.lock().expect("worker poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl LogView for LogFile {
    fn nb_lines(&self) -> u64 {
        LogFile::nb_lines(self)
    }

    fn max_length(&self) -> u64 {
        LogFile::max_length(self)
    }

    fn get_line(&self, n: u64) -> Option<String> {
        LogFile::get_line(self, n)
    }

    fn get_lines(&self, first: u64, count: u64) -> Vec<String> {
        LogFile::get_lines(self, first, count)
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().expect("worker poisoned").take() {
            let _ = handle.join();
        }
        self.context.watcher.unwatch(&self.path);
    }
}
