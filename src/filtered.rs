//! The filtered-data projection: which lines of a source match the current
//! search, which are marked by the user, and the ordered union of both as
//! a virtual sub-log.
//!
//! Both sets are compressed bitmaps over source line numbers. One mutex
//! guards the whole projection, including the search bookkeeping the
//! pipeline's combiner updates; every accessor takes it briefly.

use std::sync::{Arc, Mutex};

use roaring::RoaringBitmap;

use crate::event::{MonitoredStatus, Observer};
use crate::source::{LogFile, LogView};

/// Which of the two bitmaps the projection exposes. Storage is unaffected;
/// marks survive while only matches are shown and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    MarksAndMatches,
    MarksOnly,
    MatchesOnly,
}

/// Why a source line is part of the projection. Both flags may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineType {
    pub is_match: bool,
    pub is_mark: bool,
}

/// Matches accumulated since the previous take, with the search counters
/// at the time of the swap.
#[derive(Debug, Default)]
pub struct SearchResults {
    pub new_matches: RoaringBitmap,
    pub max_length: u64,
    pub processed_lines: u64,
}

#[derive(Debug, Default)]
struct ProjectionData {
    matches: RoaringBitmap,
    new_matches: RoaringBitmap,
    marks: RoaringBitmap,
    union: RoaringBitmap,
    visibility: Visibility,
    max_length: u64,
    last_processed_line: u64,
}

impl ProjectionData {
    fn visible(&self) -> &RoaringBitmap {
        match self.visibility {
            Visibility::MarksAndMatches => &self.union,
            Visibility::MarksOnly => &self.marks,
            Visibility::MatchesOnly => &self.matches,
        }
    }

    fn remove_match(&mut self, line: u32) {
        if self.matches.remove(line) && !self.marks.contains(line) {
            self.union.remove(line);
        }
    }
}

fn bit(line: u64) -> u32 {
    debug_assert!(line <= u64::from(u32::MAX), "line number exceeds bitmap range");
    line as u32
}

/// Marks and search matches over one [`LogFile`], exposed as an ordered
/// virtual log.
pub struct FilteredLines {
    source: Arc<LogFile>,
    data: Mutex<ProjectionData>,
}

impl FilteredLines {
    /// Create the projection and subscribe it to the source so that a
    /// truncation clears marks and invalidates the current search.
    pub fn new(source: Arc<LogFile>) -> Arc<Self> {
        let filtered = Arc::new(Self {
            source,
            data: Mutex::new(ProjectionData::default()),
        });
        let observer: Arc<dyn Observer> = filtered.clone();
        filtered.source.subscribe(&observer);
        filtered
    }

    pub fn source(&self) -> &Arc<LogFile> {
        &self.source
    }

    pub fn visibility(&self) -> Visibility {
        self.lock().visibility
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.lock().visibility = visibility;
    }

    /// Source line number of the `filtered_index`-th visible line.
    pub fn line_index_of(&self, filtered_index: u64) -> Option<u64> {
        let data = self.lock();
        let index = u32::try_from(filtered_index).ok()?;
        data.visible().select(index).map(u64::from)
    }

    /// Position of `source_line` in the visible sequence, if present.
    pub fn filtered_index_of(&self, source_line: u64) -> Option<u64> {
        let data = self.lock();
        let line = bit(source_line);
        if data.visible().contains(line) {
            Some(data.visible().rank(line) - 1)
        } else {
            None
        }
    }

    pub fn line_type(&self, source_line: u64) -> LineType {
        let data = self.lock();
        let line = bit(source_line);
        LineType {
            is_match: data.matches.contains(line),
            is_mark: data.marks.contains(line),
        }
    }

    pub fn nb_matches(&self) -> u64 {
        self.lock().matches.len()
    }

    pub fn nb_marks(&self) -> u64 {
        self.lock().marks.len()
    }

    pub fn add_mark(&self, line: u64) {
        let mut data = self.lock();
        let line = bit(line);
        data.marks.insert(line);
        data.union.insert(line);
    }

    pub fn toggle_mark(&self, line: u64) {
        let mut data = self.lock();
        let line = bit(line);
        if data.marks.remove(line) {
            if !data.matches.contains(line) {
                data.union.remove(line);
            }
        } else {
            data.marks.insert(line);
            data.union.insert(line);
        }
    }

    pub fn clear_marks(&self) {
        let mut data = self.lock();
        data.marks = RoaringBitmap::new();
        data.union = data.matches.clone();
    }

    pub fn marks(&self) -> Vec<u64> {
        self.lock().marks.iter().map(u64::from).collect()
    }

    /// Forget one match, used before re-examining the last processed line
    /// of an update search.
    pub fn delete_match(&self, line: u64) {
        self.lock().remove_match(bit(line));
    }

    /// Drop all matches and search counters. Marks persist. With
    /// `drop_cache` the source's decoded-line cache goes too.
    pub fn clear_search(&self, drop_cache: bool) {
        {
            let mut data = self.lock();
            data.matches = RoaringBitmap::new();
            data.new_matches = RoaringBitmap::new();
            data.union = data.marks.clone();
            data.max_length = 0;
            data.last_processed_line = 0;
        }
        if drop_cache {
            self.source.clear_line_cache();
        }
    }

    /// Atomically hand out the matches accumulated since the last call.
    pub fn take_current_results(&self) -> SearchResults {
        let mut data = self.lock();
        SearchResults {
            new_matches: std::mem::take(&mut data.new_matches),
            max_length: data.max_length,
            processed_lines: data.last_processed_line,
        }
    }

    pub fn last_processed_line(&self) -> u64 {
        self.lock().last_processed_line
    }

    /// Merge one chunk of matcher output. Called by the search combiner
    /// only; returns the total match count afterwards.
    pub(crate) fn add_partial(
        &self,
        matching: &RoaringBitmap,
        processed_through: u64,
        max_length: u64,
    ) -> u64 {
        let mut data = self.lock();
        data.matches |= matching;
        data.new_matches |= matching;
        data.union |= matching;
        data.max_length = data.max_length.max(max_length);
        data.last_processed_line = data.last_processed_line.max(processed_through);
        data.matches.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProjectionData> {
        self.data.lock().expect("projection poisoned")
    }
}

impl LogView for FilteredLines {
    fn nb_lines(&self) -> u64 {
        self.lock().visible().len()
    }

    fn max_length(&self) -> u64 {
        self.lock().max_length
    }

    fn get_line(&self, n: u64) -> Option<String> {
        let source_line = self.line_index_of(n)?;
        self.source.get_line(source_line)
    }

    fn get_lines(&self, first: u64, count: u64) -> Vec<String> {
        (first..first + count)
            .map_while(|n| self.get_line(n))
            .collect()
    }
}

impl Observer for FilteredLines {
    fn file_changed(&self, status: MonitoredStatus) {
        if status == MonitoredStatus::Truncated {
            tracing::info!("source truncated, dropping marks and matches");
            self.clear_marks();
            self.clear_search(false);
        }
    }
}
