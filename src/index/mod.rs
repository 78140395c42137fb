//! The line index: an append-only map from line number to byte offset.
//!
//! Entry `n` holds the byte offset at which line `n + 1` starts, i.e. one
//! past the full terminator of line `n`. Line `n` therefore spans
//! `[entry(n-1), entry(n) - cr_size)` with an implicit `entry(-1) = 0`.
//!
//! Storage is two-tier for memory efficiency: entries are grouped in
//! fixed-capacity blocks of 32-bit offsets relative to a 64-bit per-block
//! anchor; a delta that does not fit 32 bits stores a sentinel and spills
//! into a per-block overflow table.
//!
//! Concurrency follows a single-writer, many-reader discipline. Readers
//! obtain an [`IndexSnapshot`] through one atomic pointer load and are
//! never blocked by the writer; the writer publishes a new snapshot with a
//! single ordered store. Sealed blocks are shared between snapshots, so a
//! publish clones only the block pointer array and the partial tail block.

pub mod builder;

use std::ops::Range;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Lines per block. 256 keeps a block's relative offsets in one kilobyte.
const BLOCK_LINES: u64 = 256;

/// Sentinel in the relative tier meaning "look in the overflow table".
const OVERFLOW_MARK: u32 = u32::MAX;

#[derive(Debug, Clone, Default)]
struct IndexBlock {
    anchor: u64,
    rel: Vec<u32>,
    overflow: Vec<u64>,
}

impl IndexBlock {
    fn push(&mut self, value: u64) {
        if self.rel.is_empty() {
            self.anchor = value;
        }
        let delta = value - self.anchor;
        if delta < u64::from(OVERFLOW_MARK) {
            self.rel.push(delta as u32);
        } else {
            self.rel.push(OVERFLOW_MARK);
            self.overflow.push(value);
        }
    }

    fn entry(&self, slot: usize) -> u64 {
        let rel = self.rel[slot];
        if rel == OVERFLOW_MARK {
            let nth = self.rel[..slot]
                .iter()
                .filter(|&&r| r == OVERFLOW_MARK)
                .count();
            self.overflow[nth]
        } else {
            self.anchor + u64::from(rel)
        }
    }

    fn len(&self) -> usize {
        self.rel.len()
    }
}

/// Immutable view of the index at one publish point.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    blocks: Vec<Arc<IndexBlock>>,
    len: u64,
}

impl IndexSnapshot {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stored entry for line `n`: the byte offset where line `n + 1` starts.
    pub fn entry(&self, n: u64) -> Option<u64> {
        if n >= self.len {
            return None;
        }
        let block = &self.blocks[(n / BLOCK_LINES) as usize];
        Some(block.entry((n % BLOCK_LINES) as usize))
    }

    /// Byte offset at which line `n` starts.
    pub fn line_start(&self, n: u64) -> Option<u64> {
        if n >= self.len {
            return None;
        }
        if n == 0 {
            Some(0)
        } else {
            self.entry(n - 1)
        }
    }

    /// Byte range of line `n`'s content, terminator excluded.
    pub fn line_range(&self, n: u64, cr_size: u64) -> Option<Range<u64>> {
        let start = self.line_start(n)?;
        let end = self.entry(n)? - cr_size;
        Some(start..end)
    }

    /// Line number containing byte `offset` (lower-bound binary search).
    /// Offsets past the last entry land in the unterminated tail and
    /// report `len()`.
    pub fn locate(&self, offset: u64) -> u64 {
        let mut low = 0u64;
        let mut high = self.len;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.entry(mid).expect("mid < len") <= offset {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Offset one past the terminator of the last indexed line.
    pub fn end_of_last_line(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.entry(self.len - 1).expect("index not empty")
        }
    }
}

/// Shared handle to the current index snapshot.
///
/// Cheap to clone behind an `Arc`; readers call [`snapshot`](Self::snapshot)
/// and work against a stable view while the writer keeps appending.
#[derive(Debug, Default)]
pub struct LineIndex {
    current: ArcSwap<IndexSnapshot>,
}

impl LineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> u64 {
        self.current.load().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The unique write path to a [`LineIndex`].
///
/// Owned by the indexing engine; appends go to a private tail block and
/// become visible only through [`publish`](Self::publish).
pub struct LineIndexWriter {
    shared: Arc<LineIndex>,
    sealed: Vec<Arc<IndexBlock>>,
    tail: IndexBlock,
    len: u64,
    last: Option<u64>,
}

impl LineIndexWriter {
    pub fn new(shared: Arc<LineIndex>) -> Self {
        Self {
            shared,
            sealed: Vec::new(),
            tail: IndexBlock::default(),
            len: 0,
            last: None,
        }
    }

    /// Resume writing after the prefix already published in `shared`,
    /// re-opening the partial tail block for mutation.
    pub fn resume(shared: Arc<LineIndex>) -> Self {
        let snapshot = shared.snapshot();
        let mut writer = Self::new(shared);
        writer.len = snapshot.len;
        writer.last = if snapshot.len == 0 {
            None
        } else {
            snapshot.entry(snapshot.len - 1)
        };

        let full_blocks = (snapshot.len / BLOCK_LINES) as usize;
        writer.sealed = snapshot.blocks[..full_blocks].to_vec();
        if full_blocks < snapshot.blocks.len() {
            writer.tail = (*snapshot.blocks[full_blocks]).clone();
        }
        writer
    }

    /// Append the next line-end entry. Must be strictly greater than the
    /// previous one.
    pub fn append(&mut self, end_offset: u64) {
        debug_assert!(
            self.last.map_or(true, |last| end_offset > last),
            "line index entries must be strictly increasing"
        );
        self.tail.push(end_offset);
        self.len += 1;
        self.last = Some(end_offset);
        if self.tail.len() as u64 == BLOCK_LINES {
            let sealed = std::mem::take(&mut self.tail);
            self.sealed.push(Arc::new(sealed));
        }
    }

    /// Drop all entries at and after line `n` and publish the shorter view.
    pub fn truncate(&mut self, n: u64) {
        if n >= self.len {
            return;
        }
        let survivors: Vec<u64> = (0..n)
            .map(|i| self.entry_at(i).expect("i < len"))
            .collect();
        self.sealed.clear();
        self.tail = IndexBlock::default();
        self.len = 0;
        self.last = None;
        for value in survivors {
            self.append(value);
        }
        self.publish();
    }

    /// Make everything appended so far visible to readers. One atomic
    /// pointer store; sealed blocks are shared, the tail is copied.
    pub fn publish(&self) {
        let mut blocks = self.sealed.clone();
        if self.tail.len() > 0 {
            blocks.push(Arc::new(self.tail.clone()));
        }
        self.shared.current.store(Arc::new(IndexSnapshot {
            blocks,
            len: self.len,
        }));
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last_entry(&self) -> Option<u64> {
        self.last
    }

    /// Offset one past the terminator of the last appended line.
    pub fn end_of_last_line(&self) -> u64 {
        self.last.unwrap_or(0)
    }

    fn entry_at(&self, n: u64) -> Option<u64> {
        if n >= self.len {
            return None;
        }
        let block_no = (n / BLOCK_LINES) as usize;
        let slot = (n % BLOCK_LINES) as usize;
        if block_no < self.sealed.len() {
            Some(self.sealed[block_no].entry(slot))
        } else {
            Some(self.tail.entry(slot))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(entries: &[u64]) -> (Arc<LineIndex>, LineIndexWriter) {
        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        for &e in entries {
            writer.append(e);
        }
        writer.publish();
        (index, writer)
    }

    #[test]
    fn empty_index() {
        let index = LineIndex::new();
        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 0);
        assert_eq!(snapshot.entry(0), None);
        assert_eq!(snapshot.end_of_last_line(), 0);
    }

    #[test]
    fn line_ranges_single_byte() {
        // "a\nb\nc\n" -> entries 2, 4, 6
        let (index, _writer) = filled(&[2, 4, 6]);
        let snap = index.snapshot();
        assert_eq!(snap.line_range(0, 1), Some(0..1));
        assert_eq!(snap.line_range(1, 1), Some(2..3));
        assert_eq!(snap.line_range(2, 1), Some(4..5));
        assert_eq!(snap.line_range(3, 1), None);
    }

    #[test]
    fn locate_is_lower_bound() {
        let (index, _writer) = filled(&[2, 4, 6]);
        let snap = index.snapshot();
        assert_eq!(snap.locate(0), 0);
        assert_eq!(snap.locate(1), 0);
        assert_eq!(snap.locate(2), 1);
        assert_eq!(snap.locate(5), 2);
        assert_eq!(snap.locate(6), 3); // past the last entry: the tail
    }

    #[test]
    fn appends_are_invisible_until_publish() {
        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        writer.append(10);
        assert_eq!(index.len(), 0);
        writer.publish();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn snapshots_are_stable_across_appends() {
        let (index, mut writer) = filled(&[2, 4]);
        let before = index.snapshot();
        writer.append(6);
        writer.publish();
        assert_eq!(before.len(), 2);
        assert_eq!(index.snapshot().len(), 3);
        assert_eq!(before.entry(1), Some(4));
    }

    #[test]
    fn blocks_seal_and_chain() {
        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        let count = BLOCK_LINES * 2 + 17;
        for i in 0..count {
            writer.append((i + 1) * 10);
        }
        writer.publish();
        let snap = index.snapshot();
        assert_eq!(snap.len(), count);
        for i in 0..count {
            assert_eq!(snap.entry(i), Some((i + 1) * 10));
        }
        assert_eq!(snap.locate(((count - 1) * 10) + 5), count - 1);
    }

    #[test]
    fn overflow_offsets_spill_to_side_table() {
        // Second entry is more than 32 bits away from the block anchor.
        let far = u64::from(u32::MAX) + 1000;
        let (index, _writer) = filled(&[100, far, far + 50]);
        let snap = index.snapshot();
        assert_eq!(snap.entry(0), Some(100));
        assert_eq!(snap.entry(1), Some(far));
        assert_eq!(snap.entry(2), Some(far + 50));
        assert_eq!(snap.locate(far), 2);
        assert_eq!(snap.locate(far - 1), 1);
    }

    #[test]
    fn resume_continues_after_published_prefix() {
        let (index, _writer) = filled(&[2, 4, 6]);
        let mut writer = LineIndexWriter::resume(Arc::clone(&index));
        assert_eq!(writer.len(), 3);
        assert_eq!(writer.last_entry(), Some(6));
        writer.append(9);
        writer.publish();
        let snap = index.snapshot();
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.entry(2), Some(6));
        assert_eq!(snap.entry(3), Some(9));
    }

    #[test]
    fn resume_across_block_boundary() {
        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        for i in 0..BLOCK_LINES + 3 {
            writer.append((i + 1) * 2);
        }
        writer.publish();

        let mut resumed = LineIndexWriter::resume(Arc::clone(&index));
        resumed.append((BLOCK_LINES + 4) * 2);
        resumed.publish();
        let snap = index.snapshot();
        assert_eq!(snap.len(), BLOCK_LINES + 4);
        assert_eq!(snap.entry(BLOCK_LINES + 3), Some((BLOCK_LINES + 4) * 2));
    }

    #[test]
    fn truncate_drops_entries_from_line() {
        let (index, mut writer) = filled(&[2, 4, 6, 8, 10]);
        writer.truncate(2);
        assert_eq!(index.len(), 2);
        let snap = index.snapshot();
        assert_eq!(snap.entry(1), Some(4));
        assert_eq!(snap.entry(2), None);

        writer.truncate(0);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn readers_see_consistent_prefixes_during_appends() {
        let index = Arc::new(LineIndex::new());
        let reader_index = Arc::clone(&index);

        let reader = std::thread::spawn(move || {
            for _ in 0..1000 {
                let snap = reader_index.snapshot();
                let len = snap.len();
                // Every visible entry must be readable and increasing.
                let mut previous = 0;
                for n in 0..len {
                    let entry = snap.entry(n).expect("entry within snapshot length");
                    assert!(entry > previous || n == 0);
                    previous = entry;
                }
            }
        });

        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        for i in 0..10_000u64 {
            writer.append((i + 1) * 3);
            if i % 64 == 0 {
                writer.publish();
            }
        }
        writer.publish();
        reader.join().unwrap();
        assert_eq!(index.len(), 10_000);
    }
}
