//! The indexing engine: scans newly available bytes block by block and
//! appends one entry per discovered line terminator.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use memchr::memchr_iter;

use crate::cancel::CancelToken;
use crate::encoding::TextCodec;
use crate::event::{CoreEvent, EventSink, LoadStatus};
use crate::index::LineIndexWriter;
use crate::lines::untabified_step;

/// Result of one indexing pass. `max_length` and `partial_line_len` are
/// meaningful only when `status` is `Successful`; on interruption or
/// failure the index still holds a consistent prefix of fully processed
/// blocks.
#[derive(Debug, Clone, Copy)]
pub struct IndexPassOutcome {
    pub status: LoadStatus,
    pub max_length: u64,
    pub partial_line_len: u64,
}

/// One cancellable scan of `[start, file_size)`.
pub struct IndexPass {
    codec: TextCodec,
    block_size: usize,
    cancel: CancelToken,
    events: Option<EventSink>,
}

impl IndexPass {
    pub fn new(codec: TextCodec, block_size: usize, cancel: CancelToken) -> Self {
        Self {
            codec,
            block_size: block_size.max(4096),
            cancel,
            events: None,
        }
    }

    /// Emit `loading_progressed` after each block through `sink`.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Scan `[start, file_size)` and append discovered line ends to
    /// `writer`. `start` must be the end of the last complete line so an
    /// unterminated tail from the previous pass merges with new bytes.
    ///
    /// The cancel flag is polled between blocks, never inside the scan
    /// loop, and a block's entries reach the writer only after the block
    /// was read in full.
    pub fn run(
        &self,
        file: &mut File,
        file_size: u64,
        writer: &mut LineIndexWriter,
        start: u64,
        prev_max_length: u64,
    ) -> IndexPassOutcome {
        let before_cr = self.codec.before_cr();
        let after_cr = self.codec.after_cr();

        let mut max_length = prev_max_length;
        // Expanded-length state of the line currently open across blocks.
        let mut line_bytes: u64 = 0;
        let mut line_spaces: u64 = 0;
        // Terminator filler bytes spilling into the next block.
        let mut skip: usize = 0;

        if let Err(err) = file.seek(SeekFrom::Start(start)) {
            tracing::error!("indexing seek to {start} failed: {err}");
            return self.outcome(LoadStatus::Failed, max_length, 0);
        }

        let mut buf = vec![0u8; self.block_size];
        let mut pos = start;

        while pos < file_size {
            if self.cancel.is_cancelled() {
                tracing::info!("indexing interrupted at {pos}");
                writer.publish();
                return self.outcome(LoadStatus::Interrupted, max_length, line_bytes);
            }

            let want = (file_size - pos).min(self.block_size as u64) as usize;
            if let Err(err) = file.read_exact(&mut buf[..want]) {
                tracing::error!("indexing read at {pos} failed: {err}");
                writer.publish();
                return self.outcome(LoadStatus::Failed, max_length, line_bytes);
            }
            let block = &buf[..want];

            let mut cursor = skip.min(want);
            skip = skip.saturating_sub(want);

            for lf in memchr_iter(b'\n', block) {
                if lf < cursor {
                    continue;
                }
                let entry = pos + lf as u64 + 1 + after_cr;
                if entry > file_size {
                    // Truncated multi-byte terminator at EOF: not a line
                    // end yet, the bytes stay in the partial tail.
                    continue;
                }

                let (bytes, spaces) = untabified_step(&block[cursor..lf], line_bytes, line_spaces);
                let content_bytes = bytes.saturating_sub(before_cr);
                max_length = max_length.max(content_bytes + spaces);

                writer.append(entry);
                line_bytes = 0;
                line_spaces = 0;

                let next = lf + 1 + after_cr as usize;
                if next >= want {
                    skip = next - want;
                    cursor = want;
                } else {
                    cursor = next;
                }
            }

            let (bytes, spaces) = untabified_step(&block[cursor..want], line_bytes, line_spaces);
            line_bytes = bytes;
            line_spaces = spaces;

            pos += want as u64;
            writer.publish();

            if let Some(events) = &self.events {
                let percent = (pos * 100 / file_size) as u32;
                events.post(CoreEvent::LoadingProgressed(percent));
            }
        }

        writer.publish();
        self.outcome(LoadStatus::Successful, max_length, line_bytes)
    }

    fn outcome(&self, status: LoadStatus, max_length: u64, partial_line_len: u64) -> IndexPassOutcome {
        IndexPassOutcome {
            status,
            max_length,
            partial_line_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LineIndex;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_log(dir: &std::path::Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    fn index_bytes(content: &[u8], codec: TextCodec) -> (Arc<LineIndex>, IndexPassOutcome) {
        let dir = tempdir().unwrap();
        let path = write_log(dir.path(), "test.log", content);
        let mut file = File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();

        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        let pass = IndexPass::new(codec, 4096, CancelToken::new());
        let outcome = pass.run(&mut file, size, &mut writer, 0, 0);
        (index, outcome)
    }

    #[test]
    fn ten_line_file() {
        let (index, outcome) = index_bytes(b"a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n", TextCodec::Utf8);
        assert_eq!(outcome.status, LoadStatus::Successful);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.line_range(0, 1), Some(0..1));
        assert_eq!(snap.line_range(9, 1), Some(18..19));
        assert_eq!(outcome.partial_line_len, 0);
    }

    #[test]
    fn empty_file() {
        let (index, outcome) = index_bytes(b"", TextCodec::Utf8);
        assert_eq!(outcome.status, LoadStatus::Successful);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn tab_expanded_max_length() {
        let (_index, outcome) = index_bytes(b"\t\tX\n", TextCodec::Utf8);
        // Tabstop 8: each tab expands to 8 columns, then one byte.
        assert_eq!(outcome.max_length, 17);
    }

    #[test]
    fn crlf_lines_keep_the_cr() {
        let (index, outcome) = index_bytes(b"abc\r\ndef\r\n", TextCodec::Utf8);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.line_range(0, 1), Some(0..4)); // "abc\r"
        assert_eq!(snap.line_range(1, 1), Some(5..9)); // "def\r"
        assert_eq!(outcome.max_length, 4);
    }

    #[test]
    fn unterminated_tail_is_not_a_line() {
        let (index, outcome) = index_bytes(b"hello", TextCodec::Utf8);
        assert_eq!(index.len(), 0);
        assert_eq!(outcome.partial_line_len, 5);
    }

    #[test]
    fn tail_merges_with_appended_bytes() {
        let dir = tempdir().unwrap();
        let path = write_log(dir.path(), "grow.log", b"hello");

        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        let pass = IndexPass::new(TextCodec::Utf8, 4096, CancelToken::new());

        let mut file = File::open(&path).unwrap();
        let outcome = pass.run(&mut file, 5, &mut writer, 0, 0);
        assert_eq!(index.len(), 0);
        assert_eq!(outcome.partial_line_len, 5);

        // Append " world\n" and rescan from the end of the last complete
        // line (offset 0): the tail becomes one logical line.
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b" world\n")
            .unwrap();

        let mut file = File::open(&path).unwrap();
        let start = writer.end_of_last_line();
        let outcome = pass.run(&mut file, 12, &mut writer, start, outcome.max_length);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.line_range(0, 1), Some(0..11)); // "hello world"
        assert_eq!(outcome.partial_line_len, 0);
        assert_eq!(outcome.max_length, 11);
    }

    #[test]
    fn utf16le_lines() {
        // "ab\ncd\n" in UTF-16LE
        let mut bytes = Vec::new();
        for ch in "ab\ncd\n".encode_utf16() {
            bytes.extend_from_slice(&ch.to_le_bytes());
        }
        let (index, outcome) = index_bytes(&bytes, TextCodec::Utf16Le);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 2);
        // Line 0: bytes [0, 4) = "ab", terminator 0A 00 at [4, 6).
        assert_eq!(snap.line_range(0, 2), Some(0..4));
        assert_eq!(snap.line_range(1, 2), Some(6..10));
        assert_eq!(outcome.max_length, 4);
    }

    #[test]
    fn utf16be_lines() {
        let mut bytes = Vec::new();
        for ch in "ab\ncd\n".encode_utf16() {
            bytes.extend_from_slice(&ch.to_be_bytes());
        }
        let (index, outcome) = index_bytes(&bytes, TextCodec::Utf16Be);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 2);
        // Terminator is 00 0A at [4, 6); the filler byte before the LF
        // belongs to the terminator, not to the line content.
        assert_eq!(snap.line_range(0, 2), Some(0..4));
        assert_eq!(snap.line_range(1, 2), Some(6..10));
        assert_eq!(outcome.max_length, 4);
    }

    #[test]
    fn lines_spanning_blocks() {
        // Block size is clamped to 4096; build a line longer than that.
        let mut content = vec![b'x'; 10_000];
        content.push(b'\n');
        content.extend_from_slice(b"short\n");
        let (index, outcome) = index_bytes(&content, TextCodec::Utf8);
        let snap = index.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.line_range(0, 1), Some(0..10_000));
        assert_eq!(outcome.max_length, 10_000);
    }

    #[test]
    fn cancel_stops_between_blocks() {
        let mut content = Vec::new();
        for i in 0..5000 {
            content.extend_from_slice(format!("line {i}\n").as_bytes());
        }
        let dir = tempdir().unwrap();
        let path = write_log(dir.path(), "cancel.log", &content);
        let mut file = File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();

        let cancel = CancelToken::new();
        cancel.cancel();

        let index = Arc::new(LineIndex::new());
        let mut writer = LineIndexWriter::new(Arc::clone(&index));
        let pass = IndexPass::new(TextCodec::Utf8, 4096, CancelToken::clone(&cancel));
        let outcome = pass.run(&mut file, size, &mut writer, 0, 0);
        assert_eq!(outcome.status, LoadStatus::Interrupted);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn sum_of_lengths_accounts_for_whole_file() {
        let content = b"alpha\nbeta\ngamma-long\nd\n";
        let (index, _outcome) = index_bytes(content, TextCodec::Utf8);
        let snap = index.snapshot();
        let total: u64 = (0..snap.len())
            .map(|n| {
                let range = snap.line_range(n, 1).unwrap();
                range.end - range.start
            })
            .sum();
        assert_eq!(total + snap.len(), content.len() as u64);
    }
}
