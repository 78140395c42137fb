//! The search graph: one reader producing fixed-size line chunks into a
//! bounded queue, N matchers each running its own compiled regex, and one
//! combiner merging per-chunk results into the shared projection.
//!
//! The chunk queue holds at most `3 * N` chunks; the reader blocks once it
//! is full, which bounds memory to a few chunks per matcher regardless of
//! file size.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded};
use regex::Regex;
use roaring::RoaringBitmap;

use crate::cancel::CancelToken;
use crate::event::{CoreEvent, EventSink};
use crate::filtered::FilteredLines;
use crate::lines::untabified_length;

pub(crate) struct PipelineParams {
    pub regex: Regex,
    pub start_line: u64,
    pub end_line: u64,
    pub initial_line: u64,
    pub chunk_lines: u64,
    pub matcher_count: usize,
}

struct SearchChunk {
    start: u64,
    lines: Vec<String>,
}

struct PartialResults {
    chunk_start: u64,
    matching: RoaringBitmap,
    processed: u64,
    max_length: u64,
}

/// Run one search to completion on the calling thread (which acts as the
/// combiner). Emits `search_progressed` events with monotonically
/// non-decreasing match counts, then exactly one terminal pair: a 100%
/// progress report (skipped when cancelled) and `search_finished`.
pub(crate) fn run_search(
    filtered: &Arc<FilteredLines>,
    events: &EventSink,
    cancel: &CancelToken,
    params: PipelineParams,
) {
    let source = Arc::clone(filtered.source());
    let end_line = params.end_line.min(source.nb_lines());
    let initial_line = params.initial_line.max(params.start_line);
    let started = Instant::now();

    if initial_line >= end_line {
        events.post(CoreEvent::SearchProgressed {
            nb_matches: filtered.nb_matches(),
            percent: 100,
            initial_line,
        });
        events.post(CoreEvent::SearchFinished);
        return;
    }

    let matcher_count = params.matcher_count.max(1);
    let chunk_lines = params.chunk_lines.max(1);
    tracing::info!(
        "searching lines [{initial_line}, {end_line}) with {matcher_count} matchers"
    );

    let (chunk_tx, chunk_rx) = bounded::<SearchChunk>(matcher_count * 3);
    let (result_tx, result_rx) = unbounded::<PartialResults>();

    let reader = std::thread::spawn({
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        move || {
            source.attach_reader();
            let mut chunk_start = initial_line;
            while chunk_start < end_line {
                if cancel.is_cancelled() {
                    tracing::info!("search reader interrupted at line {chunk_start}");
                    break;
                }
                let count = chunk_lines.min(end_line - chunk_start);
                let lines = match source.get_lines_checked(chunk_start, count) {
                    Ok(lines) => lines,
                    Err(err) => {
                        tracing::error!("search read at line {chunk_start} failed: {err:#}");
                        break;
                    }
                };
                let read = lines.len() as u64;
                if chunk_tx
                    .send(SearchChunk {
                        start: chunk_start,
                        lines,
                    })
                    .is_err()
                {
                    break;
                }
                if read < count {
                    break;
                }
                chunk_start += count;
            }
            source.detach_reader();
        }
    });

    let matchers: Vec<_> = (0..matcher_count)
        .map(|_| {
            // Each matcher owns its own copy of the compiled pattern.
            let regex = params.regex.clone();
            let chunk_rx = chunk_rx.clone();
            let result_tx = result_tx.clone();
            std::thread::spawn(move || {
                while let Ok(chunk) = chunk_rx.recv() {
                    let mut matching = RoaringBitmap::new();
                    let mut max_length = 0u64;
                    for (offset, line) in chunk.lines.iter().enumerate() {
                        if regex.is_match(line) {
                            matching.insert((chunk.start + offset as u64) as u32);
                            max_length = max_length.max(untabified_length(line.as_bytes()));
                        }
                    }
                    let partial = PartialResults {
                        chunk_start: chunk.start,
                        matching,
                        processed: chunk.lines.len() as u64,
                        max_length,
                    };
                    if result_tx.send(partial).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(chunk_rx);
    drop(result_tx);

    // Combiner: single consumer of the results queue.
    let total_lines = end_line - initial_line;
    let mut total_processed = 0u64;
    let mut nb_matches = filtered.nb_matches();
    let mut reported_matches = nb_matches;
    let mut reported_percent = 0u32;

    while let Ok(partial) = result_rx.recv() {
        if cancel.is_cancelled() {
            // Keep draining so the matchers can exit, but merge nothing
            // and report nothing further.
            continue;
        }
        if partial.processed > 0 {
            let processed_through = partial.chunk_start + partial.processed;
            nb_matches =
                filtered.add_partial(&partial.matching, processed_through, partial.max_length);
            total_processed += partial.processed;
        }
        let percent = (total_processed * 100 / total_lines) as u32;
        if percent > reported_percent || nb_matches > reported_matches {
            events.post(CoreEvent::SearchProgressed {
                nb_matches,
                percent: percent.min(99),
                initial_line,
            });
            reported_percent = percent;
            reported_matches = nb_matches;
        }
    }

    let _ = reader.join();
    for matcher in matchers {
        let _ = matcher.join();
    }

    if !cancel.is_cancelled() {
        events.post(CoreEvent::SearchProgressed {
            nb_matches: filtered.nb_matches(),
            percent: 100,
            initial_line,
        });
    }
    events.post(CoreEvent::SearchFinished);

    let elapsed = started.elapsed();
    tracing::info!(
        "search done: {} matches over {} lines in {:.1?}",
        filtered.nb_matches(),
        total_processed,
        elapsed
    );
}
