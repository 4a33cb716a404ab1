//! Concurrent alignment orchestration.
//!
//! One reader parses mapping rows into envelopes and feeds a bounded
//! lock-free queue; N workers pop envelopes, fetch padded substrings
//! through their private FASTA handles, run their private wavefront
//! kernel, and push output strings onto per-stream result queues; one
//! writer per enabled output stream drains its queue. Bounded queues
//! give backpressure: producers spin when a queue is full. Output
//! order is arrival order and carries no relation to input order.
//!
//! Termination: the reader release-stores `reader_done` on every exit
//! path; workers drain the input queue and clear their `working` flag;
//! writers exit once the reader is done, every worker flag is clear,
//! and their queue pops empty.

use crate::kernel::{AlignmentJob, KernelOutput, WavefrontKernel};
use crate::mapping::MappingRecord;
use crate::minmer::{reverse_complement, Strand};
use crate::progress::ProgressSink;
use crate::sequence_store::{FastaHandle, SequenceStore};
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_queue::ArrayQueue;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Queue capacity; well past what N workers keep in flight
const QUEUE_CAPACITY: usize = 1 << 17;

/// Back-off while a queue is empty
const POLL_INTERVAL: Duration = Duration::from_micros(100);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub threads: usize,
    /// Upstream mapping rows (PAF-like), plain or bgzipped
    pub mapping_path: PathBuf,
    /// PAF/SAM stream; None writes to stdout
    pub paf_output: Option<PathBuf>,
    /// When set, each alignment's TSV goes to `<prefix><N>.tsv`
    pub tsv_prefix: Option<String>,
    /// When set, patching info is appended to this file
    pub patching_tsv: Option<PathBuf>,
    /// Flank length for target padding (wflign minor length)
    pub max_len_minor: u64,
}

/// Envelope travelling from the reader to a worker
struct SeqRecord {
    record: MappingRecord,
    raw_line: String,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub records: u64,
    pub aligned_bases: u64,
    pub emitted: u64,
    pub skipped: u64,
}

pub struct AlignmentPipeline {
    config: PipelineConfig,
    target_handles: Vec<FastaHandle>,
    query_handles: Vec<FastaHandle>,
    kernels: Vec<Box<dyn WavefrontKernel>>,
}

impl AlignmentPipeline {
    pub fn new(
        config: PipelineConfig,
        target_store: SequenceStore,
        query_store: SequenceStore,
        kernels: Vec<Box<dyn WavefrontKernel>>,
    ) -> Result<AlignmentPipeline> {
        if config.threads == 0 {
            bail!("pipeline needs at least one worker thread");
        }
        let target_handles = target_store.into_handles();
        let query_handles = query_store.into_handles();
        if target_handles.len() < config.threads
            || query_handles.len() < config.threads
            || kernels.len() < config.threads
        {
            bail!(
                "pipeline needs one FASTA handle pair and one kernel per worker ({} requested)",
                config.threads
            );
        }
        Ok(AlignmentPipeline {
            config,
            target_handles,
            query_handles,
            kernels,
        })
    }

    /// Run the pipeline to completion and return its counters.
    pub fn run(mut self, progress: &dyn ProgressSink) -> Result<PipelineStats> {
        let n_workers = self.config.threads;

        let seq_queue: ArrayQueue<SeqRecord> = ArrayQueue::new(QUEUE_CAPACITY);
        let paf_queue: ArrayQueue<String> = ArrayQueue::new(QUEUE_CAPACITY);
        let tsv_queue: ArrayQueue<String> = ArrayQueue::new(QUEUE_CAPACITY);
        let patching_queue: ArrayQueue<String> = ArrayQueue::new(QUEUE_CAPACITY);

        let reader_done = AtomicBool::new(false);
        let working: Vec<AtomicBool> = (0..n_workers).map(|_| AtomicBool::new(true)).collect();
        let skipped = AtomicU64::new(0);

        let tsv_enabled = self.config.tsv_prefix.is_some();
        let patching_enabled = self.config.patching_tsv.is_some();

        // output streams are opened before any thread starts so setup
        // failures stay on the caller
        let paf_out: Box<dyn Write + Send> = match &self.config.paf_output {
            Some(path) => Box::new(File::create(path).with_context(|| {
                format!("failed to create output file {}", path.display())
            })?),
            None => Box::new(std::io::stdout()),
        };
        let patching_out: Option<File> = match &self.config.patching_tsv {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| {
                        format!("failed to open patching TSV {}", path.display())
                    })?,
            ),
            None => None,
        };

        let config = &self.config;
        let mut worker_resources: Vec<(usize, FastaHandle, FastaHandle, Box<dyn WavefrontKernel>)> =
            Vec::with_capacity(n_workers);
        for (tid, ((target, query), kernel)) in self
            .target_handles
            .drain(..)
            .zip(self.query_handles.drain(..))
            .zip(self.kernels.drain(..))
            .enumerate()
            .take(n_workers)
        {
            worker_resources.push((tid, target, query, kernel));
        }

        let stats = thread::scope(|scope| -> Result<PipelineStats> {
            // reader: mapping rows -> seq_queue
            let reader = scope.spawn(|| {
                let result = (|| -> Result<(u64, u64)> {
                    let input = crate::fasta_stream::open_text_reader(&config.mapping_path)?;
                    let mut records: u64 = 0;
                    let mut bases: u64 = 0;
                    for line in input.lines() {
                        let line = line.with_context(|| {
                            format!("read error in {}", config.mapping_path.display())
                        })?;
                        if line.trim().is_empty() {
                            continue;
                        }
                        let record = MappingRecord::parse(&line)?;
                        records += 1;
                        bases += record.query_span();
                        push_spin(&seq_queue, SeqRecord {
                            record,
                            raw_line: line,
                        });
                    }
                    Ok((records, bases))
                })();
                // set on every exit path so workers always drain out
                reader_done.store(true, Ordering::Release);
                result
            });

            // workers: seq_queue -> output queues
            let mut workers = Vec::with_capacity(n_workers);
            for (tid, mut target, mut query, mut kernel) in worker_resources {
                let seq_queue = &seq_queue;
                let paf_queue = &paf_queue;
                let tsv_queue = &tsv_queue;
                let patching_queue = &patching_queue;
                let reader_done = &reader_done;
                let working = &working;
                let skipped = &skipped;
                workers.push(scope.spawn(move || {
                    loop {
                        match seq_queue.pop() {
                            Some(envelope) => {
                                let span = envelope.record.query_span();
                                match align_record(
                                    config,
                                    &mut target,
                                    &mut query,
                                    kernel.as_mut(),
                                    &envelope.record,
                                ) {
                                    Ok(output) => {
                                        if !output.paf.is_empty() {
                                            push_spin(paf_queue, output.paf);
                                        }
                                        if tsv_enabled && !output.tsv.is_empty() {
                                            push_spin(tsv_queue, output.tsv);
                                        }
                                        if patching_enabled && !output.patching.is_empty() {
                                            push_spin(patching_queue, output.patching);
                                        }
                                    }
                                    Err(e) => {
                                        eprintln!(
                                            "[wfalign::align] ERROR: {e:#}; skipping row: {}",
                                            envelope.raw_line
                                        );
                                        skipped.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                                progress.increment(span);
                            }
                            None => {
                                if reader_done.load(Ordering::Acquire) {
                                    break;
                                }
                                thread::sleep(POLL_INTERVAL);
                            }
                        }
                    }
                    working[tid].store(false, Ordering::Release);
                }));
            }

            // PAF/SAM writer
            let paf_writer = {
                let paf_queue = &paf_queue;
                let reader_done = &reader_done;
                let working = &working;
                scope.spawn(move || -> Result<u64> {
                    let mut out = BufWriter::new(paf_out);
                    let mut written: u64 = 0;
                    // on a write error keep draining so producers never
                    // wedge on a full queue, then surface the error
                    let mut write_err: Option<anyhow::Error> = None;
                    loop {
                        match paf_queue.pop() {
                            Some(line) => {
                                if write_err.is_none() {
                                    match out.write_all(line.as_bytes()) {
                                        Ok(()) => written += 1,
                                        Err(e) => {
                                            write_err = Some(
                                                anyhow::Error::new(e)
                                                    .context("failed writing alignment output"),
                                            )
                                        }
                                    }
                                }
                            }
                            None => {
                                if reader_done.load(Ordering::Acquire) && !still_working(working) {
                                    break;
                                }
                                thread::sleep(POLL_INTERVAL);
                            }
                        }
                    }
                    if let Some(e) = write_err {
                        return Err(e);
                    }
                    out.flush().context("failed flushing alignment output")?;
                    Ok(written)
                })
            };

            // one TSV file per alignment, numbered in arrival order
            let tsv_writer = tsv_enabled.then(|| {
                let prefix = config.tsv_prefix.clone().unwrap();
                let tsv_queue = &tsv_queue;
                let reader_done = &reader_done;
                let working = &working;
                scope.spawn(move || -> Result<()> {
                    let mut serial: u64 = 0;
                    let mut write_err: Option<anyhow::Error> = None;
                    loop {
                        match tsv_queue.pop() {
                            Some(block) => {
                                if write_err.is_none() {
                                    let path = format!("{prefix}{serial}.tsv");
                                    if let Err(e) = std::fs::write(&path, block) {
                                        write_err = Some(
                                            anyhow::Error::new(e)
                                                .context(format!("failed writing {path}")),
                                        );
                                    }
                                    serial += 1;
                                }
                            }
                            None => {
                                if reader_done.load(Ordering::Acquire) && !still_working(working) {
                                    break;
                                }
                                thread::sleep(POLL_INTERVAL);
                            }
                        }
                    }
                    match write_err {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                })
            });

            // appended patching-info stream
            let patching_writer = patching_out.map(|file| {
                let patching_queue = &patching_queue;
                let reader_done = &reader_done;
                let working = &working;
                scope.spawn(move || -> Result<()> {
                    let mut out = BufWriter::new(file);
                    let mut write_err: Option<anyhow::Error> = None;
                    loop {
                        match patching_queue.pop() {
                            Some(block) => {
                                if write_err.is_none() {
                                    if let Err(e) = out.write_all(block.as_bytes()) {
                                        write_err = Some(
                                            anyhow::Error::new(e)
                                                .context("failed writing patching TSV"),
                                        );
                                    }
                                }
                            }
                            None => {
                                if reader_done.load(Ordering::Acquire) && !still_working(working) {
                                    break;
                                }
                                thread::sleep(POLL_INTERVAL);
                            }
                        }
                    }
                    if let Some(e) = write_err {
                        return Err(e);
                    }
                    out.flush().context("failed flushing patching TSV")?;
                    Ok(())
                })
            });

            // join order matters: reader first, then workers, then writers
            let reader_result = reader.join().expect("reader thread panicked");
            for worker in workers {
                worker.join().expect("worker thread panicked");
            }
            let emitted = paf_writer.join().expect("writer thread panicked")?;
            if let Some(handle) = tsv_writer {
                handle.join().expect("tsv writer panicked")?;
            }
            if let Some(handle) = patching_writer {
                handle.join().expect("patching writer panicked")?;
            }

            let (records, aligned_bases) = reader_result?;
            Ok(PipelineStats {
                records,
                aligned_bases,
                emitted,
                skipped: skipped.load(Ordering::Relaxed),
            })
        })?;

        progress.finish();
        Ok(stats)
    }
}

/// Fetch both substrings for one mapping and run the kernel.
///
/// The target slice carries up to `max_len_minor` flanking bases on
/// each side, clamped at the sequence ends; the kernel uses them for
/// boundary patching. The query is fetched without padding and
/// reverse-complemented for REV mappings.
fn align_record(
    config: &PipelineConfig,
    target_handle: &mut FastaHandle,
    query_handle: &mut FastaHandle,
    kernel: &mut dyn WavefrontKernel,
    record: &MappingRecord,
) -> Result<KernelOutput> {
    let target_total_len = target_handle.seq_len(&record.target_name).ok_or_else(|| {
        anyhow!("target sequence {} absent from FASTA index", record.target_name)
    })?;
    let query_total_len = query_handle.seq_len(&record.query_name).ok_or_else(|| {
        anyhow!("query sequence {} absent from FASTA index", record.query_name)
    })?;

    if record.target_start < 0
        || record.target_end < record.target_start
        || record.target_end as u64 > target_total_len
    {
        bail!(
            "mapping boundaries {}..{} outside target {} (length {})",
            record.target_start,
            record.target_end,
            record.target_name,
            target_total_len
        );
    }
    if record.query_start < 0
        || record.query_end < record.query_start
        || record.query_end as u64 > query_total_len
    {
        bail!(
            "mapping boundaries {}..{} outside query {} (length {})",
            record.query_start,
            record.query_end,
            record.query_name,
            query_total_len
        );
    }

    let head_pad = (record.target_start as u64).min(config.max_len_minor);
    let tail_pad = (target_total_len - record.target_end as u64).min(config.max_len_minor);

    let target = target_handle.fetch(
        &record.target_name,
        record.target_start as u64 - head_pad,
        record.target_end as u64 + tail_pad,
    )?;
    let mut query = query_handle.fetch(
        &record.query_name,
        record.query_start as u64,
        record.query_end as u64,
    )?;
    if record.strand == Strand::Rev {
        query = reverse_complement(&query);
    }

    let job = AlignmentJob {
        query_name: &record.query_name,
        query: &query,
        query_total_len,
        query_start: record.query_start,
        query_end: record.query_end,
        strand: record.strand,
        target_name: &record.target_name,
        target: &target,
        target_total_len,
        target_start: record.target_start,
        target_end: record.target_end,
        head_pad,
        tail_pad,
        estimated_identity: record.estimated_identity,
    };
    Ok(kernel.align(&job))
}

/// Push with backpressure: spin until the bounded queue accepts
fn push_spin<T>(queue: &ArrayQueue<T>, mut item: T) {
    loop {
        match queue.push(item) {
            Ok(()) => return,
            Err(rejected) => {
                item = rejected;
                std::hint::spin_loop();
                thread::yield_now();
            }
        }
    }
}

fn still_working(working: &[AtomicBool]) -> bool {
    working.iter().any(|w| w.load(Ordering::Acquire))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_spin_delivers_into_bounded_queue() {
        let queue: ArrayQueue<u32> = ArrayQueue::new(2);
        push_spin(&queue, 1);
        push_spin(&queue, 2);
        assert_eq!(queue.pop(), Some(1));
        push_spin(&queue, 3);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn zero_workers_is_rejected() {
        // constructed without stores; the thread-count check fires first
        let config = PipelineConfig {
            threads: 0,
            mapping_path: PathBuf::from("/dev/null"),
            paf_output: None,
            tsv_prefix: None,
            patching_tsv: None,
            max_len_minor: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("x.fa");
        std::fs::write(&fasta, ">s\nACGTACGT\n").unwrap();
        let t = SequenceStore::open(&fasta, 1).unwrap();
        let q = SequenceStore::open(&fasta, 1).unwrap();
        assert!(AlignmentPipeline::new(config, t, q, Vec::new()).is_err());
    }
}
