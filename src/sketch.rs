//! Minmer sketch index over the reference.
//!
//! Construction is parallel over contigs: a bounded work queue feeds
//! sketcher threads running the streaming extractor, and the caller
//! thread merges their output back in contig-submission order so the
//! global index stays genome-ordered. After the build, high-frequency
//! seeds are pruned by percentile and the index becomes read-only.

use crate::fasta_stream::for_each_fasta_record;
use crate::minmer::{extract_minmers, MinmerInfo};
use crate::sequence_index::SequenceIndex;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::thread;

/// Sketching parameters; persisted in the index file and verified on
/// load.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchParams {
    pub kmer_size: usize,
    pub seg_length: usize,
    pub sketch_size: usize,
    pub alphabet_size: usize,
    /// Percentage of unique hashes to discard as frequent seeds
    pub kmer_pct_threshold: f64,
}

impl SketchParams {
    pub fn validate(&self) -> Result<()> {
        if self.kmer_size == 0 || self.kmer_size > 32 {
            bail!("k-mer size {} out of range 1..=32", self.kmer_size);
        }
        if self.seg_length < self.kmer_size {
            bail!(
                "segment length {} is shorter than k-mer size {}",
                self.seg_length,
                self.kmer_size
            );
        }
        if self.sketch_size == 0 {
            bail!("sketch size must be at least 1");
        }
        if self.alphabet_size != 4 {
            bail!("only the DNA alphabet (size 4) is supported");
        }
        if !(0.0..=100.0).contains(&self.kmer_pct_threshold) {
            bail!(
                "k-mer frequency threshold {}% out of range 0..=100",
                self.kmer_pct_threshold
            );
        }
        Ok(())
    }
}

/// Endpoint marker of a minmer's active window range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPoint {
    pub pos: i64,
    pub hash: u64,
    pub seq_id: u32,
    pub side: Side,
}

/// Positional minmer index of the reference
#[derive(Debug)]
pub struct SketchIndex {
    pub params: SketchParams,
    /// hash -> alternating OPEN/CLOSE interval points, genome order
    pub positions: HashMap<u64, Vec<IntervalPoint>>,
    /// all minmer windows, genome order per contig, contigs in input order
    pub minmers: Vec<MinmerInfo>,
    /// interval count per hash -> number of hashes with that count
    pub freq_hist: BTreeMap<u64, u64>,
    /// hashes pruned as too frequent
    pub frequent_seeds: HashSet<u64>,
    /// interval count at or above which a hash is frequent
    pub freq_threshold: Option<u64>,
    /// contig metadata and file partitions; seq_id indexes into it
    pub catalog: SequenceIndex,
    /// windows per hash, gathered during the merge; cleared by prune()
    hash_freq: HashMap<u64, u64>,
}

struct SketchTask {
    ordinal: usize,
    seq_id: u32,
    seq: Vec<u8>,
}

impl SketchIndex {
    pub fn empty(params: SketchParams) -> Self {
        SketchIndex {
            params,
            positions: HashMap::new(),
            minmers: Vec::new(),
            freq_hist: BTreeMap::new(),
            frequent_seeds: HashSet::new(),
            freq_threshold: None,
            catalog: SequenceIndex::new(),
            hash_freq: HashMap::new(),
        }
    }

    /// Sketch all reference files. Contigs shorter than the segment
    /// length are skipped with a warning and consume no sequence id.
    pub fn build(files: &[PathBuf], params: SketchParams, threads: usize) -> Result<SketchIndex> {
        params.validate()?;
        let threads = threads.max(1);
        let mut index = SketchIndex::empty(params);
        let mut skipped: u64 = 0;

        let (task_tx, task_rx) = crossbeam_channel::bounded::<SketchTask>(threads);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Vec<MinmerInfo>)>();

        let kmer_size = index.params.kmer_size;
        let seg_length = index.params.seg_length;
        let sketch_size = index.params.sketch_size;

        thread::scope(|scope| -> Result<()> {
            for _ in 0..threads {
                let rx = task_rx.clone();
                let tx = result_tx.clone();
                scope.spawn(move || {
                    for task in rx.iter() {
                        let minmers = extract_minmers(
                            &task.seq,
                            task.seq_id,
                            kmer_size,
                            seg_length,
                            sketch_size,
                        );
                        if tx.send((task.ordinal, minmers)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            let mut pending: HashMap<usize, Vec<MinmerInfo>> = HashMap::new();
            let mut next_merge: usize = 0;

            for file in files {
                eprintln!("[wfalign::sketch] processing {}", file.display());
                for_each_fasta_record(file, |name, seq| {
                    if seq.len() < seg_length {
                        eprintln!(
                            "[wfalign::sketch] WARNING: skipping short sequence {} (length {} < segment length {})",
                            name,
                            seq.len(),
                            seg_length
                        );
                        skipped += 1;
                        return Ok(());
                    }
                    let seq_id = index.catalog.add_contig(name, seq.len() as u64);
                    let task = SketchTask {
                        ordinal: seq_id as usize,
                        seq_id,
                        seq,
                    };
                    task_tx
                        .send(task)
                        .map_err(|_| anyhow::anyhow!("sketcher threads exited early"))?;
                    // merge whatever has finished while we feed
                    while let Ok((ordinal, minmers)) = result_rx.try_recv() {
                        pending.insert(ordinal, minmers);
                    }
                    Self::flush_in_order(
                        &mut pending,
                        &mut next_merge,
                        &mut index.positions,
                        &mut index.minmers,
                        &mut index.hash_freq,
                    );
                    Ok(())
                })
                .with_context(|| format!("failed reading {}", file.display()))?;
                index.catalog.finish_file();
            }
            drop(task_tx);

            for (ordinal, minmers) in result_rx.iter() {
                pending.insert(ordinal, minmers);
                Self::flush_in_order(
                    &mut pending,
                    &mut next_merge,
                    &mut index.positions,
                    &mut index.minmers,
                    &mut index.hash_freq,
                );
            }
            assert!(pending.is_empty(), "sketcher output lost");
            Ok(())
        })?;

        eprintln!(
            "[wfalign::sketch] sequences processed = {}, skipped = {}",
            index.catalog.len(),
            skipped
        );
        eprintln!(
            "[wfalign::sketch] unique minmer hashes before pruning = {}",
            index.positions.len()
        );
        eprintln!(
            "[wfalign::sketch] total minmer windows before pruning = {}",
            index.minmers.len()
        );

        if index.minmers.is_empty() {
            bail!(
                "reference sketch is empty: no sequence reached the segment length {}",
                index.params.seg_length
            );
        }
        Ok(index)
    }

    fn flush_in_order(
        pending: &mut HashMap<usize, Vec<MinmerInfo>>,
        next_merge: &mut usize,
        positions: &mut HashMap<u64, Vec<IntervalPoint>>,
        minmers: &mut Vec<MinmerInfo>,
        hash_freq: &mut HashMap<u64, u64>,
    ) {
        while let Some(contig_minmers) = pending.remove(next_merge) {
            *next_merge += 1;
            for mi in contig_minmers {
                *hash_freq.entry(mi.hash).or_insert(0) += 1;
                let points = positions.entry(mi.hash).or_default();
                match points.last_mut() {
                    // adjacent run on the same contig: extend in place
                    Some(last) if last.seq_id == mi.seq_id && last.pos == mi.window_start => {
                        last.pos = mi.window_end;
                    }
                    _ => {
                        points.push(IntervalPoint {
                            pos: mi.window_start,
                            hash: mi.hash,
                            seq_id: mi.seq_id,
                            side: Side::Open,
                        });
                        points.push(IntervalPoint {
                            pos: mi.window_end,
                            hash: mi.hash,
                            seq_id: mi.seq_id,
                            side: Side::Close,
                        });
                    }
                }
                minmers.push(mi);
            }
        }
    }

    /// Scan reference files for contig metadata only, applying the
    /// same short-sequence skip rule as [`build`](Self::build). Used
    /// when the sketch itself is loaded from a persisted index.
    pub fn collect_metadata(files: &[PathBuf], params: &SketchParams) -> Result<SequenceIndex> {
        let mut catalog = SequenceIndex::new();
        for file in files {
            for_each_fasta_record(file, |name, seq| {
                if seq.len() >= params.seg_length {
                    catalog.add_contig(name, seq.len() as u64);
                }
                Ok(())
            })
            .with_context(|| format!("failed reading {}", file.display()))?;
            catalog.finish_file();
        }
        Ok(catalog)
    }

    /// Histogram interval counts, pick the frequency threshold, and
    /// drop frequent seeds from the minmer table. The positions map is
    /// retained; [`lookup`](Self::lookup) filters frequent hashes.
    pub fn prune(&mut self) {
        self.freq_hist.clear();
        for points in self.positions.values() {
            let pairs = (points.len() / 2) as u64;
            *self.freq_hist.entry(pairs).or_insert(0) += 1;
        }

        let total_unique = self.positions.len() as u64;
        let target =
            ((total_unique as f64) * self.params.kmer_pct_threshold / 100.0).floor() as u64;

        self.freq_threshold = None;
        if target > 0 {
            let mut sum: u64 = 0;
            for (&count, &n_hashes) in self.freq_hist.iter().rev() {
                sum += n_hashes;
                if sum >= target {
                    self.freq_threshold = Some(count);
                    break;
                }
            }
        }

        match self.freq_threshold {
            Some(threshold) => {
                for (&hash, points) in &self.positions {
                    if (points.len() / 2) as u64 >= threshold {
                        self.frequent_seeds.insert(hash);
                    }
                }
                self.minmers
                    .retain(|mi| !self.frequent_seeds.contains(&mi.hash));
                eprintln!(
                    "[wfalign::sketch] with threshold {}%, ignoring {} hashes with >= {} intervals during mapping",
                    self.params.kmer_pct_threshold,
                    self.frequent_seeds.len(),
                    threshold
                );
            }
            None => {
                eprintln!(
                    "[wfalign::sketch] with threshold {}%, considering all minmers during mapping",
                    self.params.kmer_pct_threshold
                );
            }
        }

        self.hash_freq.clear();
        eprintln!(
            "[wfalign::sketch] unique minmer hashes after pruning = {}",
            self.positions.len() - self.frequent_seeds.len()
        );
        eprintln!(
            "[wfalign::sketch] total minmer windows after pruning = {}",
            self.minmers.len()
        );
    }

    /// Interval points of a hash, unless it was pruned as frequent
    pub fn lookup(&self, hash: u64) -> Option<&[IntervalPoint]> {
        if self.frequent_seeds.contains(&hash) {
            return None;
        }
        self.positions.get(&hash).map(|v| v.as_slice())
    }

    pub fn is_frequent(&self, hash: u64) -> bool {
        self.frequent_seeds.contains(&hash)
    }

    pub fn is_empty(&self) -> bool {
        self.minmers.is_empty()
    }
}
