use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;

use wfalign::index_file;
use wfalign::kernel::{KernelParams, WavefrontKernel, Wfa2Kernel};
use wfalign::mapping::MappingRecord;
use wfalign::pipeline::{AlignmentPipeline, PipelineConfig};
use wfalign::progress::{BarProgress, NoProgress, ProgressSink};
use wfalign::sequence_store::SequenceStore;
use wfalign::sketch::{SketchIndex, SketchParams};

/// wfalign - whole-genome alignment from sketch-based mappings
///
/// Builds (or loads) a minmer sketch index over the target genome,
/// then turns upstream mapping rows into base-level wavefront
/// alignments.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Target (reference) FASTA
    #[clap(value_name = "TARGET")]
    target: PathBuf,

    /// Query FASTA (required for alignment, not for indexing)
    #[clap(value_name = "QUERY")]
    query: Option<PathBuf>,

    /// Upstream mapping file (PAF-like) to align
    #[clap(short = 'i', long = "mappings")]
    mappings: Option<PathBuf>,

    /// Output PAF/SAM file (stdout if not specified)
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Number of worker threads (also FASTA handle count)
    #[clap(short = 't', long = "threads", default_value = "8")]
    threads: usize,

    /// Segment (window) length for sketching
    #[clap(short = 's', long = "seg-length", default_value = "5000")]
    seg_length: usize,

    /// K-mer size
    #[clap(short = 'k', long = "kmer-size", default_value = "19")]
    kmer_size: usize,

    /// Sketch size: minmers kept per window
    #[clap(long = "sketch-size", default_value = "25")]
    sketch_size: usize,

    /// Alphabet size (DNA only)
    #[clap(long = "alphabet-size", default_value = "4", hide = true)]
    alphabet_size: usize,

    /// Percentage of most-frequent unique hashes to prune
    #[clap(long = "kmer-pct-threshold", default_value = "0.001")]
    kmer_pct_threshold: f64,

    /// Persisted sketch index; loaded when present, else written after build
    #[clap(long = "index")]
    index: Option<PathBuf>,

    /// Rebuild the index even when the file exists
    #[clap(long = "overwrite-index")]
    overwrite_index: bool,

    /// Build and write the index, then exit
    #[clap(long = "create-index-only", requires = "index")]
    create_index_only: bool,

    /// WFA mismatch penalty
    #[clap(long = "wfa-mismatch", default_value = "4")]
    wfa_mismatch: i32,

    /// WFA gap-open penalty (first piece)
    #[clap(long = "wfa-gap-open1", default_value = "6")]
    wfa_gap_open1: i32,

    /// WFA gap-extension penalty (first piece)
    #[clap(long = "wfa-gap-ext1", default_value = "1")]
    wfa_gap_ext1: i32,

    /// WFA gap-open penalty (second piece)
    #[clap(long = "wfa-gap-open2", default_value = "26")]
    wfa_gap_open2: i32,

    /// WFA gap-extension penalty (second piece)
    #[clap(long = "wfa-gap-ext2", default_value = "1")]
    wfa_gap_ext2: i32,

    /// Patching WFA mismatch penalty
    #[clap(long = "patching-mismatch", default_value = "3")]
    patching_mismatch: i32,

    /// Patching WFA gap-open penalty (first piece)
    #[clap(long = "patching-gap-open1", default_value = "4")]
    patching_gap_open1: i32,

    /// Patching WFA gap-extension penalty (first piece)
    #[clap(long = "patching-gap-ext1", default_value = "2")]
    patching_gap_ext1: i32,

    /// Patching WFA gap-open penalty (second piece)
    #[clap(long = "patching-gap-open2", default_value = "24")]
    patching_gap_open2: i32,

    /// Patching WFA gap-extension penalty (second piece)
    #[clap(long = "patching-gap-ext2", default_value = "1")]
    patching_gap_ext2: i32,

    /// Maximum major-axis patching length
    #[clap(long = "max-len-major", default_value = "32768")]
    max_len_major: u64,

    /// Maximum minor-axis patching length; also the flank padding
    #[clap(long = "max-len-minor", default_value = "16384")]
    max_len_minor: u64,

    /// Erosion length for alignment boundaries
    #[clap(long = "erode-k", default_value = "13")]
    erode_k: usize,

    /// Minimum wavefront length before pruning applies
    #[clap(long = "min-wavefront-length", default_value = "1024")]
    min_wavefront_length: usize,

    /// Maximum wavefront distance threshold
    #[clap(long = "max-distance-threshold", default_value = "4096")]
    max_distance_threshold: u64,

    /// Maximum mash distance handed to the kernel
    #[clap(long = "max-mash-dist", default_value = "1.0")]
    max_mash_dist: f64,

    /// Maximum patching score (0 = kernel default)
    #[clap(long = "max-patching-score", default_value = "0")]
    max_patching_score: u64,

    /// Chain gap handed to the kernel
    #[clap(long = "chain-gap", default_value = "2000")]
    chain_gap: u64,

    /// Emit SAM instead of PAF
    #[clap(long = "sam-format")]
    sam_format: bool,

    /// Emit the MD tag in SAM output
    #[clap(long = "emit-md-tag")]
    emit_md_tag: bool,

    /// Omit sequences from SAM output
    #[clap(long = "no-seq-in-sam")]
    no_seq_in_sam: bool,

    /// Write one per-alignment TSV as <prefix><N>.tsv
    #[clap(long = "tsv-prefix")]
    tsv_prefix: Option<String>,

    /// Append patching info rows to this TSV file
    #[clap(long = "patching-tsv")]
    patching_tsv: Option<PathBuf>,

    /// Quiet mode (no progress output)
    #[clap(long = "quiet")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let sketch_params = SketchParams {
        kmer_size: args.kmer_size,
        seg_length: args.seg_length,
        sketch_size: args.sketch_size,
        alphabet_size: args.alphabet_size,
        kmer_pct_threshold: args.kmer_pct_threshold,
    };
    sketch_params.validate()?;

    let target_files = vec![args.target.clone()];

    // index lifecycle: load when a persisted index exists and we were
    // not told to rebuild, else build, prune, and optionally persist
    let load_existing = args
        .index
        .as_ref()
        .map(|p| p.exists() && !args.overwrite_index)
        .unwrap_or(false);

    let index = if load_existing {
        let path = args.index.as_ref().unwrap();
        eprintln!("[wfalign::sketch] loading index from {}", path.display());
        let catalog = SketchIndex::collect_metadata(&target_files, &sketch_params)?;
        let index = index_file::read_index(path, &sketch_params, catalog)?;
        if index.is_empty() {
            bail!("index {} holds no minmers", path.display());
        }
        index
    } else {
        let mut index = SketchIndex::build(&target_files, sketch_params.clone(), args.threads)?;
        index.prune();
        if let Some(path) = &args.index {
            index_file::write_index(&index, path)?;
            eprintln!("[wfalign::sketch] wrote index to {}", path.display());
        }
        index
    };
    eprintln!(
        "[wfalign::sketch] ready: {} contigs, {} minmer windows",
        index.catalog.len(),
        index.minmers.len()
    );

    if args.create_index_only {
        eprintln!("[wfalign::sketch] index created successfully, exiting");
        return Ok(());
    }

    let mappings = match &args.mappings {
        Some(path) => path.clone(),
        None => {
            eprintln!("[wfalign] no mapping file given (-i); nothing to align");
            return Ok(());
        }
    };
    let query = match &args.query {
        Some(path) => path.clone(),
        None => bail!("alignment needs a query FASTA as the second positional argument"),
    };

    let kernel_params = KernelParams {
        mismatch: args.wfa_mismatch,
        gap_open1: args.wfa_gap_open1,
        gap_ext1: args.wfa_gap_ext1,
        gap_open2: args.wfa_gap_open2,
        gap_ext2: args.wfa_gap_ext2,
        patching_mismatch: args.patching_mismatch,
        patching_gap_open1: args.patching_gap_open1,
        patching_gap_ext1: args.patching_gap_ext1,
        patching_gap_open2: args.patching_gap_open2,
        patching_gap_ext2: args.patching_gap_ext2,
        max_len_major: args.max_len_major,
        max_len_minor: args.max_len_minor,
        erode_k: args.erode_k,
        min_wavefront_length: args.min_wavefront_length,
        max_distance_threshold: args.max_distance_threshold,
        max_mash_dist: args.max_mash_dist,
        max_patching_score: args.max_patching_score,
        chain_gap: args.chain_gap,
        sam_format: args.sam_format,
        emit_md_tag: args.emit_md_tag,
        no_seq_in_sam: args.no_seq_in_sam,
    };

    let target_store = SequenceStore::open(&args.target, args.threads)?;
    let query_store = SequenceStore::open(&query, args.threads)?;
    let kernels: Vec<Box<dyn WavefrontKernel>> = (0..args.threads)
        .map(|_| {
            Box::new(Wfa2Kernel::new(&kernel_params, args.tsv_prefix.is_some()))
                as Box<dyn WavefrontKernel>
        })
        .collect();

    let config = PipelineConfig {
        threads: args.threads,
        mapping_path: mappings.clone(),
        paf_output: args.output.clone(),
        tsv_prefix: args.tsv_prefix.clone(),
        patching_tsv: args.patching_tsv.clone(),
        max_len_minor: args.max_len_minor,
    };

    let progress: Box<dyn ProgressSink> = if args.quiet {
        Box::new(NoProgress)
    } else {
        let total = total_query_bases(&mappings)?;
        Box::new(BarProgress::new(total, "[wfalign::align] aligned"))
    };

    let pipeline = AlignmentPipeline::new(config, target_store, query_store, kernels)?;
    let stats = pipeline.run(progress.as_ref())?;

    eprintln!(
        "[wfalign::align] mapped records = {}, total aligned bp = {}, emitted = {}, skipped = {}",
        stats.records, stats.aligned_bases, stats.emitted, stats.skipped
    );
    Ok(())
}

/// Pre-pass over the mapping file to size the progress bar
fn total_query_bases(path: &PathBuf) -> Result<u64> {
    let reader = wfalign::fasta_stream::open_text_reader(path)
        .with_context(|| format!("failed to open mapping file {}", path.display()))?;
    let mut total = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        total += MappingRecord::parse(&line)?.query_span();
    }
    Ok(total)
}
