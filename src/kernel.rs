//! The wavefront alignment seam.
//!
//! The pipeline treats base-level alignment as a black box: a
//! [`WavefrontKernel`] takes one prepared [`AlignmentJob`] and returns
//! output strings. The production kernel wraps WFA2's affine
//! wavefronts; its aligner object keeps internal workspaces and is not
//! shareable, so every worker owns its own boxed kernel, exactly like
//! the FASTA handles.

use crate::minmer::Strand;
use libwfa2::affine_wavefront::AffineWavefronts;

/// Scoring and heuristic parameters handed through to the kernel
#[derive(Debug, Clone)]
pub struct KernelParams {
    pub mismatch: i32,
    pub gap_open1: i32,
    pub gap_ext1: i32,
    pub gap_open2: i32,
    pub gap_ext2: i32,
    pub patching_mismatch: i32,
    pub patching_gap_open1: i32,
    pub patching_gap_ext1: i32,
    pub patching_gap_open2: i32,
    pub patching_gap_ext2: i32,
    pub max_len_major: u64,
    pub max_len_minor: u64,
    pub erode_k: usize,
    pub min_wavefront_length: usize,
    pub max_distance_threshold: u64,
    pub max_mash_dist: f64,
    pub max_patching_score: u64,
    pub chain_gap: u64,
    pub sam_format: bool,
    pub emit_md_tag: bool,
    pub no_seq_in_sam: bool,
}

impl Default for KernelParams {
    fn default() -> Self {
        KernelParams {
            mismatch: 4,
            gap_open1: 6,
            gap_ext1: 1,
            gap_open2: 26,
            gap_ext2: 1,
            patching_mismatch: 3,
            patching_gap_open1: 4,
            patching_gap_ext1: 2,
            patching_gap_open2: 24,
            patching_gap_ext2: 1,
            max_len_major: 32_768,
            max_len_minor: 16_384,
            erode_k: 13,
            min_wavefront_length: 1_024,
            max_distance_threshold: 4_096,
            max_mash_dist: 1.0,
            max_patching_score: 0,
            chain_gap: 2_000,
            sam_format: false,
            emit_md_tag: false,
            no_seq_in_sam: false,
        }
    }
}

/// One prepared alignment: oriented query, padded target, and the
/// coordinates needed to report in original sequence space.
pub struct AlignmentJob<'a> {
    pub query_name: &'a str,
    /// Query slice, already reverse-complemented for REV mappings
    pub query: &'a [u8],
    pub query_total_len: u64,
    pub query_start: i64,
    pub query_end: i64,
    pub strand: Strand,
    pub target_name: &'a str,
    /// Target slice including `head_pad`/`tail_pad` flanking bases
    pub target: &'a [u8],
    pub target_total_len: u64,
    pub target_start: i64,
    pub target_end: i64,
    pub head_pad: u64,
    pub tail_pad: u64,
    pub estimated_identity: f32,
}

impl AlignmentJob<'_> {
    /// Target bases inside the mapping boundaries, pads stripped
    pub fn target_core(&self) -> &[u8] {
        &self.target[self.head_pad as usize..self.target.len() - self.tail_pad as usize]
    }
}

/// Per-record kernel output; an empty `paf` means the alignment
/// failed and the record is skipped.
#[derive(Debug, Default)]
pub struct KernelOutput {
    pub paf: String,
    pub tsv: String,
    pub patching: String,
}

pub trait WavefrontKernel: Send {
    fn align(&mut self, job: &AlignmentJob<'_>) -> KernelOutput;
}

/// Production kernel backed by WFA2 affine wavefronts
pub struct Wfa2Kernel {
    wf: AffineWavefronts,
    params: KernelParams,
    emit_tsv: bool,
}

// SAFETY: each Wfa2Kernel is created once and moved into exclusive ownership
// of a single worker thread (see pipeline.rs); the underlying C pointer is
// never accessed from more than one thread at a time.
unsafe impl Send for Wfa2Kernel {}

impl Wfa2Kernel {
    pub fn new(params: &KernelParams, emit_tsv: bool) -> Self {
        let wf = AffineWavefronts::with_penalties(
            0,
            params.mismatch,
            params.gap_open1,
            params.gap_ext1,
        );
        Wfa2Kernel {
            wf,
            params: params.clone(),
            emit_tsv,
        }
    }
}

impl WavefrontKernel for Wfa2Kernel {
    fn align(&mut self, job: &AlignmentJob<'_>) -> KernelOutput {
        let target = job.target_core();
        if job.query.is_empty() || target.is_empty() {
            return KernelOutput::default();
        }

        let _ = self.wf.align(job.query, target);
        let ops = self.wf.cigar().to_vec();
        if ops.is_empty() {
            return KernelOutput::default();
        }
        let score = self.wf.score();
        let stats = CigarStats::from_ops(&ops);

        let mut out = KernelOutput::default();
        out.paf = if self.params.sam_format {
            format_sam(job, &ops, &stats, &self.params)
        } else {
            format_paf(job, &ops, &stats)
        };
        if self.emit_tsv {
            out.tsv = format!(
                "{}\t{}\t{}\t{}\t{}\t{:.6}\n",
                job.query_name,
                job.target_name,
                score,
                job.query.len(),
                target.len(),
                stats.identity()
            );
        }
        out
    }
}

/// Counts gathered from a per-base op string (M/X/I/D)
#[derive(Debug, Default, PartialEq)]
pub struct CigarStats {
    pub matches: u64,
    pub mismatches: u64,
    pub insertions: u64,
    pub deletions: u64,
}

impl CigarStats {
    pub fn from_ops(ops: &[u8]) -> CigarStats {
        let mut stats = CigarStats::default();
        for &op in ops {
            match op {
                b'M' | b'=' => stats.matches += 1,
                b'X' => stats.mismatches += 1,
                b'I' => stats.insertions += 1,
                b'D' => stats.deletions += 1,
                _ => {}
            }
        }
        stats
    }

    /// Mutually gapped identity: matches over all aligned columns
    pub fn identity(&self) -> f64 {
        let total = self.matches + self.mismatches + self.insertions + self.deletions;
        if total == 0 {
            0.0
        } else {
            self.matches as f64 / total as f64
        }
    }

    pub fn block_len(&self) -> u64 {
        self.matches + self.mismatches + self.insertions + self.deletions
    }
}

/// Run-length-compress a per-base op string into a PAF cigar,
/// reporting matches as `=`.
pub fn compress_cigar(ops: &[u8]) -> String {
    let mut cigar = String::new();
    let mut run_op = 0u8;
    let mut run_len = 0u64;
    for &op in ops {
        let op = if op == b'M' { b'=' } else { op };
        if op == run_op {
            run_len += 1;
        } else {
            if run_len > 0 {
                cigar.push_str(&run_len.to_string());
                cigar.push(run_op as char);
            }
            run_op = op;
            run_len = 1;
        }
    }
    if run_len > 0 {
        cigar.push_str(&run_len.to_string());
        cigar.push(run_op as char);
    }
    cigar
}

fn format_paf(job: &AlignmentJob<'_>, ops: &[u8], stats: &CigarStats) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tgi:f:{:.6}\tcg:Z:{}\n",
        job.query_name,
        job.query_total_len,
        job.query_start,
        job.query_end,
        job.strand.symbol(),
        job.target_name,
        job.target_total_len,
        job.target_start,
        job.target_end,
        stats.matches,
        stats.block_len(),
        60,
        stats.identity(),
        compress_cigar(ops)
    )
}

fn format_sam(
    job: &AlignmentJob<'_>,
    ops: &[u8],
    stats: &CigarStats,
    params: &KernelParams,
) -> String {
    let flag = if job.strand == Strand::Rev { 16 } else { 0 };
    let seq = if params.no_seq_in_sam {
        "*".to_string()
    } else {
        String::from_utf8_lossy(job.query).into_owned()
    };
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t*",
        job.query_name,
        flag,
        job.target_name,
        job.target_start + 1,
        60,
        compress_cigar(ops),
        seq
    );
    line.push_str(&format!("\tgi:f:{:.6}", stats.identity()));
    if params.emit_md_tag {
        line.push_str("\tMD:Z:");
        line.push_str(&md_tag(ops, job.target_core()));
    }
    line.push('\n');
    line
}

/// MD tag over a per-base op string and the reference slice it was
/// aligned to.
fn md_tag(ops: &[u8], target: &[u8]) -> String {
    let mut md = String::new();
    let mut match_run = 0u64;
    let mut t = 0usize;
    let mut i = 0usize;
    while i < ops.len() {
        match ops[i] {
            b'M' | b'=' => {
                match_run += 1;
                t += 1;
                i += 1;
            }
            b'X' => {
                md.push_str(&match_run.to_string());
                match_run = 0;
                md.push(target.get(t).copied().unwrap_or(b'N') as char);
                t += 1;
                i += 1;
            }
            b'D' => {
                md.push_str(&match_run.to_string());
                match_run = 0;
                md.push('^');
                while i < ops.len() && ops[i] == b'D' {
                    md.push(target.get(t).copied().unwrap_or(b'N') as char);
                    t += 1;
                    i += 1;
                }
            }
            // insertions consume query only
            _ => {
                i += 1;
            }
        }
    }
    md.push_str(&match_run.to_string());
    md
}
