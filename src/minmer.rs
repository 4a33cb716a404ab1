//! Streaming minmer extraction.
//!
//! A minmer is a k-mer whose canonical hash ranks among the
//! `sketch_size` smallest hashes of at least one window that contains
//! it. Windows are `seg_length` bases wide and advance one base at a
//! time, so a single hash is usually sketch-member for a run of
//! consecutive windows; the extractor emits one [`MinmerInfo`] per
//! maximal run. The construction is streaming: a sliding ordered
//! multiset over the current window plus an open-run table, never the
//! full k-mer table of the contig.

use std::collections::{BTreeSet, HashMap};

/// Orientation of the canonical k-mer relative to the input sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    Fwd,
    Rev,
}

impl Strand {
    pub fn symbol(self) -> char {
        match self {
            Strand::Fwd => '+',
            Strand::Rev => '-',
        }
    }
}

/// One minmer occupying a half-open run of window starts on one sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinmerInfo {
    pub hash: u64,
    /// First window start at which the hash is sketch-member
    pub window_start: i64,
    /// One past the last such window start
    pub window_end: i64,
    pub seq_id: u32,
    pub strand: Strand,
}

/// 2-bit code for an unambiguous DNA base
#[inline]
fn base_code(b: u8) -> Option<u64> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// 64-bit finalizer (splitmix64); avalanches the packed k-mer code
#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

/// Reverse complement of a nucleotide sequence; ambiguity codes map to N
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' | b'a' => b'T',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            b'T' | b't' => b'A',
            _ => b'N',
        })
        .collect()
}

/// Compute the minmer runs of one contig.
///
/// `seq_id` is stamped into every emitted record. Sequences shorter
/// than `seg_length` yield no minmers; the caller decides whether that
/// is a skip or an error. K-mers spanning an ambiguous base produce no
/// hash and cannot be sketch members.
///
/// Output is sorted by (window_start, window_end, hash), i.e. genome
/// order within the contig.
pub fn extract_minmers(
    seq: &[u8],
    seq_id: u32,
    kmer_size: usize,
    seg_length: usize,
    sketch_size: usize,
) -> Vec<MinmerInfo> {
    assert!(kmer_size >= 1 && kmer_size <= 32, "k-mer size must be in 1..=32");
    assert!(seg_length >= kmer_size, "segment length must be >= k-mer size");
    assert!(sketch_size >= 1, "sketch size must be >= 1");

    let len = seq.len();
    if len < seg_length {
        return Vec::new();
    }

    let kmers_per_window = seg_length - kmer_size + 1;
    let last_window = len - seg_length;
    let mask: u64 = if kmer_size == 32 {
        u64::MAX
    } else {
        (1u64 << (2 * kmer_size)) - 1
    };
    let rev_shift = 2 * (kmer_size - 1) as u64;

    // k-mers of the current window, ordered by (hash, position)
    let mut window_set: BTreeSet<(u64, usize, Strand)> = BTreeSet::new();
    // parallel ring of the same entries, in position order, for eviction
    let mut window_ring: std::collections::VecDeque<Option<(u64, usize, Strand)>> =
        std::collections::VecDeque::with_capacity(kmers_per_window + 1);

    // hash -> (first window start of the open run, recorded strand)
    let mut active: HashMap<u64, (i64, Strand)> = HashMap::new();
    let mut sketch: Vec<(u64, Strand)> = Vec::with_capacity(sketch_size);
    let mut out: Vec<MinmerInfo> = Vec::new();

    let mut fwd: u64 = 0;
    let mut rev: u64 = 0;
    let mut valid_run: usize = 0;

    for (i, &b) in seq.iter().enumerate() {
        match base_code(b) {
            Some(c) => {
                fwd = ((fwd << 2) | c) & mask;
                rev = (rev >> 2) | ((3 - c) << rev_shift);
                valid_run += 1;
            }
            None => {
                valid_run = 0;
            }
        }

        if i + 1 < kmer_size {
            continue;
        }
        let pos = i + 1 - kmer_size;
        let entry = if valid_run >= kmer_size {
            let hf = mix64(fwd);
            let hr = mix64(rev);
            if hr < hf {
                Some((hr, pos, Strand::Rev))
            } else {
                Some((hf, pos, Strand::Fwd))
            }
        } else {
            None
        };
        if let Some(e) = entry {
            window_set.insert(e);
        }
        window_ring.push_back(entry);
        if window_ring.len() > kmers_per_window {
            if let Some(Some(old)) = window_ring.pop_front() {
                window_set.remove(&old);
            }
        }

        if i + 1 < seg_length {
            continue;
        }
        let ws = (i + 1 - seg_length) as i64;

        // the window's sketch: its smallest `sketch_size` distinct hashes
        sketch.clear();
        let mut prev_hash = None;
        for &(h, _pos, strand) in window_set.iter() {
            if prev_hash == Some(h) {
                continue;
            }
            prev_hash = Some(h);
            sketch.push((h, strand));
            if sketch.len() == sketch_size {
                break;
            }
        }

        // hashes that fell out of the sketch close their run
        let mut closed: Vec<u64> = Vec::new();
        for (&h, &(start, strand)) in active.iter() {
            if sketch.binary_search_by_key(&h, |&(sh, _)| sh).is_err() {
                out.push(MinmerInfo {
                    hash: h,
                    window_start: start,
                    window_end: ws,
                    seq_id,
                    strand,
                });
                closed.push(h);
            }
        }
        for h in closed {
            active.remove(&h);
        }

        // hashes newly in the sketch open a run at this window
        for &(h, strand) in &sketch {
            active.entry(h).or_insert((ws, strand));
        }
    }

    // runs still open at the final window
    for (h, (start, strand)) in active {
        out.push(MinmerInfo {
            hash: h,
            window_start: start,
            window_end: last_window as i64 + 1,
            seq_id,
            strand,
        });
    }

    out.sort_unstable_by_key(|mi| (mi.window_start, mi.window_end, mi.hash));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Brute-force set of canonical k-mer hashes, for cross-checking
    fn all_canonical_hashes(seq: &[u8], k: usize) -> HashSet<u64> {
        let mut hashes = HashSet::new();
        if seq.len() < k {
            return hashes;
        }
        for start in 0..=seq.len() - k {
            let kmer = &seq[start..start + k];
            if kmer.iter().any(|&b| base_code(b).is_none()) {
                continue;
            }
            let mut fwd = 0u64;
            let mut rev = 0u64;
            for (j, &b) in kmer.iter().enumerate() {
                let c = base_code(b).unwrap();
                fwd = (fwd << 2) | c;
                rev |= (3 - c) << (2 * j as u64);
            }
            hashes.insert(mix64(fwd).min(mix64(rev)));
        }
        hashes
    }

    #[test]
    fn short_sequence_yields_nothing() {
        assert!(extract_minmers(b"ACGTACGT", 0, 5, 20, 3).is_empty());
    }

    #[test]
    fn runs_are_well_formed() {
        let seq = b"ACGTACGGTTACACGGATTACCAGATTACAGATTACAGGGCATCATCATTTACGATCGAGCT";
        let minmers = extract_minmers(seq, 7, 5, 20, 3);
        assert!(!minmers.is_empty());
        let last_window = (seq.len() - 20) as i64;
        for mi in &minmers {
            assert!(mi.window_start < mi.window_end);
            assert!(mi.window_start >= 0);
            assert!(mi.window_end <= last_window + 1);
            assert_eq!(mi.seq_id, 7);
        }
        // sorted genome order
        for pair in minmers.windows(2) {
            assert!(pair[0].window_start <= pair[1].window_start);
        }
    }

    #[test]
    fn deterministic() {
        let seq = b"TTGACCATGCATTTACGGATCAGGCATTACCAGATCGATCAGCATTACGGAT";
        let a = extract_minmers(seq, 0, 7, 25, 4);
        let b = extract_minmers(seq, 0, 7, 25, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_sketch_keeps_every_kmer() {
        // with sketch_size >= k-mers per window, every valid k-mer is a minmer
        let seq = b"ACGGATTACCAGATTACAGATTACAGGGCATCATCATT";
        let k = 5;
        let w = 16;
        let minmers = extract_minmers(seq, 0, k, w, w - k + 1);
        let emitted: HashSet<u64> = minmers.iter().map(|mi| mi.hash).collect();
        assert_eq!(emitted, all_canonical_hashes(seq, k));
    }

    #[test]
    fn canonical_under_reverse_complement() {
        let seq = b"ACGGATTACCAGATTACAGATTACAGGGCATCATCATTGGATCCATGG";
        let rc = reverse_complement(seq);
        let fwd: HashSet<u64> = extract_minmers(seq, 0, 5, 16, 12)
            .iter()
            .map(|mi| mi.hash)
            .collect();
        let bwd: HashSet<u64> = extract_minmers(&rc, 0, 5, 16, 12)
            .iter()
            .map(|mi| mi.hash)
            .collect();
        assert_eq!(fwd, bwd);
    }

    #[test]
    fn ambiguous_bases_produce_no_hash() {
        let clean = b"ACGGATTACCAGATTACAGATTACAGGG";
        let mut dirty = clean.to_vec();
        dirty[10] = b'N';
        let hashes = all_canonical_hashes(&dirty, 5);
        let minmers = extract_minmers(&dirty, 0, 5, 12, 8);
        for mi in &minmers {
            assert!(hashes.contains(&mi.hash));
        }
    }

    #[test]
    fn reverse_complement_basics() {
        assert_eq!(reverse_complement(b"ATCG"), b"CGAT".to_vec());
        assert_eq!(reverse_complement(b"AANT"), b"ANTT".to_vec());
    }
}
