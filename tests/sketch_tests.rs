/// Integration tests for sketch index construction
mod common;

use common::{generate_dna, write_fasta};
use wfalign::sketch::{Side, SketchIndex, SketchParams};

fn default_params() -> SketchParams {
    SketchParams {
        kmer_size: 19,
        seg_length: 500,
        sketch_size: 7,
        alphabet_size: 4,
        kmer_pct_threshold: 0.001,
    }
}

#[test]
fn single_contig_reference_sketch() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    let seq = generate_dna(2000, 42);
    write_fasta(&fasta, &[("ref0", &seq)]);

    let index = SketchIndex::build(&[fasta.clone()], default_params(), 4).unwrap();

    assert_eq!(index.catalog.len(), 1);
    assert_eq!(index.catalog.contigs()[0].name, "ref0");
    assert_eq!(index.catalog.contigs()[0].len, 2000);
    assert_eq!(index.catalog.seqs_by_file(), &[1]);

    // a 2 kb random contig at s=7, w=500 yields a few dozen to a few
    // hundred minmer windows
    let count = index.minmers.len();
    assert!(
        (30..=400).contains(&count),
        "unexpected minmer count {count}"
    );

    // every window lies inside the contig's window-start range
    let last_window = (2000 - 500) as i64;
    for mi in &index.minmers {
        assert!(mi.window_start >= 0);
        assert!(mi.window_start < mi.window_end);
        assert!(mi.window_end <= last_window + 1);
        assert_eq!(mi.seq_id, 0);
    }
}

#[test]
fn interval_points_alternate_and_adjacent_runs_are_merged() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    // two contigs so cross-contig boundaries are exercised too
    write_fasta(
        &fasta,
        &[
            ("c0", &generate_dna(1500, 7)),
            ("c1", &generate_dna(1200, 8)),
        ],
    );

    let index = SketchIndex::build(&[fasta.clone()], default_params(), 3).unwrap();

    for points in index.positions.values() {
        assert_eq!(points.len() % 2, 0);
        for (i, p) in points.iter().enumerate() {
            let expected = if i % 2 == 0 { Side::Open } else { Side::Close };
            assert_eq!(p.side, expected, "points must alternate OPEN/CLOSE");
        }
        // no two neighbouring intervals on the same contig touch;
        // touching runs must have been merged into one interval
        for pair in points.chunks_exact(2).collect::<Vec<_>>().windows(2) {
            let (close, open) = (pair[0][1], pair[1][0]);
            if close.seq_id == open.seq_id {
                assert!(
                    close.pos != open.pos,
                    "adjacent intervals left unmerged at pos {}",
                    close.pos
                );
            }
        }
    }
}

#[test]
fn short_contig_is_skipped_and_ids_stay_dense() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(
        &fasta,
        &[
            ("c0", &generate_dna(900, 1)),
            ("tiny", &generate_dna(100, 2)),
            ("c2", &generate_dna(800, 3)),
        ],
    );

    let index = SketchIndex::build(&[fasta.clone()], default_params(), 2).unwrap();

    assert_eq!(index.catalog.len(), 2);
    assert_eq!(index.catalog.contigs()[0].name, "c0");
    assert_eq!(index.catalog.contigs()[1].name, "c2");
    assert_eq!(index.catalog.id("c2"), Some(1));
    assert_eq!(index.catalog.id("tiny"), None);
    assert!(index.minmers.iter().any(|mi| mi.seq_id == 1));
}

#[test]
fn build_is_deterministic_across_thread_counts() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(
        &fasta,
        &[
            ("c0", &generate_dna(1500, 11)),
            ("c1", &generate_dna(1100, 12)),
            ("c2", &generate_dna(1300, 13)),
        ],
    );

    let serial = SketchIndex::build(&[fasta.clone()], default_params(), 1).unwrap();
    let parallel = SketchIndex::build(&[fasta.clone()], default_params(), 4).unwrap();

    assert_eq!(serial.minmers, parallel.minmers);
    assert_eq!(serial.positions, parallel.positions);
}

#[test]
fn pruning_removes_frequent_seeds_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    // a tandem repeat makes some hashes far more frequent than others
    let unit = generate_dna(120, 99);
    let mut seq = unit.repeat(25);
    seq.push_str(&generate_dna(1000, 100));
    write_fasta(&fasta, &[("rep", &seq)]);

    let mut index = SketchIndex::build(
        &[fasta.clone()],
        SketchParams {
            kmer_pct_threshold: 25.0,
            ..default_params()
        },
        2,
    )
    .unwrap();
    index.prune();

    let threshold = index
        .freq_threshold
        .expect("repetitive input must produce a finite threshold");
    assert!(!index.frequent_seeds.is_empty());
    for mi in &index.minmers {
        assert!(!index.frequent_seeds.contains(&mi.hash));
    }
    for &hash in &index.frequent_seeds {
        let pairs = (index.positions[&hash].len() / 2) as u64;
        assert!(pairs >= threshold);
        assert!(index.lookup(hash).is_none());
    }
}

#[test]
fn empty_reference_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(&fasta, &[("tiny", "ACGTACGT")]);
    assert!(SketchIndex::build(&[fasta], default_params(), 2).is_err());
}
