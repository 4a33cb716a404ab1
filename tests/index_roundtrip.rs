/// Persistence tests: round-trip equality and parameter checking
mod common;

use common::{generate_dna, write_fasta};
use wfalign::index_file::{read_index, write_index};
use wfalign::sketch::{SketchIndex, SketchParams};

fn params() -> SketchParams {
    SketchParams {
        kmer_size: 19,
        seg_length: 500,
        sketch_size: 7,
        alphabet_size: 4,
        kmer_pct_threshold: 0.001,
    }
}

#[test]
fn round_trip_preserves_index() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(
        &fasta,
        &[
            ("c0", &generate_dna(1600, 21)),
            ("c1", &generate_dna(1400, 22)),
        ],
    );

    let mut index = SketchIndex::build(&[fasta.clone()], params(), 2).unwrap();
    index.prune();

    let index_path = dir.path().join("ref.wfi");
    write_index(&index, &index_path).unwrap();

    let catalog = SketchIndex::collect_metadata(&[fasta.clone()], &params()).unwrap();
    let loaded = read_index(&index_path, &params(), catalog).unwrap();

    assert_eq!(loaded.minmers, index.minmers);
    assert_eq!(loaded.positions, index.positions);
    assert_eq!(loaded.frequent_seeds, index.frequent_seeds);
    assert_eq!(loaded.catalog.contigs(), index.catalog.contigs());
    assert_eq!(loaded.catalog.seqs_by_file(), index.catalog.seqs_by_file());
}

#[test]
fn written_files_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(&fasta, &[("c0", &generate_dna(1600, 33))]);

    let mut index = SketchIndex::build(&[fasta.clone()], params(), 2).unwrap();
    index.prune();

    let a = dir.path().join("a.wfi");
    let b = dir.path().join("b.wfi");
    write_index(&index, &a).unwrap();
    write_index(&index, &b).unwrap();
    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[test]
fn kmer_size_mismatch_is_fatal_and_named() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(&fasta, &[("c0", &generate_dna(1600, 44))]);

    let mut index = SketchIndex::build(&[fasta.clone()], params(), 2).unwrap();
    index.prune();
    let index_path = dir.path().join("ref.wfi");
    write_index(&index, &index_path).unwrap();

    let mut other = params();
    other.kmer_size = 17;
    let catalog = SketchIndex::collect_metadata(&[fasta.clone()], &other).unwrap();
    let err = read_index(&index_path, &other, catalog).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("kmer_size"), "diagnostic was: {msg}");
    assert!(msg.contains("19") && msg.contains("17"), "diagnostic was: {msg}");
}

#[test]
fn seg_length_mismatch_is_fatal_and_named() {
    let dir = tempfile::tempdir().unwrap();
    let fasta = dir.path().join("ref.fa");
    write_fasta(&fasta, &[("c0", &generate_dna(1600, 55))]);

    let mut index = SketchIndex::build(&[fasta.clone()], params(), 2).unwrap();
    index.prune();
    let index_path = dir.path().join("ref.wfi");
    write_index(&index, &index_path).unwrap();

    let mut other = params();
    other.seg_length = 400;
    let catalog = SketchIndex::collect_metadata(&[fasta.clone()], &other).unwrap();
    let err = read_index(&index_path, &other, catalog).unwrap_err();
    assert!(format!("{err}").contains("seg_length"));
}

#[test]
fn garbage_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.wfi");
    std::fs::write(&bogus, b"this is not an index file at all").unwrap();
    let err = read_index(&bogus, &params(), Default::default()).unwrap_err();
    assert!(format!("{err}").contains("magic"));
}
