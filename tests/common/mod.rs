/// Shared helpers for integration tests
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Generate a stable random DNA sequence with a fixed seed
pub fn generate_dna(length: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases = ['A', 'C', 'G', 'T'];
    (0..length).map(|_| bases[rng.gen_range(0..4)]).collect()
}

/// Write a FASTA file with 60-column wrapped sequences
pub fn write_fasta(path: &Path, records: &[(&str, &str)]) {
    let mut f = File::create(path).expect("failed to create FASTA");
    for (name, seq) in records {
        writeln!(f, ">{name}").unwrap();
        for chunk in seq.as_bytes().chunks(60) {
            f.write_all(chunk).unwrap();
            writeln!(f).unwrap();
        }
    }
}

/// Write mapping rows to a file, one per line
#[allow(dead_code)]
pub fn write_mappings(path: &Path, rows: &[String]) {
    let mut f = File::create(path).expect("failed to create mapping file");
    for row in rows {
        writeln!(f, "{row}").unwrap();
    }
}

/// Read an output file into its lines
#[allow(dead_code)]
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .expect("failed to read output")
        .lines()
        .map(|l| l.to_string())
        .collect()
}
