//! Streaming readers for text inputs: plain or bgzip-compressed
//! mapping files and FASTA record iteration for sketch construction.

use anyhow::{bail, Context, Result};
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Open a line-oriented input, auto-detecting bgzip by extension
pub fn open_text_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(bgzf::reader::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Iterate FASTA records of one file, invoking `f(name, seq)` per
/// record. The name is the first whitespace-delimited word of the
/// header; sequence bytes are concatenated as stored.
pub fn for_each_fasta_record<P, F>(path: P, mut f: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&str, Vec<u8>) -> Result<()>,
{
    let path = path.as_ref();
    let reader = open_text_reader(path)?;

    let mut name: Option<String> = None;
    let mut seq: Vec<u8> = Vec::new();

    for line in reader.lines() {
        let line = line.with_context(|| format!("read error in {}", path.display()))?;
        let trimmed = line.trim_end();
        if let Some(header) = trimmed.strip_prefix('>') {
            if let Some(prev) = name.take() {
                f(&prev, std::mem::take(&mut seq))?;
            }
            let word = header.split_whitespace().next().unwrap_or("");
            if word.is_empty() {
                bail!("unnamed FASTA record in {}", path.display());
            }
            name = Some(word.to_string());
        } else if !trimmed.is_empty() {
            if name.is_none() {
                bail!("sequence data before first header in {}", path.display());
            }
            seq.extend_from_slice(trimmed.as_bytes());
        }
    }
    if let Some(prev) = name {
        f(&prev, seq)?;
    }
    Ok(())
}
