//! Random-access FASTA handles for the alignment workers.
//!
//! The underlying indexed reader keeps internal cursor state and is
//! not safe to share across threads, so the store opens one
//! independent handle per worker; worker `tid` owns handle `tid` for
//! the lifetime of the pipeline and no locking is needed anywhere.

use anyhow::{anyhow, bail, Context, Result};
use bio::io::fasta;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One worker's private indexed-FASTA reader
pub struct FastaHandle {
    reader: fasta::IndexedReader<File>,
    lengths: Arc<HashMap<String, u64>>,
    path: PathBuf,
}

/// N independent handles over one FASTA file
pub struct SequenceStore {
    handles: Vec<FastaHandle>,
}

impl SequenceStore {
    /// Open `n` handles. A missing `.fai` is generated by scanning the
    /// FASTA once (requires uncompressed input with uniform line
    /// lengths).
    pub fn open(path: &Path, n: usize) -> Result<SequenceStore> {
        ensure_fai(path)?;

        let mut handles = Vec::with_capacity(n);
        let mut lengths: Option<Arc<HashMap<String, u64>>> = None;
        for _ in 0..n.max(1) {
            let reader = fasta::IndexedReader::from_file(&path)
                .map_err(|e| anyhow!("failed to open indexed FASTA {}: {}", path.display(), e))?;
            let lengths = lengths
                .get_or_insert_with(|| {
                    Arc::new(
                        reader
                            .index
                            .sequences()
                            .into_iter()
                            .map(|seq| (seq.name, seq.len))
                            .collect(),
                    )
                })
                .clone();
            handles.push(FastaHandle {
                reader,
                lengths,
                path: path.to_path_buf(),
            });
        }
        Ok(SequenceStore { handles })
    }

    /// Transfer ownership of the handles to the workers
    pub fn into_handles(self) -> Vec<FastaHandle> {
        self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl FastaHandle {
    pub fn seq_len(&self, name: &str) -> Option<u64> {
        self.lengths.get(name).copied()
    }

    /// Fetch `[start, end)` of a sequence: exactly `end - start` bytes,
    /// uppercased, with everything outside {A,C,G,T,N} replaced by N.
    pub fn fetch(&mut self, name: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        if end < start {
            bail!("invalid fetch range {}..{} on {}", start, end, name);
        }
        self.reader.fetch(name, start, end).map_err(|e| {
            anyhow!(
                "failed to locate {}:{}-{} in {}: {}",
                name,
                start,
                end,
                self.path.display(),
                e
            )
        })?;
        let mut seq = Vec::with_capacity((end - start) as usize);
        self.reader.read(&mut seq).map_err(|e| {
            anyhow!(
                "failed to read {}:{}-{} from {}: {}",
                name,
                start,
                end,
                self.path.display(),
                e
            )
        })?;
        if seq.len() as u64 != end - start {
            bail!(
                "short read for {}:{}-{}: got {} bases",
                name,
                start,
                end,
                seq.len()
            );
        }
        for b in seq.iter_mut() {
            let up = b.to_ascii_uppercase();
            *b = match up {
                b'A' | b'C' | b'G' | b'T' | b'N' => up,
                _ => b'N',
            };
        }
        Ok(seq)
    }
}

/// Generate `<fasta>.fai` when absent so plain FASTAs work without an
/// external faidx step.
fn ensure_fai(path: &Path) -> Result<()> {
    let fai_path = PathBuf::from(format!("{}.fai", path.display()));
    if fai_path.exists() {
        return Ok(());
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext == "gz" || ext == "bgz" {
        bail!(
            "random access needs an uncompressed FASTA or a pre-built {}",
            fai_path.display()
        );
    }
    eprintln!(
        "[wfalign::store] indexing {} -> {}",
        path.display(),
        fai_path.display()
    );

    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    struct FaiRecord {
        name: String,
        len: u64,
        offset: u64,
        line_bases: u64,
        line_bytes: u64,
    }

    let mut records: Vec<FaiRecord> = Vec::new();
    let mut offset: u64 = 0;
    let mut prev_was_short = false;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        let bytes = n as u64;
        let content = line.trim_end_matches(['\n', '\r']);
        if let Some(header) = content.strip_prefix('>') {
            let name = header.split_whitespace().next().unwrap_or("").to_string();
            if name.is_empty() {
                bail!("unnamed FASTA record in {}", path.display());
            }
            records.push(FaiRecord {
                name,
                len: 0,
                offset: offset + bytes,
                line_bases: 0,
                line_bytes: 0,
            });
            prev_was_short = false;
        } else if !content.is_empty() {
            let rec = records
                .last_mut()
                .ok_or_else(|| anyhow!("sequence data before first header in {}", path.display()))?;
            let bases = content.len() as u64;
            if rec.line_bases == 0 {
                rec.line_bases = bases;
                rec.line_bytes = bytes;
            } else if bases > rec.line_bases || prev_was_short {
                bail!(
                    "cannot index {}: sequence lines of {} are not uniform; run `samtools faidx` instead",
                    path.display(),
                    rec.name
                );
            }
            prev_was_short = bases < rec.line_bases;
            rec.len += bases;
        }
        offset += bytes;
    }

    let mut out = File::create(&fai_path)
        .with_context(|| format!("failed to create {}", fai_path.display()))?;
    for rec in &records {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            rec.name, rec.len, rec.offset, rec.line_bases, rec.line_bytes
        )?;
    }
    Ok(())
}
