//! Binary persistence of the sketch index.
//!
//! Little-endian, fixed-width fields behind an 8-byte magic and a u32
//! format version. The sketch parameters are stored first and checked
//! field by field on load; a mismatch is fatal since an index built
//! with different parameters is silently wrong for mapping. Contig
//! metadata is not stored: it is rebuilt by a metadata-only scan of
//! the same reference files.

use crate::minmer::{MinmerInfo, Strand};
use crate::sequence_index::SequenceIndex;
use crate::sketch::{IntervalPoint, Side, SketchIndex, SketchParams};
use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const INDEX_MAGIC: &[u8; 8] = b"WFALNIDX";
const INDEX_VERSION: u32 = 1;

pub fn write_index(index: &SketchIndex, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create index file {}", path.display()))?;
    let mut w = BufWriter::new(file);

    w.write_all(INDEX_MAGIC)?;
    w.write_u32::<LittleEndian>(INDEX_VERSION)?;

    w.write_u64::<LittleEndian>(index.params.seg_length as u64)?;
    w.write_u64::<LittleEndian>(index.params.sketch_size as u64)?;
    w.write_u64::<LittleEndian>(index.params.kmer_size as u64)?;

    w.write_u64::<LittleEndian>(index.minmers.len() as u64)?;
    for mi in &index.minmers {
        write_minmer(&mut w, mi)?;
    }

    // sorted keys make identical indexes byte-identical on disk
    let mut hashes: Vec<u64> = index.positions.keys().copied().collect();
    hashes.sort_unstable();
    w.write_u64::<LittleEndian>(hashes.len() as u64)?;
    for hash in hashes {
        let points = &index.positions[&hash];
        w.write_u64::<LittleEndian>(hash)?;
        w.write_u64::<LittleEndian>(points.len() as u64)?;
        for p in points {
            w.write_i64::<LittleEndian>(p.pos)?;
            w.write_u64::<LittleEndian>(p.hash)?;
            w.write_u32::<LittleEndian>(p.seq_id)?;
            w.write_u8(match p.side {
                Side::Open => 0,
                Side::Close => 1,
            })?;
        }
    }

    let mut frequent: Vec<u64> = index.frequent_seeds.iter().copied().collect();
    frequent.sort_unstable();
    w.write_u64::<LittleEndian>(frequent.len() as u64)?;
    for hash in frequent {
        w.write_u64::<LittleEndian>(hash)?;
    }

    w.flush()
        .with_context(|| format!("failed to flush index file {}", path.display()))?;
    Ok(())
}

/// Load a persisted index, verifying format and parameters. `catalog`
/// comes from a metadata-only scan of the same reference files.
pub fn read_index(
    path: &Path,
    params: &SketchParams,
    catalog: SequenceIndex,
) -> Result<SketchIndex> {
    let file = File::open(path)
        .with_context(|| format!("failed to open index file {}", path.display()))?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)
        .with_context(|| format!("truncated index file {}", path.display()))?;
    if &magic != INDEX_MAGIC {
        bail!("{} is not a wfalign index (bad magic)", path.display());
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != INDEX_VERSION {
        bail!(
            "unsupported index version {} in {} (this build reads version {})",
            version,
            path.display(),
            INDEX_VERSION
        );
    }

    let seg_length = r.read_u64::<LittleEndian>()?;
    let sketch_size = r.read_u64::<LittleEndian>()?;
    let kmer_size = r.read_u64::<LittleEndian>()?;
    check_param(path, "seg_length", seg_length, params.seg_length as u64)?;
    check_param(path, "sketch_size", sketch_size, params.sketch_size as u64)?;
    check_param(path, "kmer_size", kmer_size, params.kmer_size as u64)?;

    let mut index = SketchIndex::empty(params.clone());
    index.catalog = catalog;

    let n_minmers = r.read_u64::<LittleEndian>()?;
    index.minmers.reserve(n_minmers as usize);
    for _ in 0..n_minmers {
        index.minmers.push(read_minmer(&mut r, path)?);
    }

    let n_keys = r.read_u64::<LittleEndian>()?;
    index.positions.reserve(n_keys as usize);
    for _ in 0..n_keys {
        let hash = r.read_u64::<LittleEndian>()?;
        let n_points = r.read_u64::<LittleEndian>()?;
        let mut points = Vec::with_capacity(n_points as usize);
        for _ in 0..n_points {
            let pos = r.read_i64::<LittleEndian>()?;
            let point_hash = r.read_u64::<LittleEndian>()?;
            let seq_id = r.read_u32::<LittleEndian>()?;
            let side = match r.read_u8()? {
                0 => Side::Open,
                1 => Side::Close,
                other => bail!(
                    "corrupt index {}: invalid interval side {}",
                    path.display(),
                    other
                ),
            };
            points.push(IntervalPoint {
                pos,
                hash: point_hash,
                seq_id,
                side,
            });
        }
        index.positions.insert(hash, points);
    }

    let n_frequent = r.read_u64::<LittleEndian>()?;
    index.frequent_seeds.reserve(n_frequent as usize);
    for _ in 0..n_frequent {
        index.frequent_seeds.insert(r.read_u64::<LittleEndian>()?);
    }

    Ok(index)
}

fn check_param(path: &Path, name: &str, stored: u64, requested: u64) -> Result<()> {
    if stored != requested {
        bail!(
            "index parameter mismatch in {}: {} is {} in the index but {} was requested",
            path.display(),
            name,
            stored,
            requested
        );
    }
    Ok(())
}

fn write_minmer<W: Write>(w: &mut W, mi: &MinmerInfo) -> Result<()> {
    w.write_u64::<LittleEndian>(mi.hash)?;
    w.write_i64::<LittleEndian>(mi.window_start)?;
    w.write_i64::<LittleEndian>(mi.window_end)?;
    w.write_u32::<LittleEndian>(mi.seq_id)?;
    w.write_u8(match mi.strand {
        Strand::Fwd => 0,
        Strand::Rev => 1,
    })?;
    Ok(())
}

fn read_minmer<R: Read>(r: &mut R, path: &Path) -> Result<MinmerInfo> {
    let hash = r.read_u64::<LittleEndian>()?;
    let window_start = r.read_i64::<LittleEndian>()?;
    let window_end = r.read_i64::<LittleEndian>()?;
    let seq_id = r.read_u32::<LittleEndian>()?;
    let strand = match r.read_u8()? {
        0 => Strand::Fwd,
        1 => Strand::Rev,
        other => bail!("corrupt index {}: invalid strand {}", path.display(), other),
    };
    Ok(MinmerInfo {
        hash,
        window_start,
        window_end,
        seq_id,
        strand,
    })
}
