//! Parsing of upstream mapping rows.
//!
//! The mapping stage emits PAF-like whitespace-separated rows; the
//! aligner consumes one [`MappingRecord`] per row. Only the boundary
//! fields and the estimated-identity tag are read here, the rest of
//! the row travels untouched alongside the record.

use crate::minmer::Strand;
use anyhow::{bail, Context, Result};

/// Identity assumed when the `id:f:` tag is missing or unparseable.
/// Assuming too low drives the wavefront heuristics into needlessly
/// wide bands.
pub const DEFAULT_ESTIMATED_IDENTITY: f32 = 85.0;

/// Boundary information of one upstream mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRecord {
    pub query_name: String,
    pub query_start: i64,
    pub query_end: i64,
    pub strand: Strand,
    pub target_name: String,
    pub target_start: i64,
    pub target_end: i64,
    /// Estimated nucleotide identity of the mapping, in percent
    pub estimated_identity: f32,
}

impl MappingRecord {
    /// Parse one mapping row. Rows with fewer than 9 fields are a
    /// fatal input error; a missing or non-numeric identity tag falls
    /// back to [`DEFAULT_ESTIMATED_IDENTITY`].
    pub fn parse(line: &str) -> Result<MappingRecord> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 9 {
            bail!(
                "mapping row has {} fields, expected at least 9: {}",
                tokens.len(),
                line
            );
        }

        let estimated_identity = tokens
            .get(12)
            .and_then(|tag| tag.rsplit(':').next())
            .and_then(|value| value.parse::<f32>().ok())
            .unwrap_or(DEFAULT_ESTIMATED_IDENTITY);

        Ok(MappingRecord {
            query_name: tokens[0].to_string(),
            query_start: parse_coord(tokens[2], "query start", line)?,
            query_end: parse_coord(tokens[3], "query end", line)?,
            strand: if tokens[4] == "+" {
                Strand::Fwd
            } else {
                Strand::Rev
            },
            target_name: tokens[5].to_string(),
            target_start: parse_coord(tokens[7], "target start", line)?,
            target_end: parse_coord(tokens[8], "target end", line)?,
            estimated_identity,
        })
    }

    pub fn query_span(&self) -> u64 {
        (self.query_end - self.query_start).max(0) as u64
    }
}

fn parse_coord(token: &str, what: &str, line: &str) -> Result<i64> {
    token
        .parse::<i64>()
        .with_context(|| format!("invalid {what} '{token}' in mapping row: {line}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = "q0 10000 0 100 + r0 2000 50 150 60 100 80 id:f:95.0";

    #[test]
    fn parses_full_row() {
        let rec = MappingRecord::parse(ROW).unwrap();
        assert_eq!(rec.query_name, "q0");
        assert_eq!(rec.query_start, 0);
        assert_eq!(rec.query_end, 100);
        assert_eq!(rec.strand, Strand::Fwd);
        assert_eq!(rec.target_name, "r0");
        assert_eq!(rec.target_start, 50);
        assert_eq!(rec.target_end, 150);
        assert!((rec.estimated_identity - 95.0).abs() < 1e-6);
        assert_eq!(rec.query_span(), 100);
    }

    #[test]
    fn reverse_strand() {
        let row = ROW.replace(" + ", " - ");
        let rec = MappingRecord::parse(&row).unwrap();
        assert_eq!(rec.strand, Strand::Rev);
    }

    #[test]
    fn missing_identity_tag_uses_default() {
        // only 12 fields: no id tag at all
        let rec = MappingRecord::parse("q0 10000 0 100 + r0 2000 50 150 60 100 80").unwrap();
        assert_eq!(rec.estimated_identity, DEFAULT_ESTIMATED_IDENTITY);
    }

    #[test]
    fn non_numeric_identity_tag_uses_default() {
        let rec =
            MappingRecord::parse("q0 10000 0 100 + r0 2000 50 150 60 100 80 tp:A:P").unwrap();
        assert_eq!(rec.estimated_identity, DEFAULT_ESTIMATED_IDENTITY);
    }

    #[test]
    fn too_few_fields_is_fatal() {
        let err = MappingRecord::parse("q0 10000 0 100 + r0 2000 50").unwrap_err();
        assert!(format!("{err}").contains("at least 9"));
    }

    #[test]
    fn tab_separated_rows_parse_too() {
        let row = ROW.replace(' ', "\t");
        assert!(MappingRecord::parse(&row).is_ok());
    }
}
