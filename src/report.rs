//! RepeatMasker `.out` records.
//!
//! On disk, query coordinates are 1-based and inclusive; in memory they are
//! 0-based half-open, so a record covering bases 501..=600 of a chunk has
//! `query_start = 500`, `query_end = 600`.
//!
//! ```text
//!   463   1.3  0.6  1.7  chr1   10001  10468 (248945954) +  (CCCTAA)n  Simple_repeat       1  463    (0)  1
//!  3612  11.4 21.5  1.3  chr1   10469  11447 (248944975) C  TAR1       Satellite/telo  (399) 1712    483  2
//! ```

use std::fmt;

use crate::error::{PipelineError, Result};

/// Column header written once at the top of a report.
pub const HEADER: &str = "   SW   perc perc perc  query                    position in query     matching       repeat              position in repeat
score   div. del. ins.  sequence                 begin end    (left)   repeat         class/family      begin  end    (left)   ID

";

/// Lines of [`HEADER`] emitted by the annotation tool ahead of its rows.
pub const HEADER_LINES: usize = 3;

const NO_REPEATS: &str = "There were no repetitive sequences detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Complement,
}

impl Strand {
    fn symbol(self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Complement => "C",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub score: u32,
    pub divergence: String,
    pub deletions: String,
    pub insertions: String,
    pub query_name: String,
    pub query_start: u64,
    pub query_end: u64,
    /// Bases of the query sequence after `query_end`.
    pub query_left: u64,
    pub strand: Strand,
    pub repeat_name: String,
    pub repeat_class: String,
    /// Consensus coordinates, verbatim (complement rows use `(n)` notation).
    pub repeat_start: String,
    pub repeat_end: String,
    pub repeat_left: String,
    pub id: String,
    /// Trailing `*`: a higher-scoring match overlaps this one.
    pub overlapped: bool,
}

impl AnnotationRecord {
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 15 {
            return Err(PipelineError::Tool(format!(
                "expected at least 15 columns, got {}: '{}'",
                fields.len(),
                line.trim()
            )));
        }
        let number = |s: &str, what: &str| -> Result<u64> {
            s.trim_start_matches('(')
                .trim_end_matches(')')
                .parse()
                .map_err(|_| PipelineError::Tool(format!("bad {what} '{s}' in '{}'", line.trim())))
        };

        let begin = number(fields[5], "query begin")?;
        let end = number(fields[6], "query end")?;
        if begin == 0 || end < begin {
            return Err(PipelineError::Tool(format!(
                "invalid query span {begin}-{end} in '{}'",
                line.trim()
            )));
        }
        let strand = match fields[8] {
            "+" => Strand::Forward,
            "C" | "-" => Strand::Complement,
            other => {
                return Err(PipelineError::Tool(format!("bad strand '{other}'")));
            }
        };
        let (repeat_start, repeat_end, repeat_left) = match strand {
            Strand::Forward => (fields[11], fields[12], fields[13]),
            Strand::Complement => (fields[13], fields[12], fields[11]),
        };

        Ok(Self {
            score: number(fields[0], "score")? as u32,
            divergence: fields[1].to_string(),
            deletions: fields[2].to_string(),
            insertions: fields[3].to_string(),
            query_name: fields[4].to_string(),
            query_start: begin - 1,
            query_end: end,
            query_left: number(fields[7], "query left")?,
            strand,
            repeat_name: fields[9].to_string(),
            repeat_class: fields[10].to_string(),
            repeat_start: repeat_start.to_string(),
            repeat_end: repeat_end.to_string(),
            repeat_left: repeat_left.to_string(),
            id: fields[14].to_string(),
            overlapped: fields.get(15) == Some(&"*"),
        })
    }
}

impl fmt::Display for AnnotationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (c11, c12, c13) = match self.strand {
            Strand::Forward => (&self.repeat_start, &self.repeat_end, &self.repeat_left),
            Strand::Complement => (&self.repeat_left, &self.repeat_end, &self.repeat_start),
        };
        write!(
            f,
            "{:>5} {:>5} {:>4} {:>4}  {:<24} {:>9} {:>9} {:>12} {}  {:<14} {:<20} {:>6} {:>6} {:>6} {:>6}",
            self.score,
            self.divergence,
            self.deletions,
            self.insertions,
            self.query_name,
            self.query_start + 1,
            self.query_end,
            format!("({})", self.query_left),
            self.strand.symbol(),
            self.repeat_name,
            self.repeat_class,
            c11,
            c12,
            c13,
            self.id,
        )?;
        if self.overlapped {
            write!(f, " *")?;
        }
        Ok(())
    }
}

fn is_metadata(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty()
        || trimmed.starts_with("SW")
        || trimmed.starts_with("score")
        || trimmed.starts_with(NO_REPEATS)
}

/// Parse tool output or a merged report, discarding header and metadata.
/// Any other unparseable line is a [`PipelineError::Tool`].
pub fn parse_report(text: &str) -> Result<Vec<AnnotationRecord>> {
    text.lines()
        .filter(|line| !is_metadata(line))
        .map(AnnotationRecord::parse_line)
        .collect()
}

/// Data rows only, one per line, no header.
pub fn format_rows(records: &[AnnotationRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// A complete report: header then rows.
pub fn format_report(records: &[AnnotationRecord]) -> String {
    let mut out = String::from(HEADER);
    out.push_str(&format_rows(records));
    out
}
