//! FASTA ingestion and emission.
//!
//! Compression is resolved once when input is opened ([`InputFormat`]);
//! everything downstream of ingestion only ever sees plain FASTA bytes.

use flate2::read::MultiGzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Residues per line when writing FASTA.
pub const LINE_WIDTH: usize = 60;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A named sequence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub name: String,
    pub seq: Vec<u8>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            seq: seq.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.seq.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Compressed,
    Plain,
}

impl InputFormat {
    /// Sniff the gzip magic number. Files shorter than two bytes are plain.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            PipelineError::Input(format!("cannot open {}: {}", path.display(), e))
        })?;
        let mut magic = [0u8; 2];
        let mut filled = 0;
        while filled < magic.len() {
            let n = file.read(&mut magic[filled..]).map_err(|e| {
                PipelineError::Input(format!("cannot read {}: {}", path.display(), e))
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(if filled == 2 && magic == GZIP_MAGIC {
            InputFormat::Compressed
        } else {
            InputFormat::Plain
        })
    }
}

/// Read an input file to plain FASTA bytes, decompressing if needed.
pub fn read_plain_bytes(path: &Path) -> Result<(InputFormat, Vec<u8>)> {
    let format = InputFormat::detect(path)?;
    let file = File::open(path)
        .map_err(|e| PipelineError::Input(format!("cannot open {}: {}", path.display(), e)))?;
    let mut reader: Box<dyn Read> = match format {
        InputFormat::Compressed => Box::new(MultiGzDecoder::new(file)),
        InputFormat::Plain => Box::new(file),
    };
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|e| {
        PipelineError::Input(format!("cannot decode {}: {}", path.display(), e))
    })?;
    Ok((format, bytes))
}

/// Parse FASTA records. The record name is the first whitespace-delimited
/// token of the header line.
pub fn parse_fasta<R: BufRead>(reader: R) -> Result<Vec<Sequence>> {
    let mut sequences = Vec::new();
    let mut current: Option<Sequence> = None;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PipelineError::Input(format!("unreadable FASTA: {e}")))?;
        let trimmed = line.trim_end();

        if let Some(header) = trimmed.strip_prefix('>') {
            if let Some(done) = current.take() {
                sequences.push(done);
            }
            let name = header.split_whitespace().next().unwrap_or("");
            if name.is_empty() {
                return Err(PipelineError::Input(format!(
                    "line {}: FASTA header without a name",
                    lineno + 1
                )));
            }
            current = Some(Sequence::new(name, Vec::new()));
        } else if !trimmed.is_empty() {
            match current.as_mut() {
                Some(record) => record.seq.extend_from_slice(trimmed.as_bytes()),
                None => {
                    return Err(PipelineError::Input(format!(
                        "line {}: sequence data before first FASTA header",
                        lineno + 1
                    )))
                }
            }
        }
    }

    if let Some(done) = current {
        sequences.push(done);
    }
    Ok(sequences)
}

pub fn parse_fasta_bytes(bytes: &[u8]) -> Result<Vec<Sequence>> {
    parse_fasta(BufReader::new(bytes))
}

/// Every name must be unique within an input set.
pub fn check_unique_names(sequences: &[Sequence]) -> Result<()> {
    let mut seen = HashSet::with_capacity(sequences.len());
    for record in sequences {
        if !seen.insert(record.name.as_str()) {
            return Err(PipelineError::Input(format!(
                "sequence name '{}' occurs more than once",
                record.name
            )));
        }
    }
    Ok(())
}

pub fn write_fasta<W: Write>(writer: &mut W, sequences: &[Sequence]) -> std::io::Result<()> {
    for record in sequences {
        writeln!(writer, ">{}", record.name)?;
        for line in record.seq.chunks(LINE_WIDTH) {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
        }
    }
    Ok(())
}

pub fn fasta_bytes(sequences: &[Sequence]) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_fasta(&mut out, sequences);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    #[test]
    fn test_parse_multiline_records() {
        let text = b">chr1 some description\nACGT\nacgt\n\n>chr2\nNNNN\n";
        let seqs = parse_fasta_bytes(text).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].name, "chr1");
        assert_eq!(seqs[0].seq, b"ACGTacgt");
        assert_eq!(seqs[1].len(), 4);
    }

    #[test]
    fn test_data_before_header_is_input_error() {
        let err = parse_fasta_bytes(b"ACGT\n>chr1\nA\n").unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let seqs = vec![Sequence::new("a", b"AC".to_vec()), Sequence::new("a", b"G".to_vec())];
        assert!(matches!(
            check_unique_names(&seqs),
            Err(PipelineError::Input(_))
        ));
    }

    #[test]
    fn test_write_wraps_lines() {
        let seq = Sequence::new("x", vec![b'A'; LINE_WIDTH + 5]);
        let text = String::from_utf8(fasta_bytes(&[seq])).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].len(), LINE_WIDTH);
        assert_eq!(lines[2].len(), 5);
    }

    #[test]
    fn test_gzip_input_detected_and_decoded() {
        let dir = TempDir::new().unwrap();
        let gz_path = dir.path().join("in.fa.gz");
        let plain_path = dir.path().join("in.fa");
        let body = b">chr1\nACGTACGT\n";

        let mut enc = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
        enc.write_all(body).unwrap();
        enc.finish().unwrap();
        std::fs::write(&plain_path, body).unwrap();

        let (format, bytes) = read_plain_bytes(&gz_path).unwrap();
        assert_eq!(format, InputFormat::Compressed);
        assert_eq!(bytes, body);

        let (format, bytes) = read_plain_bytes(&plain_path).unwrap();
        assert_eq!(format, InputFormat::Plain);
        assert_eq!(bytes, body);
    }
}
