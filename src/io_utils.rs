//! I/O utilities for CSV reading, writing and encoding.
//!
//! Input files are decoded into UTF-8 streams via `encoding_rs_io`, so the
//! header parser, the combiner and the table loader all see the same text.
//! Everything the crate writes is UTF-8.

use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};

pub const CSV_DELIMITER: u8 = b',';
pub const CSV_QUOTE: u8 = b'"';
pub const CSV_SUFFIX: &str = ".csv";

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Opens `path` as a UTF-8 byte stream, decoding from `encoding`.
pub fn open_decoded(
    path: &Path,
    encoding: &'static Encoding,
) -> Result<DecodeReaderBytes<File, Vec<u8>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(file))
}

/// Line reader over a decoded input file.
pub fn open_text_lines(
    path: &Path,
    encoding: &'static Encoding,
) -> Result<BufReader<DecodeReaderBytes<File, Vec<u8>>>> {
    Ok(BufReader::new(open_decoded(path, encoding)?))
}

pub fn open_csv_reader<R>(reader: R, quote: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(CSV_DELIMITER)
        .quote(quote)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_writer<W>(writer: W, quote: u8) -> csv::Writer<W>
where
    W: Write,
{
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(CSV_DELIMITER)
        .quote(quote)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    builder.from_writer(writer)
}

/// Removes a trailing `.csv` (any case) from a file name.
pub fn strip_csv_suffix(name: &str) -> &str {
    let split = name.len().saturating_sub(CSV_SUFFIX.len());
    match (name.get(..split), name.get(split..)) {
        (Some(stem), Some(suffix)) if suffix.eq_ignore_ascii_case(CSV_SUFFIX) => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::tempdir;

    #[test]
    fn strip_csv_suffix_ignores_case() {
        assert_eq!(strip_csv_suffix("orders.csv"), "orders");
        assert_eq!(strip_csv_suffix("orders.CSV"), "orders");
        assert_eq!(strip_csv_suffix("orders.tsv"), "orders.tsv");
        assert_eq!(strip_csv_suffix("csv"), "csv");
    }

    #[test]
    fn decoded_lines_come_out_as_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin.csv");
        std::fs::write(&path, b"caf\xe9,price\n1,2\n").unwrap();
        let encoding = resolve_encoding(Some("latin1")).unwrap();
        let mut first = String::new();
        open_text_lines(&path, encoding)
            .unwrap()
            .read_line(&mut first)
            .unwrap();
        assert_eq!(first, "caf\u{e9},price\n");
    }

    #[test]
    fn csv_writer_quotes_only_when_needed() {
        let mut bytes = Vec::new();
        {
            let mut writer = open_csv_writer(&mut bytes, CSV_QUOTE);
            writer.write_record(["caf\u{e9}", "a,b", "say \"hi\""]).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(bytes, "caf\u{e9},\"a,b\",\"say \"\"hi\"\"\"\n".as_bytes());
    }

    #[test]
    fn resolve_encoding_rejects_unknown_labels() {
        assert!(resolve_encoding(Some("klingon")).is_err());
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
    }
}
