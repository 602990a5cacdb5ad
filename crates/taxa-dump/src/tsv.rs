//! Header-delimited, tab-separated stream reader.
//!
//! Fields are split strictly on `\t`; there is no quoting. Column names are
//! matched case-insensitively and resolved once when the stream is opened.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use taxa_core::{Error, Result};

/// One data row. Missing trailing fields read as empty.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    /// Field at a resolved column, trimmed. Empty when the column is unknown
    /// or the row is shorter than the header.
    pub fn get(&self, column: Option<usize>) -> &str {
        column
            .and_then(|i| self.fields.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    /// Field parsed as an integer id; `None` when blank or malformed.
    pub fn get_i64(&self, column: Option<usize>) -> Option<i64> {
        self.get(column).parse::<i64>().ok()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Streaming reader over a TSV dump.
pub struct TsvReader<R> {
    reader: R,
    columns: Vec<String>,
    index: HashMap<String, usize>,
    buf: Vec<u8>,
}

impl TsvReader<BufReader<File>> {
    /// Open a dump file. A missing file is `Error::NotFound`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        Self::new(BufReader::with_capacity(1 << 20, file))
    }
}

impl<R: BufRead> TsvReader<R> {
    /// Read the header line. An empty stream yields a reader with no columns.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_until(b'\n', &mut buf)?;
        let header = decode_line(&buf);
        let columns: Vec<String> = if header.is_empty() {
            Vec::new()
        } else {
            header
                .split('\t')
                .map(|c| c.trim().trim_start_matches('\u{feff}').to_string())
                .collect()
        };

        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            // first occurrence wins on duplicate names
            index.entry(name.to_lowercase()).or_insert(i);
        }

        Ok(Self {
            reader,
            columns,
            index,
            buf,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index of the first alias present in the header (case-insensitive).
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.index.get(&alias.to_lowercase()).copied())
    }

    /// Index of the first column whose lowercase name satisfies `pred`.
    pub fn find_column(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| pred(&c.to_lowercase()))
    }

    /// Next data row, skipping blank lines.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.buf.clear();
            let n = self.reader.read_until(b'\n', &mut self.buf)?;
            if n == 0 {
                return Ok(None);
            }
            let line = decode_line(&self.buf);
            if line.trim().is_empty() {
                continue;
            }
            let fields = line.split('\t').map(str::to_string).collect();
            return Ok(Some(Record { fields }));
        }
    }
}

impl<R: BufRead> Iterator for TsvReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> TsvReader<Cursor<Vec<u8>>> {
        TsvReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_case_insensitive_columns() {
        let r = reader("taxonID\tCanonicalName\tkingdom\n");
        assert_eq!(r.column(&["taxonid"]), Some(0));
        assert_eq!(r.column(&["usageKey", "TAXONID"]), Some(0));
        assert_eq!(r.column(&["canonicalname"]), Some(1));
        assert_eq!(r.column(&["rank"]), None);
    }

    #[test]
    fn test_short_rows_pad_with_empty() {
        let mut r = reader("a\tb\tc\n1\t2\n");
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.get(Some(0)), "1");
        assert_eq!(rec.get(Some(2)), "");
        assert_eq!(rec.get(None), "");
    }

    #[test]
    fn test_no_quote_handling() {
        let mut r = reader("name\tnote\n\"Rose, dog\"\tx\n");
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.get(Some(0)), "\"Rose, dog\"");
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut r = reader("id\tname\r\n\r\n7\tRosa\r\n");
        assert_eq!(r.columns(), &["id".to_string(), "name".to_string()]);
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.get_i64(Some(0)), Some(7));
        assert_eq!(rec.get(Some(1)), "Rosa");
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn test_malformed_integer() {
        let mut r = reader("id\nabc\n");
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.get_i64(Some(0)), None);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let bytes = b"name\nRos\xffa\n".to_vec();
        let mut r = TsvReader::new(Cursor::new(bytes)).unwrap();
        let rec = r.next_record().unwrap().unwrap();
        assert!(rec.get(Some(0)).starts_with("Ros"));
    }

    #[test]
    fn test_empty_stream() {
        let mut r = reader("");
        assert!(r.columns().is_empty());
        assert!(r.next().is_none());
    }

    #[test]
    fn test_find_column() {
        let r = reader("acceptedTaxonID\tsynonymNameID\n");
        assert_eq!(
            r.find_column(|c| c.contains("taxon") && c.contains("id")),
            Some(0)
        );
        assert_eq!(
            r.find_column(|c| c.contains("name") && c.contains("id")),
            Some(1)
        );
    }

    #[test]
    fn test_open_missing_file() {
        let err = match TsvReader::open(Path::new("/nonexistent/Taxon.tsv")) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::NotFound(_)));
    }
}
