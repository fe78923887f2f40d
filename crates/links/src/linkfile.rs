//! Link files: one decision per CSV row.
//!
//! ```text
//! +,id1,id2,confidence     SAME
//! -,id1,id2,confidence     DIFFERENT
//! ?,id1,id2,confidence     POSSIBLE
//! ```
//!
//! The confidence column is optional on read and defaults to 1.0.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{LinkFileError, LinkStoreError, RowError};
use crate::link::{Link, LinkKind};
use crate::store::{AssertOutcome, LinkStore};

/// Rows that parsed, and the ones that did not.
#[derive(Debug, Clone, Default)]
pub struct LinkFile {
    pub links: Vec<Link>,
    pub errors: Vec<RowError>,
}

fn kind_of(marker: &str) -> Option<LinkKind> {
    match marker {
        "+" => Some(LinkKind::Same),
        "-" => Some(LinkKind::Different),
        "?" => Some(LinkKind::Possible),
        _ => None,
    }
}

fn marker_of(kind: LinkKind) -> &'static str {
    match kind {
        LinkKind::Same => "+",
        LinkKind::Different => "-",
        LinkKind::Possible => "?",
    }
}

fn parse_row(row: &csv::StringRecord) -> Result<Link, String> {
    if row.len() < 3 || row.len() > 4 {
        return Err(format!("expected 3 or 4 fields, found {}", row.len()));
    }
    let kind = kind_of(&row[0]).ok_or_else(|| format!("unknown marker '{}'", &row[0]))?;
    let (a, b) = (&row[1], &row[2]);
    if a.is_empty() || b.is_empty() {
        return Err("empty identity".into());
    }
    if a == b {
        return Err(format!("link from '{a}' to itself"));
    }
    let confidence = match row.get(3) {
        None | Some("") => 1.0,
        Some(raw) => raw.parse::<f64>().map_err(|_| format!("bad confidence '{raw}'"))?,
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }
    Ok(Link::asserted(a, b, kind, confidence))
}

/// Reads link rows from any source. Bad rows are collected, not fatal.
pub fn read_links<R: Read>(reader: R) -> Result<LinkFile, LinkFileError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut file = LinkFile::default();
    let mut rows = 0usize;
    for result in csv.records() {
        rows += 1;
        match result {
            Ok(row) => {
                let line = row.position().map_or(0, |p| p.line());
                match parse_row(&row) {
                    Ok(link) => file.links.push(link),
                    Err(message) => {
                        log::warn!("link file line {line}: {message}");
                        file.errors.push(RowError { line, message });
                    }
                }
            }
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                log::warn!("link file line {line}: {e}");
                file.errors.push(RowError { line, message: e.to_string() });
            }
        }
    }
    if rows == 0 {
        return Err(LinkFileError::Empty);
    }
    Ok(file)
}

pub fn read_link_file(path: &Path) -> Result<LinkFile, LinkFileError> {
    read_links(File::open(path)?)
}

/// Asserts every parsed row into `store`. Returns how many changed it.
pub fn load_into(store: &mut LinkStore, file: &LinkFile) -> Result<usize, LinkStoreError> {
    let mut stored = 0;
    for link in &file.links {
        if store.assert_link(link.clone())? == AssertOutcome::Stored {
            stored += 1;
        }
    }
    Ok(stored)
}

/// Writes links in link-file format.
pub struct LinkFileWriter<W: Write> {
    csv: csv::Writer<W>,
}

impl LinkFileWriter<File> {
    pub fn create(path: &Path) -> Result<Self, LinkFileError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> LinkFileWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { csv: csv::WriterBuilder::new().has_headers(false).from_writer(inner) }
    }

    pub fn write(&mut self, link: &Link) -> Result<(), LinkFileError> {
        let confidence = link.confidence.to_string();
        self.csv.write_record([marker_of(link.kind), link.id1.as_str(), link.id2.as_str(), confidence.as_str()])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LinkFileError> {
        self.csv.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, LinkFileError> {
        self.csv.into_inner().map_err(|e| LinkFileError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkStatus;

    #[test]
    fn reads_rows_and_canonicalises() {
        let input = "+,1,2,0.9\n-,a,b\n?, x , y ,0.5\n";
        let file = read_links(input.as_bytes()).unwrap();
        assert!(file.errors.is_empty());
        assert_eq!(file.links.len(), 3);
        let first = &file.links[0];
        assert_eq!((first.id1.as_str(), first.id2.as_str()), ("2", "1"));
        assert_eq!(first.kind, LinkKind::Same);
        assert_eq!(first.status, LinkStatus::Asserted);
        assert_eq!(file.links[1].confidence, 1.0);
        assert_eq!(file.links[2].id1, "y");
    }

    #[test]
    fn bad_rows_are_reported_with_line_numbers() {
        let input = "+,1,2,0.9\n*,1,3\n+,4\n+,5,6,high\n+,7,7\n+,8,9,1.5\n-,3,4\n";
        let file = read_links(input.as_bytes()).unwrap();
        assert_eq!(file.links.len(), 2);
        let lines: Vec<u64> = file.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(read_links("".as_bytes()), Err(LinkFileError::Empty)));
    }

    #[test]
    fn writer_output_reads_back() {
        let mut writer = LinkFileWriter::new(Vec::new());
        writer.write(&Link::asserted("1", "2", LinkKind::Same, 0.75)).unwrap();
        writer.write(&Link::inferred("b", "a", LinkKind::Different, 1.0)).unwrap();
        let bytes = writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "+,2,1,0.75\n-,b,a,1\n");

        let file = read_links(bytes.as_slice()).unwrap();
        assert_eq!(file.links.len(), 2);
        assert_eq!(file.links[0].confidence, 0.75);
    }

    #[test]
    fn load_into_store_counts_changes() {
        let file = read_links("+,1,2\n+,2,3\n+,1,2\n".as_bytes()).unwrap();
        let mut store = LinkStore::in_memory();
        assert_eq!(load_into(&mut store, &file).unwrap(), 2);
        assert_eq!(store.class_of("3"), vec!["1", "2", "3"]);
    }
}
