use std::io::Write;
use std::sync::Arc;

use matchbook_core::{Configuration, Record};
use matchbook_links::{Link, LinkFileError, LinkFileWriter, LinkKind, PairKey};
use rustc_hash::FxHashSet;

use crate::listener::MatchListener;

/// Writes matches as link-file rows. Each pair is written once, however
/// many times it is reported.
pub struct LinkFileListener<W: Write + Send> {
    config: Arc<Configuration>,
    writer: LinkFileWriter<W>,
    include_possible: bool,
    written: FxHashSet<PairKey>,
    error: Option<LinkFileError>,
}

impl<W: Write + Send> LinkFileListener<W> {
    pub fn new(config: Arc<Configuration>, writer: LinkFileWriter<W>) -> Self {
        Self { config, writer, include_possible: false, written: FxHashSet::default(), error: None }
    }

    /// Also write possible matches, with the `?` marker.
    pub fn include_possible(mut self, include: bool) -> Self {
        self.include_possible = include;
        self
    }

    pub fn rows_written(&self) -> usize {
        self.written.len()
    }

    pub fn take_error(&mut self) -> Option<LinkFileError> {
        self.error.take()
    }

    pub fn into_inner(mut self) -> Result<W, LinkFileError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.into_inner()
    }

    fn write(&mut self, r1: &Record, r2: &Record, kind: LinkKind, confidence: f64) {
        let (Some(id1), Some(id2)) = (self.config.identity_of(r1), self.config.identity_of(r2)) else {
            return;
        };
        let link = Link::inferred(id1, id2, kind, confidence);
        if !self.written.insert(link.key()) {
            return;
        }
        if let Err(e) = self.writer.write(&link) {
            self.fail(e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            self.fail(e);
        }
    }

    fn fail(&mut self, error: LinkFileError) {
        log::error!("link file write failed: {error}");
        self.error.get_or_insert(error);
    }
}

impl<W: Write + Send> MatchListener for LinkFileListener<W> {
    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        self.write(r1, r2, LinkKind::Same, confidence);
    }

    fn matches_perhaps(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        if self.include_possible {
            self.write(r1, r2, LinkKind::Possible, confidence);
        }
    }

    fn batch_done(&mut self) {
        self.flush();
    }

    fn end_processing(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchbook_core::{ExactComparator, Property};
    use matchbook_links::read_links;

    fn config() -> Arc<Configuration> {
        Arc::new(
            Configuration::builder()
                .property(Property::identity("id"))
                .property(Property::new("name", Arc::new(ExactComparator), 0.3, 0.95))
                .build()
                .unwrap(),
        )
    }

    fn rec(id: &str) -> Record {
        Record::builder().value("id", id).build()
    }

    #[test]
    fn writes_each_pair_once() {
        let mut l = LinkFileListener::new(config(), LinkFileWriter::new(Vec::new()));
        l.matches(&rec("1"), &rec("2"), 0.95);
        l.matches(&rec("2"), &rec("1"), 0.95);
        l.matches_perhaps(&rec("1"), &rec("3"), 0.7);
        l.end_processing();
        assert_eq!(l.rows_written(), 1);

        let bytes = l.into_inner().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "+,2,1,0.95\n");
    }

    #[test]
    fn possible_matches_on_request() {
        let mut l = LinkFileListener::new(config(), LinkFileWriter::new(Vec::new())).include_possible(true);
        l.matches_perhaps(&rec("1"), &rec("3"), 0.7);
        l.end_processing();
        let file = read_links(l.into_inner().unwrap().as_slice()).unwrap();
        assert_eq!(file.links[0].kind, LinkKind::Possible);
        assert_eq!(file.links[0].confidence, 0.7);
    }
}
