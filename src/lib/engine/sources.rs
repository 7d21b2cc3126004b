//! File-backed source adaptation for the scan engine.
//!
//! A [`BamSource`] wraps one indexed BAM path plus its per-source options.
//! [`AlignedReadsScanner`] owns the source set: it reads every header
//! eagerly at construction into an immutable [`SequenceDictionary`] (so
//! steady-state scanning needs no shared mutable cache), and builds one
//! [`RegionScan`] per reference with fresh, lazily opened file handles.
//!
//! Handles open on the first record pulled and close when the scan drops.
//! Read errors mid-stream are logged and end that stream; truncated or
//! interrupted inputs must not abort a multi-gigabase scan.

use std::path::{Path, PathBuf};

use log::warn;
use rust_htslib::bam::{self, IndexedReader, Read};
use rustc_hash::FxHashMap;
use smartstring::{LazyCompact, SmartString};

use crate::config::{OrphanPolicy, ScanOptions, SourceOptions};
use crate::core::error::{RegataError, Result};
use crate::engine::scan::{MateResolver, RegionScan};
use crate::model::Span;

/// One indexed BAM input with its source-level configuration.
#[derive(Debug, Clone)]
pub struct BamSource {
    path: PathBuf,
    opts: SourceOptions,
}

impl BamSource {
    pub fn new<P: AsRef<Path>>(path: P, opts: SourceOptions) -> BamSource {
        BamSource {
            path: path.as_ref().to_path_buf(),
            opts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &SourceOptions {
        &self.opts
    }
}

/// Reference-name to length mapping, merged over all sources' headers.
#[derive(Debug, Clone, Default)]
pub struct SequenceDictionary {
    names: Vec<SmartString<LazyCompact>>,
    lengths: FxHashMap<SmartString<LazyCompact>, u64>,
}

impl SequenceDictionary {
    /// Query every source's header once. Conflicting lengths for the same
    /// reference name are a configuration error.
    pub fn from_sources(sources: &[BamSource]) -> Result<SequenceDictionary> {
        let mut dict = SequenceDictionary::default();
        for source in sources {
            let reader = bam::Reader::from_path(source.path())?;
            let header = reader.header();
            for tid in 0..header.target_count() {
                let name = SmartString::from(String::from_utf8_lossy(header.tid2name(tid)).as_ref());
                let len = header.target_len(tid).unwrap_or(0);
                match dict.lengths.get(&name) {
                    Some(&existing) if existing != len => {
                        return Err(RegataError::DictionaryMismatch {
                            reference: name.to_string(),
                            first: existing,
                            second: len,
                        });
                    }
                    Some(_) => {}
                    None => {
                        dict.names.push(name.clone());
                        dict.lengths.insert(name, len);
                    }
                }
            }
        }
        Ok(dict)
    }

    pub fn names(&self) -> &[SmartString<LazyCompact>] {
        &self.names
    }

    pub fn len_of(&self, name: &str) -> Option<u64> {
        self.lengths.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lengths.contains_key(name)
    }
}

/// Lazily opened fetch iterator over one source and one reference (range).
struct FetchRecords {
    path: PathBuf,
    reference: String,
    range: Option<Span>,
    state: FetchState,
}

enum FetchState {
    Unopened,
    Open(IndexedReader),
    Done,
}

impl FetchRecords {
    fn new(path: PathBuf, reference: String, range: Option<Span>) -> FetchRecords {
        FetchRecords {
            path,
            reference,
            range,
            state: FetchState::Unopened,
        }
    }
}

fn open_reader(path: &Path, reference: &str, range: Option<Span>) -> Result<IndexedReader> {
    let mut reader = IndexedReader::from_path(path)?;
    match range {
        Some(span) => reader.fetch((reference, span.start, span.end))?,
        None => reader.fetch(reference)?,
    }
    Ok(reader)
}

impl Iterator for FetchRecords {
    type Item = bam::Record;

    fn next(&mut self) -> Option<bam::Record> {
        loop {
            match &mut self.state {
                FetchState::Unopened => {
                    match open_reader(&self.path, &self.reference, self.range) {
                        Ok(reader) => self.state = FetchState::Open(reader),
                        Err(e) => {
                            warn!(
                                "failed to open {} for {}: {}; treating as empty",
                                self.path.display(),
                                self.reference,
                                e
                            );
                            self.state = FetchState::Done;
                        }
                    }
                }
                FetchState::Open(reader) => {
                    let mut record = bam::Record::new();
                    match reader.read(&mut record) {
                        Some(Ok(())) => return Some(record),
                        Some(Err(e)) => {
                            warn!(
                                "read error in {}: {}; treating as end of stream",
                                self.path.display(),
                                e
                            );
                            self.state = FetchState::Done;
                        }
                        None => self.state = FetchState::Done,
                    }
                }
                FetchState::Done => return None,
            }
        }
    }
}

/// Index-backed mate lookup for the `Query` orphan policy. Readers open
/// lazily, one per source, and live for the resolver's lifetime.
struct IndexedMateResolver {
    paths: Vec<PathBuf>,
    readers: Vec<Option<IndexedReader>>,
}

impl IndexedMateResolver {
    fn new(paths: Vec<PathBuf>) -> IndexedMateResolver {
        let readers = paths.iter().map(|_| None).collect();
        IndexedMateResolver { paths, readers }
    }
}

impl MateResolver for IndexedMateResolver {
    fn locate_mate(&mut self, orphan: &bam::Record, file: usize) -> Result<Option<bam::Record>> {
        if orphan.mtid() < 0 {
            return Ok(None);
        }
        if self.readers[file].is_none() {
            self.readers[file] = Some(IndexedReader::from_path(&self.paths[file])?);
        }
        let reader = self.readers[file].as_mut().expect("reader just opened");
        reader.fetch((orphan.mtid(), orphan.mpos(), orphan.mpos() + 1))?;
        let mut record = bam::Record::new();
        while let Some(result) = reader.read(&mut record) {
            if result.is_err() {
                return Ok(None);
            }
            if record.pos() == orphan.mpos()
                && record.qname() == orphan.qname()
                && record.is_first_in_template() != orphan.is_first_in_template()
                && record.mpos() == orphan.pos()
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// The scanner: sources, scan options, and the eagerly built dictionary.
pub struct AlignedReadsScanner {
    sources: Vec<BamSource>,
    opts: ScanOptions,
    dict: SequenceDictionary,
}

impl AlignedReadsScanner {
    pub fn new(sources: Vec<BamSource>, opts: ScanOptions) -> Result<AlignedReadsScanner> {
        if sources.is_empty() {
            return Err(RegataError::Config("no input sources".to_string()));
        }
        let dict = SequenceDictionary::from_sources(&sources)?;
        Ok(AlignedReadsScanner {
            sources,
            opts,
            dict,
        })
    }

    pub fn dictionary(&self) -> &SequenceDictionary {
        &self.dict
    }

    pub fn sources(&self) -> &[BamSource] {
        &self.sources
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    /// Build a pull-based scan over `reference`, optionally restricted to a
    /// sub-range. Every scan owns its own file handles, so independent
    /// references can be scanned concurrently.
    pub fn scan(&self, reference: &str, range: Option<Span>) -> Result<RegionScan> {
        if !self.dict.contains(reference) {
            return Err(RegataError::Config(format!(
                "reference `{}` not present in any source",
                reference
            )));
        }
        let streams: Vec<Box<dyn Iterator<Item = bam::Record>>> = self
            .sources
            .iter()
            .map(|source| {
                Box::new(FetchRecords::new(
                    source.path().to_path_buf(),
                    reference.to_string(),
                    range,
                )) as Box<dyn Iterator<Item = bam::Record>>
            })
            .collect();
        let source_opts: Vec<SourceOptions> =
            self.sources.iter().map(|s| s.options().clone()).collect();
        let resolver: Option<Box<dyn MateResolver>> = if self.opts.orphans == OrphanPolicy::Query {
            Some(Box::new(IndexedMateResolver::new(
                self.sources.iter().map(|s| s.path().to_path_buf()).collect(),
            )))
        } else {
            None
        };
        Ok(RegionScan::new(
            streams,
            source_opts,
            self.opts.clone(),
            reference,
            range,
            resolver,
        ))
    }
}
