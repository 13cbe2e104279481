//! Reading coverage files back.
//!
//! Each dump only holds the hits since the previous one, so the coverage of a
//! method over a whole file is the union of all its records.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::dump::{DumpMarker, MarkerKind};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

fn malformed(line: usize, reason: impl Into<String>) -> ReportError {
    ReportError::Malformed {
        line,
        reason: reason.into(),
    }
}

/// One method record line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRecord {
    pub method_id: String,
    pub class: String,
    pub name: String,
    pub signature: String,
    pub source_file: String,
    pub insns_size: u32,
    pub bits: Vec<bool>,
}

impl CoverageRecord {
    pub fn hit_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }
}

/// A parsed line of a coverage file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Marker(DumpMarker),
    Record(CoverageRecord),
}

/// Contents of a coverage file, in file order
#[derive(Debug, Clone, Default)]
pub struct CoverageLog {
    pub entries: Vec<LogEntry>,
}

impl CoverageLog {
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ReportError> {
        let mut entries = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            entries.push(parse_line(i + 1, line)?);
        }
        Ok(Self { entries })
    }

    pub fn markers(&self) -> impl Iterator<Item = &DumpMarker> {
        self.entries.iter().filter_map(|e| match e {
            LogEntry::Marker(m) => Some(m),
            LogEntry::Record(_) => None,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &CoverageRecord> {
        self.entries.iter().filter_map(|e| match e {
            LogEntry::Record(r) => Some(r),
            LogEntry::Marker(_) => None,
        })
    }

    /// Union the records of every method and group them by class
    pub fn aggregate(&self) -> CoverageSummary {
        let mut methods: BTreeMap<(String, String, String), MethodCoverage> = BTreeMap::new();
        for record in self.records() {
            let key = (
                record.class.clone(),
                record.name.clone(),
                record.signature.clone(),
            );
            methods
                .entry(key)
                .or_insert_with(|| MethodCoverage {
                    name: record.name.clone(),
                    signature: record.signature.clone(),
                    source_file: record.source_file.clone(),
                    hits: Vec::new(),
                })
                .merge(&record.bits);
        }

        let mut classes: BTreeMap<String, ClassCoverage> = BTreeMap::new();
        for ((class, _, _), method) in methods {
            let entry = classes
                .entry(class.clone())
                .or_insert_with(|| ClassCoverage {
                    class,
                    covered: 0,
                    total: 0,
                    methods: Vec::new(),
                });
            entry.covered += method.covered();
            entry.total += method.total();
            entry.methods.push(method);
        }

        let mut summary = CoverageSummary {
            starts: 0,
            dumps: 0,
            classes: classes.into_values().collect(),
        };
        for marker in self.markers() {
            match marker.kind {
                MarkerKind::Start => summary.starts += 1,
                MarkerKind::Dump => summary.dumps += 1,
            }
        }
        summary
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<LogEntry, ReportError> {
    let fields: Vec<&str> = line.split('\t').collect();
    match fields.as_slice() {
        [tag, pid, millis] => {
            let kind = match *tag {
                "Start" => MarkerKind::Start,
                "Dump" => MarkerKind::Dump,
                other => return Err(malformed(line_no, format!("unknown marker '{other}'"))),
            };
            let pid = pid
                .parse()
                .map_err(|_| malformed(line_no, format!("bad pid '{pid}'")))?;
            let millis = millis
                .parse()
                .map_err(|_| malformed(line_no, format!("bad timestamp '{millis}'")))?;
            Ok(LogEntry::Marker(DumpMarker { kind, pid, millis }))
        }
        [method_id, class, name, signature, source_file, insns, bits] => {
            let insns_size: u32 = insns
                .parse()
                .map_err(|_| malformed(line_no, format!("bad instruction count '{insns}'")))?;
            if bits.len() != insns_size as usize {
                return Err(malformed(
                    line_no,
                    format!("expected {insns_size} coverage bits, found {}", bits.len()),
                ));
            }
            let bits = bits
                .bytes()
                .map(|b| match b {
                    b'1' => Ok(true),
                    b'0' => Ok(false),
                    _ => Err(malformed(line_no, "coverage bits must be '0' or '1'")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(LogEntry::Record(CoverageRecord {
                method_id: method_id.to_string(),
                class: class.to_string(),
                name: name.to_string(),
                signature: signature.to_string(),
                source_file: source_file.to_string(),
                insns_size,
                bits,
            }))
        }
        _ => Err(malformed(
            line_no,
            format!("expected 3 or 7 tab-separated fields, found {}", fields.len()),
        )),
    }
}

/// Union of every record of one method
#[derive(Debug, Clone, Serialize)]
pub struct MethodCoverage {
    pub name: String,
    pub signature: String,
    pub source_file: String,
    pub hits: Vec<bool>,
}

impl MethodCoverage {
    fn merge(&mut self, bits: &[bool]) {
        if self.hits.len() < bits.len() {
            self.hits.resize(bits.len(), false);
        }
        for (hit, &bit) in self.hits.iter_mut().zip(bits) {
            *hit |= bit;
        }
    }

    pub fn covered(&self) -> usize {
        self.hits.iter().filter(|&&h| h).count()
    }

    pub fn total(&self) -> usize {
        self.hits.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassCoverage {
    pub class: String,
    pub covered: usize,
    pub total: usize,
    pub methods: Vec<MethodCoverage>,
}

impl ClassCoverage {
    /// Covered fraction in percent, 0 for an empty class
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 * 100.0 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageSummary {
    pub starts: usize,
    pub dumps: usize,
    pub classes: Vec<ClassCoverage>,
}

impl CoverageSummary {
    pub fn covered(&self) -> usize {
        self.classes.iter().map(|c| c.covered).sum()
    }

    pub fn total(&self) -> usize {
        self.classes.iter().map(|c| c.total).sum()
    }
}
