//! Coverage dump serialization.
//!
//! A dump appends one marker line and, unless it is the start marker, one
//! record per method that was hit since the previous dump:
//!
//! ```text
//! Dump\t<pid>\t<millis>
//! <id>\t<class>\t<name>\t<signature>\t<source file>\t<insns>\t<bits>
//! ```
//!
//! A dump runs in three steps. The records are rendered while noting which
//! entries were seen hit; the text is written and flushed; only then are the
//! noted entries cleared. Any failure before the clear leaves every bitmap as
//! it was, so nothing reported as reset is ever lost.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use minitrace_config::log_dump_debug;

use crate::bitmap::CoverageBitmap;
use crate::descriptor::pretty_descriptor;
use crate::host::{ClassRegistry, MethodInfo};
use crate::registration::TraceableClasses;

/// Tag of a marker line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Start,
    Dump,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKind::Start => "Start",
            MarkerKind::Dump => "Dump",
        }
    }
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker line: tag, process id and wall-clock time in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpMarker {
    pub kind: MarkerKind,
    pub pid: u32,
    pub millis: u64,
}

impl DumpMarker {
    /// Marker for this process at the current time
    pub fn now(kind: MarkerKind) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            kind,
            pid: nix::unistd::getpid().as_raw() as u32,
            millis,
        }
    }
}

impl std::fmt::Display for DumpMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}\t{}", self.kind, self.pid, self.millis)
    }
}

/// Entries seen hit in one bitmap, to be cleared once the dump is on disk
struct PendingReset {
    bitmap: Arc<CoverageBitmap>,
    hits: Vec<usize>,
}

/// Rendered dump text plus the resets it owes
pub struct CoverageSnapshot {
    text: String,
    pending: Vec<PendingReset>,
}

impl CoverageSnapshot {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of method records in the text
    pub fn record_count(&self) -> usize {
        self.pending.len()
    }

    /// Clear every entry this snapshot reported as hit; returns how many.
    ///
    /// Only call after the text is durably written.
    pub fn commit(self) -> usize {
        let mut cleared = 0;
        for reset in self.pending {
            for index in reset.hits {
                reset.bitmap.clear(index);
                cleared += 1;
            }
        }
        cleared
    }
}

/// Append one record for `method` to `out`.
///
/// Methods without bytecode, without a bitmap, with an empty body, or with
/// no hit at all produce nothing.
fn render_method(out: &mut String, method: &dyn MethodInfo) -> Option<PendingReset> {
    if !method.has_code() {
        return None;
    }
    let bitmap = method.coverage()?;
    let insns_size = method.insns_size();
    if insns_size == 0 || bitmap.is_empty() || !bitmap.any_hit_within(insns_size as usize) {
        return None;
    }

    let _ = write!(
        out,
        "{:#x}\t{}\t{}\t{}\t{}\t{}\t",
        method.identity(),
        pretty_descriptor(method.declaring_class_descriptor()),
        method.name(),
        method.signature(),
        method.source_file().unwrap_or(""),
        insns_size
    );

    let mut hits = Vec::new();
    for index in 0..insns_size as usize {
        if bitmap.is_hit(index) {
            out.push('1');
            hits.push(index);
        } else {
            out.push('0');
        }
    }
    out.push('\n');

    Some(PendingReset { bitmap, hits })
}

/// Walks traceable classes and renders their coverage
pub struct CoverageDumper<'a> {
    registry: &'a dyn ClassRegistry,
    classes: &'a TraceableClasses,
}

impl<'a> CoverageDumper<'a> {
    pub fn new(registry: &'a dyn ClassRegistry, classes: &'a TraceableClasses) -> Self {
        Self { registry, classes }
    }

    /// Render `marker`, followed by method records for a `Dump` marker
    pub fn snapshot(&self, marker: DumpMarker) -> CoverageSnapshot {
        let mut text = format!("{marker}\n");
        let mut pending = Vec::new();

        if marker.kind == MarkerKind::Dump {
            self.registry.for_each_loaded_class(&mut |class| {
                if self.classes.is_traceable(class.id()) {
                    class.for_each_method(&mut |method| {
                        if let Some(reset) = render_method(&mut text, method) {
                            pending.push(reset);
                        }
                    });
                }
                true
            });
        }

        log_dump_debug!(
            "Rendered coverage snapshot",
            marker = marker.kind.as_str(),
            records = pending.len()
        );
        CoverageSnapshot { text, pending }
    }

    /// Write a snapshot to `out`, flush, and clear the reported entries.
    /// Returns the number of method records written.
    ///
    /// On error nothing is cleared.
    pub fn dump_into<W: Write + ?Sized>(
        &self,
        out: &mut W,
        marker: DumpMarker,
    ) -> io::Result<usize> {
        let snapshot = self.snapshot(marker);
        out.write_all(snapshot.text().as_bytes())?;
        out.flush()?;
        let records = snapshot.record_count();
        snapshot.commit();
        Ok(records)
    }
}

/// Destination of a dump that can take back a partial write
pub trait CoverageSink: Write {
    /// Undo everything written through this sink
    fn discard(self: Box<Self>) -> io::Result<()>;
}

/// Coverage file opened for appending, able to roll back its own writes
pub struct CoverageFile {
    path: PathBuf,
    file: File,
    created: bool,
    original_len: u64,
}

impl CoverageFile {
    /// Append to `path` if it exists, create it otherwise
    pub fn open(path: &Path) -> io::Result<Self> {
        let created = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let original_len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            created,
            original_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop what this handle wrote: remove the file if this handle created
    /// it, otherwise truncate it back to its length at open time.
    pub fn discard(self) -> io::Result<()> {
        if self.created {
            drop(self.file);
            std::fs::remove_file(&self.path)
        } else {
            self.file.set_len(self.original_len)
        }
    }
}

impl CoverageSink for CoverageFile {
    fn discard(self: Box<Self>) -> io::Result<()> {
        CoverageFile::discard(*self)
    }
}

impl Write for CoverageFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
