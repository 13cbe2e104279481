//! # minitrace-core
//!
//! Execution-coverage collection for a managed-code virtual machine.
//!
//! Handles:
//! - Deciding which loaded classes are traceable ([`ClassFilter`])
//! - Registering classes in bulk at start and incrementally on class prepare
//! - The Idle/Active trace session state machine ([`MiniTrace`])
//! - Serializing per-method coverage bitmaps and resetting them ([`CoverageDumper`])
//! - Reading coverage files back and aggregating them ([`CoverageLog`])
//!
//! The virtual machine itself is reached through the traits in [`host`].

pub mod bitmap;
pub mod descriptor;
pub mod dump;
pub mod filter;
pub mod host;
pub mod quiesce;
pub mod registration;
pub mod report;
pub mod session;
pub mod testing;

use thiserror::Error;

pub use bitmap::CoverageBitmap;
pub use dump::{CoverageDumper, CoverageSnapshot, DumpMarker, MarkerKind};
pub use filter::ClassFilter;
pub use host::{
    ClassId, ClassInfo, ClassKind, ClassLoadCallback, ClassRegistry, HostRuntime, Instrumentation,
    InstrumentationListener, MethodInfo,
};
pub use quiesce::{BarrierQuiescer, Quiesce, SuspendGuard};
pub use registration::{ClassRegistrar, RegistrationStats, TraceableClasses};
pub use report::{ClassCoverage, CoverageLog, CoverageSummary, MethodCoverage, ReportError};
pub use session::{
    dump_coverage_data, install, is_active, shutdown, start, stop, tracer, MiniTrace, TraceSession,
};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Trace already in progress")]
    AlreadyActive,

    #[error("No trace currently running")]
    NotActive,

    #[error("Config file {0} does not exist")]
    GateMissing(String),

    #[error("Config file {path} exists but can't be opened: {source}")]
    GateUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TraceError>;
