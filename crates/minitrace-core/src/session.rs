//! Trace session lifecycle.
//!
//! ```text
//!            start (gate present)              stop / shutdown
//!   Idle ─────────────────────────▶ Active ─────────────────────────▶ Idle
//!    ▲  stop: logged, no change       │  start: logged, no change
//!    └────────────────────────────────┘
//! ```
//!
//! Every change to the dispatcher registration happens inside a stop-the-world
//! window so running code never sees a half-installed set of stubs. The session
//! lock is only held for the check-and-set of the state and never across file
//! I/O. Lock order is: stop-the-world guard, session lock, class side-table.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use minitrace_config::{
    log_dump_info, log_dump_warn, log_trace_debug, log_trace_error, log_trace_info,
    log_trace_warn, Config, TracePaths,
};
use once_cell::sync::OnceCell;

use crate::dump::{CoverageDumper, CoverageFile, CoverageSink, DumpMarker, MarkerKind};
use crate::filter::ClassFilter;
use crate::host::{
    ClassId, ClassInfo, ClassLoadCallback, HostRuntime, InstrumentationListener,
};
use crate::registration::{ClassRegistrar, RegistrationStats, TraceableClasses};
use crate::{Result, TraceError};

/// The live trace session, registered with the dispatcher while active.
///
/// Coverage is recorded by the execution path itself, so every listener
/// callback keeps its default no-op.
#[derive(Debug)]
pub struct TraceSession {
    instrumentation_key: String,
    started_millis: u64,
}

impl TraceSession {
    fn new(instrumentation_key: &str) -> Self {
        let started_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            instrumentation_key: instrumentation_key.to_string(),
            started_millis,
        }
    }

    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    pub fn started_millis(&self) -> u64 {
        self.started_millis
    }
}

impl InstrumentationListener for TraceSession {}

type SinkOpener = fn(&Path) -> io::Result<Box<dyn CoverageSink>>;

fn open_coverage_file(path: &Path) -> io::Result<Box<dyn CoverageSink>> {
    Ok(Box::new(CoverageFile::open(path)?))
}

enum TraceState {
    Idle,
    Active(Arc<TraceSession>),
}

/// Coverage tracer bound to one host runtime
pub struct MiniTrace {
    host: HostRuntime,
    paths: TracePaths,
    instrumentation_key: String,
    filter: ClassFilter,
    classes: TraceableClasses,
    state: Mutex<TraceState>,
    dump_lock: Mutex<()>,
    open_sink: SinkOpener,
}

impl MiniTrace {
    /// Tracer writing to the files of the current uid
    pub fn new(host: HostRuntime, config: &Config) -> Self {
        Self::with_paths(host, config, config.paths())
    }

    pub fn with_paths(host: HostRuntime, config: &Config, paths: TracePaths) -> Self {
        Self {
            host,
            paths,
            instrumentation_key: config.trace.instrumentation_key.clone(),
            filter: ClassFilter::from_config(&config.filter),
            classes: TraceableClasses::new(),
            state: Mutex::new(TraceState::Idle),
            dump_lock: Mutex::new(()),
            open_sink: open_coverage_file,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.lock_state(), TraceState::Active(_))
    }

    /// The live session, if any
    pub fn session(&self) -> Option<Arc<TraceSession>> {
        match &*self.lock_state() {
            TraceState::Active(session) => Some(Arc::clone(session)),
            TraceState::Idle => None,
        }
    }

    pub fn paths(&self) -> &TracePaths {
        &self.paths
    }

    pub fn is_traceable(&self, id: ClassId) -> bool {
        self.classes.is_traceable(id)
    }

    pub fn traceable_count(&self) -> usize {
        self.classes.traceable_count()
    }

    /// Start tracing if the gate file is present and no session is active.
    ///
    /// Failures are logged and leave the tracer Idle.
    pub fn start(&self) {
        log_trace_info!("Trying to start");
        match self.try_start() {
            Ok(stats) => {
                log_trace_info!(
                    "Trace started",
                    classes = stats.visited,
                    traceable = stats.traceable
                );
                self.dump(MarkerKind::Start);
            }
            Err(TraceError::AlreadyActive) => {
                log_trace_error!("Trace already in progress, ignoring this request");
            }
            Err(e) => {
                log_trace_info!("Trace not started", reason = tracing::field::display(&e));
            }
        }
    }

    fn try_start(&self) -> Result<RegistrationStats> {
        if self.is_active() {
            return Err(TraceError::AlreadyActive);
        }
        self.check_gate()?;

        let _suspended = self.host.quiescer.suspend_all("MiniTrace::start");
        let mut state = self.lock_state();
        if matches!(*state, TraceState::Active(_)) {
            return Err(TraceError::AlreadyActive);
        }

        let session = Arc::new(TraceSession::new(&self.instrumentation_key));
        *state = TraceState::Active(Arc::clone(&session));

        let instrumentation = self.host.instrumentation.as_ref();
        instrumentation.add_listener(session);
        instrumentation.enable_method_tracing(&self.instrumentation_key);

        let registrar = ClassRegistrar::new(&self.filter, &self.classes, instrumentation, true);
        Ok(registrar.visit_all(self.host.registry.as_ref()))
    }

    fn check_gate(&self) -> Result<()> {
        let gate = &self.paths.gate;
        if !gate.exists() {
            return Err(TraceError::GateMissing(gate.display().to_string()));
        }
        File::open(gate).map_err(|source| TraceError::GateUnreadable {
            path: gate.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Stop tracing and write a full coverage dump.
    ///
    /// Logged and otherwise ignored when no session is active.
    pub fn stop(&self) {
        match self.try_stop() {
            Ok(()) => {
                log_trace_info!("Trace stopped");
                self.dump(MarkerKind::Dump);
            }
            Err(_) => {
                log_trace_error!("Trace stop requested, but no trace currently running");
            }
        }
    }

    fn try_stop(&self) -> Result<()> {
        let session = match std::mem::replace(&mut *self.lock_state(), TraceState::Idle) {
            TraceState::Active(session) => session,
            TraceState::Idle => return Err(TraceError::NotActive),
        };

        let _suspended = self.host.quiescer.suspend_all("MiniTrace::stop");
        let instrumentation = self.host.instrumentation.as_ref();
        instrumentation.disable_method_tracing(session.instrumentation_key());
        let listener: Arc<dyn InstrumentationListener> = session;
        instrumentation.remove_listener(&listener);
        Ok(())
    }

    /// Stop if active; a no-op otherwise
    pub fn shutdown(&self) {
        if self.is_active() {
            self.stop();
        }
    }

    /// Write an incremental dump of the running session and reset its hits
    pub fn dump_coverage_data(&self) {
        if !self.is_active() {
            log_trace_debug!("Coverage dump requested while idle, ignoring");
            return;
        }
        self.dump(MarkerKind::Dump);
    }

    /// Register a freshly prepared class
    pub fn post_class_prepare(&self, class: &dyn ClassInfo) {
        // Held so the class sees a settled Idle/Active state
        let state = self.lock_state();
        let active = matches!(*state, TraceState::Active(_));
        ClassRegistrar::new(
            &self.filter,
            &self.classes,
            self.host.instrumentation.as_ref(),
            active,
        )
        .visit(class);
    }

    fn dump(&self, kind: MarkerKind) {
        let _serialized = self.dump_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = &self.paths.coverage;
        log_dump_info!("Trying to write coverage data", marker = kind.as_str());

        let mut sink = match (self.open_sink)(path) {
            Ok(sink) => sink,
            Err(e) => {
                log_dump_warn!(
                    "Failed to open coverage data file",
                    path = tracing::field::display(path.display()),
                    error = tracing::field::display(&e)
                );
                return;
            }
        };

        let dumper = CoverageDumper::new(self.host.registry.as_ref(), &self.classes);
        let written = dumper.dump_into(sink.as_mut(), DumpMarker::now(kind));
        match written {
            Ok(records) => {
                log_dump_info!("Coverage data written", marker = kind.as_str(), records = records);
            }
            Err(e) => {
                log_dump_warn!(
                    "Failed to write coverage data file",
                    path = tracing::field::display(path.display()),
                    error = tracing::field::display(&e)
                );
                if let Err(e) = sink.discard() {
                    log_dump_warn!(
                        "Failed to erase partial coverage data",
                        error = tracing::field::display(&e)
                    );
                }
            }
        }
    }
}

impl ClassLoadCallback for MiniTrace {
    fn class_load(&self, _class: &dyn ClassInfo) {}

    fn class_prepare(&self, _temp: &dyn ClassInfo, class: &dyn ClassInfo) {
        self.post_class_prepare(class);
    }
}

static TRACER: OnceCell<MiniTrace> = OnceCell::new();

/// Install the process-wide tracer. Later calls keep the first tracer.
pub fn install(host: HostRuntime, config: &Config) -> &'static MiniTrace {
    let mut fresh = false;
    let tracer = TRACER.get_or_init(|| {
        fresh = true;
        MiniTrace::new(host, config)
    });
    if !fresh {
        log_trace_warn!("Tracer already installed, keeping the existing one");
    }
    tracer
}

/// The process-wide tracer, if installed
pub fn tracer() -> Option<&'static MiniTrace> {
    TRACER.get()
}

pub fn start() {
    match tracer() {
        Some(t) => t.start(),
        None => log_trace_warn!("Start requested before the tracer was installed"),
    }
}

pub fn stop() {
    match tracer() {
        Some(t) => t.stop(),
        None => log_trace_warn!("Stop requested before the tracer was installed"),
    }
}

pub fn shutdown() {
    if let Some(t) = tracer() {
        t.shutdown();
    }
}

pub fn dump_coverage_data() {
    if let Some(t) = tracer() {
        t.dump_coverage_data();
    }
}

pub fn is_active() -> bool {
    tracer().is_some_and(MiniTrace::is_active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ClassKind;
    use crate::testing::{FakeClass, FakeHost, FakeMethod, InstrumentationEvent};
    use minitrace_config::testing::TestEnvironment;

    const APP: &str = "/data/app/com.example-1/base.apk";

    fn tracer(host: &FakeHost, env: &TestEnvironment) -> MiniTrace {
        MiniTrace::with_paths(host.runtime(), &env.config, env.paths())
    }

    #[test]
    fn test_start_without_gate_stays_idle() {
        let env = TestEnvironment::new().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);

        t.start();
        assert!(!t.is_active());
        assert!(!env.has_coverage_file());
        assert!(host.instrumentation.events().is_empty());
        assert_eq!(host.quiescer.count(), 0);
    }

    #[test]
    fn test_start_registers_under_suspension() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let app = host.registry.add(FakeClass::new("La/Main;", APP));
        let framework =
            host.registry.add(FakeClass::new("Landroid/app/Activity;", "/system/framework/f.jar"));
        let t = tracer(&host, &env);

        t.start();
        assert!(t.is_active());
        assert!(t.is_traceable(app.id()));
        assert!(!t.is_traceable(framework.id()));
        assert_eq!(host.instrumentation.listener_count(), 1);
        assert!(host.instrumentation.is_tracing_enabled("MiniTracer"));
        assert_eq!(
            host.instrumentation.events(),
            vec![
                InstrumentationEvent::AddListener,
                InstrumentationEvent::EnableMethodTracing("MiniTracer".to_string()),
                InstrumentationEvent::InstallStubs(app.id()),
            ]
        );
        assert!(host.instrumentation.calls().iter().all(|c| c.suspended));
        assert!(!host.quiescer.is_suspended());

        let lines = env.coverage_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("Start\t{}\t", std::process::id())));
    }

    #[test]
    fn test_start_twice_changes_nothing() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        host.registry.add(FakeClass::new("La/Main;", APP));
        let t = tracer(&host, &env);

        t.start();
        let session = t.session().unwrap();
        let events = host.instrumentation.events();
        let contents = env.coverage_contents();

        t.start();
        assert!(Arc::ptr_eq(&session, &t.session().unwrap()));
        assert_eq!(host.instrumentation.events(), events);
        assert_eq!(env.coverage_contents(), contents);
        assert!(matches!(t.try_start(), Err(TraceError::AlreadyActive)));
    }

    #[test]
    fn test_stop_when_idle_changes_nothing() {
        let env = TestEnvironment::new().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);

        t.stop();
        t.shutdown();
        assert!(!t.is_active());
        assert!(host.instrumentation.events().is_empty());
        assert!(!env.has_coverage_file());
        assert!(matches!(t.try_stop(), Err(TraceError::NotActive)));
    }

    #[test]
    fn test_stop_unregisters_and_dumps() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let class = host.registry.add(
            FakeClass::new("Lcom/example/Main;", APP)
                .with_method(FakeMethod::with_entries("run", "()V", &[0, 1, 0])),
        );
        let t = tracer(&host, &env);

        t.start();
        host.instrumentation.clear_calls();
        t.stop();

        assert!(!t.is_active());
        assert_eq!(host.instrumentation.listener_count(), 0);
        assert!(!host.instrumentation.is_tracing_enabled("MiniTracer"));
        assert_eq!(
            host.instrumentation.events(),
            vec![
                InstrumentationEvent::DisableMethodTracing("MiniTracer".to_string()),
                InstrumentationEvent::RemoveListener,
            ]
        );
        assert!(host.instrumentation.calls().iter().all(|c| c.suspended));

        let lines = env.coverage_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Start\t"));
        assert!(lines[1].starts_with("Dump\t"));
        assert!(lines[2].ends_with("\tcom.example.Main\trun\t()V\tMain.java\t3\t010"));
        assert_eq!(
            class.method("run").unwrap().bitmap().unwrap().snapshot(),
            vec![0, 0, 0]
        );
    }

    #[test]
    fn test_shutdown_stops_active_session() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);

        t.start();
        t.shutdown();
        assert!(!t.is_active());
        t.shutdown();
        assert_eq!(env.coverage_lines().len(), 2);
    }

    #[test]
    fn test_class_prepare_installs_stubs_only_while_active() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);

        let early = FakeClass::new("La/Early;", APP);
        t.class_prepare(&early, &early);
        assert!(t.is_traceable(early.id()));
        assert!(host.instrumentation.stubbed_classes().is_empty());

        t.start();
        host.instrumentation.clear_calls();
        let late = FakeClass::new("La/Late;", APP);
        let proxy = FakeClass::new("L$Proxy1;", APP).with_kind(ClassKind::Proxy);
        t.class_load(&late);
        t.class_prepare(&late, &late);
        t.class_prepare(&proxy, &proxy);
        assert_eq!(host.instrumentation.stubbed_classes(), vec![late.id()]);
        assert!(!t.is_traceable(proxy.id()));
    }

    #[test]
    fn test_traceable_flag_survives_restart() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let class = host.registry.add(FakeClass::new("La/Main;", APP));
        let t = tracer(&host, &env);

        t.start();
        t.stop();
        assert!(t.is_traceable(class.id()));
        assert_eq!(t.traceable_count(), 1);

        host.instrumentation.clear_calls();
        t.start();
        assert!(t.is_active());
        assert_eq!(host.instrumentation.stubbed_classes(), vec![class.id()]);
        assert_eq!(t.traceable_count(), 1);
    }

    #[test]
    fn test_incremental_dump_resets_hits() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let class = host.registry.add(
            FakeClass::new("La/Main;", APP)
                .with_method(FakeMethod::with_entries("f", "()V", &[1, 0, 1, 1])),
        );
        let method = class.method("f").unwrap();
        let t = tracer(&host, &env);

        t.start();
        t.dump_coverage_data();
        assert!(env.coverage_lines()[2].ends_with("\t4\t1011"));
        assert_eq!(method.bitmap().unwrap().snapshot(), vec![0, 0, 0, 0]);

        t.dump_coverage_data();
        assert_eq!(env.coverage_lines().len(), 4);
        assert!(env.coverage_lines()[3].starts_with("Dump\t"));
    }

    #[test]
    fn test_dump_while_idle_is_ignored() {
        let env = TestEnvironment::new().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);
        t.dump_coverage_data();
        assert!(!env.has_coverage_file());
    }

    #[test]
    fn test_unopenable_coverage_file_keeps_hits() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let class = host.registry.add(
            FakeClass::new("La/Main;", APP)
                .with_method(FakeMethod::with_entries("f", "()V", &[0, 1])),
        );
        // A directory in place of the coverage file cannot be opened for append
        std::fs::create_dir(env.paths().coverage).unwrap();
        let t = tracer(&host, &env);

        t.start();
        assert!(t.is_active());
        t.stop();
        assert!(!t.is_active());
        assert_eq!(
            class.method("f").unwrap().bitmap().unwrap().snapshot(),
            vec![0, 1]
        );
    }

    /// Coverage file on a device that fills up after a few bytes
    struct FillingFile {
        file: CoverageFile,
        room: usize,
    }

    impl io::Write for FillingFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.room);
            if n == 0 {
                return Err(io::Error::from(nix::errno::Errno::ENOSPC));
            }
            let written = io::Write::write(&mut self.file, &buf[..n])?;
            self.room -= written;
            Ok(written)
        }

        fn flush(&mut self) -> io::Result<()> {
            io::Write::flush(&mut self.file)
        }
    }

    impl CoverageSink for FillingFile {
        fn discard(self: Box<Self>) -> io::Result<()> {
            self.file.discard()
        }
    }

    fn open_filling(path: &Path) -> io::Result<Box<dyn CoverageSink>> {
        Ok(Box::new(FillingFile {
            file: CoverageFile::open(path)?,
            room: 12,
        }))
    }

    #[test]
    fn test_full_disk_rolls_back_dump() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let class = host.registry.add(
            FakeClass::new("La/Main;", APP)
                .with_method(FakeMethod::with_entries("f", "()V", &[0, 1, 0])),
        );
        let bitmap = class.method("f").unwrap().bitmap().unwrap();
        let mut t = tracer(&host, &env);

        t.start();
        let before = env.coverage_contents();
        assert_eq!(env.coverage_lines().len(), 1);

        // Existing file: truncated back to what earlier dumps wrote
        t.open_sink = open_filling;
        t.dump_coverage_data();
        assert_eq!(env.coverage_contents(), before);
        assert_eq!(bitmap.snapshot(), vec![0, 1, 0]);

        // Fresh file: removed again
        std::fs::remove_file(env.paths().coverage).unwrap();
        t.stop();
        assert!(!t.is_active());
        assert!(!env.has_coverage_file());
        assert_eq!(bitmap.snapshot(), vec![0, 1, 0]);

        // The hits are still reported once the disk has room again
        t.open_sink = open_coverage_file;
        t.start();
        t.stop();
        let lines = env.coverage_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("	3	010"));
        assert_eq!(bitmap.snapshot(), vec![0, 0, 0]);
    }

    #[test]
    fn test_session_metadata() {
        let env = TestEnvironment::new().unwrap();
        env.enable_gate().unwrap();
        let host = FakeHost::new();
        let t = tracer(&host, &env);
        assert!(t.session().is_none());
        t.start();
        let session = t.session().unwrap();
        assert_eq!(session.instrumentation_key(), "MiniTracer");
        assert!(session.started_millis() > 0);
        assert_eq!(t.paths(), &env.paths());
    }
}
