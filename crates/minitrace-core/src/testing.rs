//! In-memory host for exercising the tracer without a virtual machine.
//!
//! # Usage
//!
//! ```ignore
//! use minitrace_core::testing::{FakeClass, FakeHost, FakeMethod};
//!
//! let host = FakeHost::new();
//! let class = host.registry.add(
//!     FakeClass::new("Lcom/example/Main;", "/data/app/base.apk")
//!         .with_method(FakeMethod::with_entries("run", "()V", &[0, 1, 0])),
//! );
//! let tracer = MiniTrace::with_paths(host.runtime(), &config, paths);
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::bitmap::CoverageBitmap;
use crate::host::{
    ClassId, ClassInfo, ClassKind, ClassRegistry, HostRuntime, Instrumentation,
    InstrumentationListener, MethodInfo,
};
use crate::quiesce::{Quiesce, SuspendGuard};

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_METHOD_ID: AtomicUsize = AtomicUsize::new(0x7000_1000);

/// Method with a fixed body length and an optional bitmap
#[derive(Debug)]
pub struct FakeMethod {
    identity: usize,
    declaring: String,
    name: String,
    signature: String,
    source_file: Option<String>,
    insns_size: u32,
    has_code: bool,
    coverage: Option<Arc<CoverageBitmap>>,
}

impl FakeMethod {
    /// Method with `insns_size` code units and a clear bitmap of the same length
    pub fn new(name: &str, signature: &str, insns_size: u32) -> Self {
        Self {
            identity: NEXT_METHOD_ID.fetch_add(0x20, Ordering::Relaxed),
            declaring: String::new(),
            name: name.to_string(),
            signature: signature.to_string(),
            source_file: Some("Main.java".to_string()),
            insns_size,
            has_code: true,
            coverage: Some(Arc::new(CoverageBitmap::for_code_units(insns_size))),
        }
    }

    /// Method whose bitmap starts with `entries`, one code unit per entry
    pub fn with_entries(name: &str, signature: &str, entries: &[u8]) -> Self {
        let mut method = Self::new(name, signature, entries.len() as u32);
        method.coverage = Some(Arc::new(CoverageBitmap::from_entries(entries)));
        method
    }

    pub fn without_code(mut self) -> Self {
        self.has_code = false;
        self
    }

    pub fn without_bitmap(mut self) -> Self {
        self.coverage = None;
        self
    }

    pub fn with_source_file(mut self, source_file: Option<&str>) -> Self {
        self.source_file = source_file.map(str::to_string);
        self
    }

    pub fn with_insns_size(mut self, insns_size: u32) -> Self {
        self.insns_size = insns_size;
        self
    }

    pub fn bitmap(&self) -> Option<Arc<CoverageBitmap>> {
        self.coverage.clone()
    }

    /// Record a hit the way the interpreter would
    pub fn execute(&self, index: usize) {
        if let Some(bitmap) = &self.coverage {
            bitmap.mark(index);
        }
    }
}

impl MethodInfo for FakeMethod {
    fn identity(&self) -> usize {
        self.identity
    }

    fn has_code(&self) -> bool {
        self.has_code
    }

    fn insns_size(&self) -> u32 {
        self.insns_size
    }

    fn coverage(&self) -> Option<Arc<CoverageBitmap>> {
        self.coverage.clone()
    }

    fn declaring_class_descriptor(&self) -> &str {
        &self.declaring
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }
}

/// Class with a kind, a defining location and declared methods
#[derive(Debug)]
pub struct FakeClass {
    id: ClassId,
    kind: ClassKind,
    descriptor: String,
    location: String,
    methods: Vec<Arc<FakeMethod>>,
}

impl FakeClass {
    pub fn new(descriptor: &str, location: &str) -> Self {
        Self {
            id: NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed),
            kind: ClassKind::Ordinary,
            descriptor: descriptor.to_string(),
            location: location.to_string(),
            methods: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_method(mut self, mut method: FakeMethod) -> Self {
        method.declaring = self.descriptor.clone();
        self.methods.push(Arc::new(method));
        self
    }

    /// Declared method by name
    pub fn method(&self, name: &str) -> Option<Arc<FakeMethod>> {
        self.methods.iter().find(|m| m.name == name).cloned()
    }
}

impl ClassInfo for FakeClass {
    fn id(&self) -> ClassId {
        self.id
    }

    fn kind(&self) -> ClassKind {
        self.kind
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn for_each_method(&self, visitor: &mut dyn FnMut(&dyn MethodInfo)) {
        for method in &self.methods {
            visitor(method.as_ref());
        }
    }
}

/// Registry backed by a list of classes
#[derive(Debug, Default)]
pub struct FakeRegistry {
    classes: RwLock<Vec<Arc<FakeClass>>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a class; returns the shared handle
    pub fn add(&self, class: FakeClass) -> Arc<FakeClass> {
        let class = Arc::new(class);
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&class));
        class
    }

    pub fn len(&self) -> usize {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClassRegistry for FakeRegistry {
    fn for_each_loaded_class(&self, visitor: &mut dyn FnMut(&dyn ClassInfo) -> bool) {
        // Snapshot so visitors may load classes without deadlocking
        let classes = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for class in classes {
            if !visitor(class.as_ref()) {
                break;
            }
        }
    }
}

/// Quiescer that only tracks whether a stop-the-world window is open
#[derive(Debug, Default)]
pub struct CountingQuiescer {
    suspended: AtomicBool,
    count: AtomicUsize,
}

impl CountingQuiescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Quiesce for CountingQuiescer {
    fn suspend_all(&self, cause: &'static str) -> SuspendGuard<'_> {
        self.suspended.store(true, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
        SuspendGuard::new(cause, move || self.suspended.store(false, Ordering::SeqCst))
    }
}

/// Dispatcher call as seen by [`RecordingInstrumentation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationEvent {
    AddListener,
    RemoveListener,
    EnableMethodTracing(String),
    DisableMethodTracing(String),
    InstallStubs(ClassId),
}

/// Dispatcher call plus whether all threads were suspended at the time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub event: InstrumentationEvent,
    pub suspended: bool,
}

/// Dispatcher that records every call
pub struct RecordingInstrumentation {
    quiescer: Arc<CountingQuiescer>,
    calls: Mutex<Vec<RecordedCall>>,
    listeners: Mutex<Vec<Arc<dyn InstrumentationListener>>>,
    tracing_keys: Mutex<HashSet<String>>,
}

impl RecordingInstrumentation {
    pub fn new(quiescer: Arc<CountingQuiescer>) -> Self {
        Self {
            quiescer,
            calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            tracing_keys: Mutex::new(HashSet::new()),
        }
    }

    fn record(&self, event: InstrumentationEvent) {
        let suspended = self.quiescer.is_suspended();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall { event, suspended });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<InstrumentationEvent> {
        self.calls().into_iter().map(|c| c.event).collect()
    }

    pub fn stubbed_classes(&self) -> Vec<ClassId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InstrumentationEvent::InstallStubs(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Currently registered listeners
    pub fn listeners(&self) -> Vec<Arc<dyn InstrumentationListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_tracing_enabled(&self, key: &str) -> bool {
        self.tracing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn add_listener(&self, listener: Arc<dyn InstrumentationListener>) {
        self.record(InstrumentationEvent::AddListener);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn InstrumentationListener>) {
        self.record(InstrumentationEvent::RemoveListener);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn enable_method_tracing(&self, key: &str) {
        self.record(InstrumentationEvent::EnableMethodTracing(key.to_string()));
        self.tracing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    fn disable_method_tracing(&self, key: &str) {
        self.record(InstrumentationEvent::DisableMethodTracing(key.to_string()));
        self.tracing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn install_stubs_for_class(&self, class: &dyn ClassInfo) {
        self.record(InstrumentationEvent::InstallStubs(class.id()));
    }
}

/// Registry, dispatcher and quiescer wired together
pub struct FakeHost {
    pub registry: Arc<FakeRegistry>,
    pub instrumentation: Arc<RecordingInstrumentation>,
    pub quiescer: Arc<CountingQuiescer>,
}

impl FakeHost {
    pub fn new() -> Self {
        let quiescer = Arc::new(CountingQuiescer::new());
        Self {
            registry: Arc::new(FakeRegistry::new()),
            instrumentation: Arc::new(RecordingInstrumentation::new(Arc::clone(&quiescer))),
            quiescer,
        }
    }

    pub fn runtime(&self) -> HostRuntime {
        HostRuntime::new(
            self.registry.clone(),
            self.instrumentation.clone(),
            self.quiescer.clone(),
        )
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}
