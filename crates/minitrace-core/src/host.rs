//! Interfaces the host virtual machine provides to the tracer.
//!
//! Nothing here owns VM state. Class and method metadata are borrowed for the
//! duration of a callback; coverage bitmaps are shared through `Arc` because
//! the execution hot path keeps writing to them while a dump reads them.

use std::sync::Arc;

use crate::bitmap::CoverageBitmap;
use crate::quiesce::Quiesce;

/// Stable identity of a loaded class for the lifetime of the process
pub type ClassId = u64;

/// Shape of a class as far as eligibility is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Ordinary,
    Array,
    Interface,
    Primitive,
    /// Dynamically generated proxy class
    Proxy,
}

/// Class metadata query
pub trait ClassInfo: Send + Sync {
    fn id(&self) -> ClassId;

    fn kind(&self) -> ClassKind;

    /// Location of the bytecode file that defines this class
    fn location(&self) -> &str;

    /// Type descriptor, e.g. `Lcom/example/Foo;`
    fn descriptor(&self) -> &str;

    /// Visit every declared method of the class
    fn for_each_method(&self, visitor: &mut dyn FnMut(&dyn MethodInfo));
}

/// Method metadata query
pub trait MethodInfo {
    /// Opaque token identifying the method in dump records
    fn identity(&self) -> usize;

    /// Whether the method has bytecode (abstract and native methods do not)
    fn has_code(&self) -> bool;

    /// Length of the bytecode in 16-bit code units
    fn insns_size(&self) -> u32;

    /// Coverage bitmap, if the host allocated one
    fn coverage(&self) -> Option<Arc<CoverageBitmap>>;

    fn declaring_class_descriptor(&self) -> &str;

    fn name(&self) -> &str;

    /// Method signature, e.g. `(ILjava/lang/String;)V`
    fn signature(&self) -> &str;

    fn source_file(&self) -> Option<&str>;
}

/// Opaque handle to a host thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRef(pub u64);

/// Opaque handle to a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub u64);

/// Opaque handle to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef(pub u64);

/// Opaque handle to an interpreter frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef(pub u64);

/// Raw bits of a primitive or reference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawValue(pub u64);

/// Callbacks the instrumentation dispatcher invokes during execution.
///
/// Every callback defaults to doing nothing.
#[allow(unused_variables)]
pub trait InstrumentationListener: Send + Sync {
    fn method_entered(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        dex_pc: u32,
    ) {
    }

    fn method_exited(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        dex_pc: u32,
        return_value: RawValue,
    ) {
    }

    fn method_unwind(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        dex_pc: u32,
    ) {
    }

    fn dex_pc_moved(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        new_dex_pc: u32,
    ) {
    }

    fn field_read(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        dex_pc: u32,
        field: FieldRef,
    ) {
    }

    fn field_written(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        method: &dyn MethodInfo,
        dex_pc: u32,
        field: FieldRef,
        value: RawValue,
    ) {
    }

    fn exception_thrown(&self, thread: ThreadRef, exception: ObjectRef) {}

    fn exception_handled(&self, thread: ThreadRef, exception: ObjectRef) {}

    fn branch(&self, thread: ThreadRef, method: &dyn MethodInfo, dex_pc: u32, dex_pc_offset: i32) {}

    fn invoke_virtual_or_interface(
        &self,
        thread: ThreadRef,
        this_object: Option<ObjectRef>,
        caller: &dyn MethodInfo,
        dex_pc: u32,
        callee: &dyn MethodInfo,
    ) {
    }

    fn watched_frame_pop(&self, thread: ThreadRef, frame: FrameRef) {}
}

/// The host's method-instrumentation dispatcher
pub trait Instrumentation: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn InstrumentationListener>);

    fn remove_listener(&self, listener: &Arc<dyn InstrumentationListener>);

    fn enable_method_tracing(&self, key: &str);

    fn disable_method_tracing(&self, key: &str);

    /// Route future executions of the class's methods through the instrumented entry points
    fn install_stubs_for_class(&self, class: &dyn ClassInfo);
}

/// The host's registry of loaded classes
pub trait ClassRegistry: Send + Sync {
    /// Visit loaded classes until the visitor returns `false`
    fn for_each_loaded_class(&self, visitor: &mut dyn FnMut(&dyn ClassInfo) -> bool);
}

/// Hooks the class-loading pipeline calls for every class it loads
pub trait ClassLoadCallback: Send + Sync {
    fn class_load(&self, class: &dyn ClassInfo);

    /// `temp` is the placeholder class the pipeline replaced with `class`
    fn class_prepare(&self, temp: &dyn ClassInfo, class: &dyn ClassInfo);
}

/// Everything the tracer needs from the host
#[derive(Clone)]
pub struct HostRuntime {
    pub registry: Arc<dyn ClassRegistry>,
    pub instrumentation: Arc<dyn Instrumentation>,
    pub quiescer: Arc<dyn Quiesce>,
}

impl HostRuntime {
    pub fn new(
        registry: Arc<dyn ClassRegistry>,
        instrumentation: Arc<dyn Instrumentation>,
        quiescer: Arc<dyn Quiesce>,
    ) -> Self {
        Self {
            registry,
            instrumentation,
            quiescer,
        }
    }
}
