//! Class registration: applying the filter to loaded classes.
//!
//! The eligibility decision for a class is made the first time the class is
//! seen and remembered in [`TraceableClasses`] for the rest of the process,
//! across any number of trace sessions. Stubs are only requested while a
//! session is active.

use dashmap::DashMap;
use minitrace_config::log_filter_debug;

use crate::filter::ClassFilter;
use crate::host::{ClassId, ClassInfo, ClassRegistry, Instrumentation};

/// Side-table of eligibility decisions, keyed by class identity
#[derive(Debug, Default)]
pub struct TraceableClasses {
    decisions: DashMap<ClassId, bool>,
}

impl TraceableClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembered decision for `class`, computing it with `filter` on first sight
    pub fn decide(&self, filter: &ClassFilter, class: &dyn ClassInfo) -> bool {
        *self
            .decisions
            .entry(class.id())
            .or_insert_with(|| filter.is_eligible(class))
    }

    /// Whether the class was marked traceable
    pub fn is_traceable(&self, id: ClassId) -> bool {
        self.decisions.get(&id).is_some_and(|d| *d)
    }

    /// Number of classes marked traceable
    pub fn traceable_count(&self) -> usize {
        self.decisions.iter().filter(|d| *d.value()).count()
    }

    /// Number of classes with a decision, traceable or not
    pub fn decided_count(&self) -> usize {
        self.decisions.len()
    }
}

/// Counts from one bulk registration pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStats {
    pub visited: usize,
    pub traceable: usize,
}

/// Applies the filter to classes and installs stubs for traceable ones
pub struct ClassRegistrar<'a> {
    filter: &'a ClassFilter,
    classes: &'a TraceableClasses,
    instrumentation: &'a dyn Instrumentation,
    install_stubs: bool,
}

impl<'a> ClassRegistrar<'a> {
    /// `install_stubs` must reflect whether a trace session is active
    pub fn new(
        filter: &'a ClassFilter,
        classes: &'a TraceableClasses,
        instrumentation: &'a dyn Instrumentation,
        install_stubs: bool,
    ) -> Self {
        Self {
            filter,
            classes,
            instrumentation,
            install_stubs,
        }
    }

    /// Register one class; returns whether it is traceable
    pub fn visit(&self, class: &dyn ClassInfo) -> bool {
        if !self.classes.decide(self.filter, class) {
            log_filter_debug!(
                "Class not traceable",
                class = class.descriptor(),
                location = class.location()
            );
            return false;
        }
        if self.install_stubs {
            self.instrumentation.install_stubs_for_class(class);
        }
        true
    }

    /// Register every class currently loaded in `registry`.
    ///
    /// The caller must keep the registry stable for the duration, which the
    /// session does by holding a stop-the-world guard.
    pub fn visit_all(&self, registry: &dyn ClassRegistry) -> RegistrationStats {
        let mut stats = RegistrationStats::default();
        registry.for_each_loaded_class(&mut |class| {
            stats.visited += 1;
            if self.visit(class) {
                stats.traceable += 1;
            }
            true
        });
        stats
    }
}
