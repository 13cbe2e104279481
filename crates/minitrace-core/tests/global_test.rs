//! Process-wide tracer entry points
//!
//! Kept in its own test binary because the tracer can only be installed once
//! per process.

use minitrace_config::testing::TestEnvironment;
use minitrace_core::testing::{FakeClass, FakeHost, FakeMethod};
use minitrace_core::ClassLoadCallback;

#[test]
fn test_global_lifecycle() {
    // Nothing installed yet: every entry point is a logged no-op
    assert!(minitrace_core::tracer().is_none());
    minitrace_core::start();
    minitrace_core::stop();
    minitrace_core::shutdown();
    minitrace_core::dump_coverage_data();
    assert!(!minitrace_core::is_active());

    let env = TestEnvironment::new().unwrap();
    env.enable_gate().unwrap();
    let host = FakeHost::new();
    let class = host.registry.add(
        FakeClass::new("Lcom/example/Main;", "/data/app/base.apk")
            .with_method(FakeMethod::with_entries("run", "()V", &[1, 1])),
    );

    // Files follow the process uid, which the environment also uses
    let tracer = minitrace_core::install(host.runtime(), &env.config);
    assert_eq!(tracer.paths(), &env.paths());

    let other = FakeHost::new();
    let again = minitrace_core::install(other.runtime(), &env.config);
    assert!(std::ptr::eq(tracer, again));

    minitrace_core::start();
    assert!(minitrace_core::is_active());

    let late = FakeClass::new("Lcom/example/Late;", "/data/app/base.apk");
    tracer.class_prepare(&late, &late);
    assert_eq!(host.instrumentation.stubbed_classes().len(), 2);

    minitrace_core::dump_coverage_data();
    minitrace_core::shutdown();
    assert!(!minitrace_core::is_active());
    minitrace_core::shutdown();

    let lines = env.coverage_lines();
    assert_eq!(lines.len(), 4);
    assert!(lines[2].ends_with("\t2\t11"));
    assert!(lines[3].starts_with("Dump\t"));
    assert!(!class.method("run").unwrap().bitmap().unwrap().any_hit());
}
