//! Class eligibility filter.
//!
//! Arrays, interfaces, primitives and proxies never take part in coverage
//! tracking, nor do classes defined by files under the system framework
//! prefix. Everything else does.

use minitrace_config::{FilterConfig, DEFAULT_FRAMEWORK_PREFIX};

use crate::host::{ClassInfo, ClassKind};

#[derive(Debug, Clone)]
pub struct ClassFilter {
    framework_prefix: String,
}

impl ClassFilter {
    pub fn new(framework_prefix: impl Into<String>) -> Self {
        Self {
            framework_prefix: framework_prefix.into(),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(config.framework_prefix.clone())
    }

    pub fn framework_prefix(&self) -> &str {
        &self.framework_prefix
    }

    /// Whether `class` participates in coverage tracking.
    ///
    /// The location check is a literal prefix match on the string the host
    /// reports, without any path normalization.
    pub fn is_eligible(&self, class: &dyn ClassInfo) -> bool {
        if !matches!(class.kind(), ClassKind::Ordinary) {
            return false;
        }
        !class.location().starts_with(self.framework_prefix.as_str())
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMEWORK_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClass;

    const APP: &str = "/data/app/com.example-1/base.apk";

    #[test]
    fn test_special_kinds_are_never_eligible() {
        let filter = ClassFilter::default();
        for kind in [
            ClassKind::Array,
            ClassKind::Interface,
            ClassKind::Primitive,
            ClassKind::Proxy,
        ] {
            let class = FakeClass::new("Lcom/example/A;", APP).with_kind(kind);
            assert!(!filter.is_eligible(&class), "{kind:?} must be rejected");
        }
    }

    #[test]
    fn test_app_class_is_eligible() {
        let filter = ClassFilter::default();
        let class = FakeClass::new("Lcom/example/Main;", APP);
        assert!(filter.is_eligible(&class));
    }

    #[test]
    fn test_framework_class_is_rejected() {
        let filter = ClassFilter::default();
        let class = FakeClass::new("Landroid/app/Activity;", "/system/framework/framework.jar");
        assert!(!filter.is_eligible(&class));
    }

    #[test]
    fn test_prefix_match_is_literal() {
        let filter = ClassFilter::default();
        // Not normalized: these do not start with the literal prefix
        for location in [
            "/system//framework/core.jar",
            "/system/framework",
            "system/framework/core.jar",
            "/System/framework/core.jar",
        ] {
            let class = FakeClass::new("La/B;", location);
            assert!(filter.is_eligible(&class), "{location} should be eligible");
        }
        let class = FakeClass::new("La/B;", "/system/framework/../app/x.apk");
        assert!(!filter.is_eligible(&class));
    }

    #[test]
    fn test_custom_prefix_from_config() {
        let filter = ClassFilter::from_config(&FilterConfig {
            framework_prefix: "/apex/".to_string(),
        });
        assert_eq!(filter.framework_prefix(), "/apex/");
        assert!(!filter.is_eligible(&FakeClass::new("La/B;", "/apex/art/core.jar")));
        assert!(filter.is_eligible(&FakeClass::new("La/B;", "/system/framework/x.jar")));
    }
}
