//! # critest-suite
//!
//! The conformance specifications. Every group registers itself below the
//! `[k8s.io]` root; [`register_all`] builds the complete tree the binary
//! runs. Linux feature groups probe the runtime and the host first and skip
//! when the feature is unavailable.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod apparmor;
pub mod container;
pub mod idempotence;
pub mod image;
pub mod mount_propagation;
pub mod networking;
pub mod oom;
pub mod rro;
pub mod runtime_info;
pub mod sandbox;
pub mod seccomp;
pub mod security_context;
pub mod selinux;
pub mod streaming;
pub mod userns;

mod probe;

use critest_fixtures::Framework;
use critest_runner::Registry;

/// Description of the root group.
pub const ROOT: &str = "[k8s.io]";

/// Registers every group of the suite.
pub fn register_all(registry: &mut Registry<Framework>) {
    registry.describe(ROOT, |root| {
        runtime_info::register(root);
        sandbox::register(root);
        container::register(root);
        image::register(root);
        streaming::register(root);
        networking::register(root);
        security_context::register(root);
        apparmor::register(root);
        selinux::register(root);
        seccomp::register(root);
        userns::register(root);
        mount_propagation::register(root);
        rro::register(root);
        oom::register(root);
        idempotence::register(root);
    });
    tracing::debug!(specs = registry.spec_count(), "suite registered");
}

/// A registry holding the whole suite.
#[must_use]
pub fn registry() -> Registry<Framework> {
    let mut registry = Registry::new();
    register_all(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use critest_runner::{Filter, Runner};

    use super::*;

    #[test]
    fn every_group_registers_specs() {
        let registry = registry();
        let names: Vec<&str> = registry
            .groups()
            .flat_map(|root| root.groups())
            .map(|group| group.description())
            .collect();
        assert!(names.contains(&"PodSandbox"));
        assert!(names.contains(&"Mount propagation"));
        assert!(registry.spec_count() > 80);
    }

    #[test]
    fn full_texts_are_unique() {
        let listed = Runner::list(&registry(), &Filter::all());
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), listed.len());
        assert!(listed.iter().all(|text| text.starts_with(ROOT)));
    }

    #[test]
    fn focus_selects_conformance_subsets() {
        let registry = registry();
        let filter = Filter::new(Some("OOMKilled"), None).unwrap();
        let listed = Runner::list(&registry, &filter);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].contains("exitCode 137"));

        let filter = Filter::new(Some(r"\[Conformance\]"), Some("AppArmor|SELinux")).unwrap();
        let listed = Runner::list(&registry, &filter);
        assert!(!listed.is_empty());
        assert!(listed.iter().all(|t| !t.contains("AppArmor") && !t.contains("SELinux")));
    }
}
