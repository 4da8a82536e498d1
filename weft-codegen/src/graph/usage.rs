//! Verifies that every declaration in every consumed provider set ended up in at least one
//! injector's solution.  Declarations are identified by `Rc` pointer identity, which the solver
//! records as it satisfies types.

use crate::error::{ErrorCollector, WeftError};
use crate::spec::{ProviderSetSpecification, ProviderSetSrc};
use std::collections::HashSet;
use std::rc::Rc;

/// The set of declarations referenced by any solved plan, accumulated across all injectors
#[derive(Debug, Default)]
pub(crate) struct UsageTracker {
    used: HashSet<usize>,
}

impl UsageTracker {
    pub(crate) fn new() -> UsageTracker {
        UsageTracker {
            used: HashSet::new(),
        }
    }

    pub(crate) fn mark_ptr(&mut self, ptr: usize) {
        self.used.insert(ptr);
    }

    pub(crate) fn mark_src(&mut self, src: &ProviderSetSrc) {
        self.used.insert(src_ptr(src));
    }

    fn is_marked(&self, ptr: usize) -> bool {
        self.used.contains(&ptr)
    }
}

fn src_ptr(src: &ProviderSetSrc) -> usize {
    match src {
        ProviderSetSrc::Provider(p) => Rc::as_ptr(p) as *const () as usize,
        ProviderSetSrc::Binding(b) => Rc::as_ptr(b) as *const () as usize,
        ProviderSetSrc::Value(v) => Rc::as_ptr(v) as *const () as usize,
        ProviderSetSrc::Field(f) => Rc::as_ptr(f) as *const () as usize,
        ProviderSetSrc::InjectorArgs(a, _) => Rc::as_ptr(a) as *const () as usize,
    }
}

/// Walks the declaration trees of the given root sets (one per solved injector) and reports
/// every declaration the tracker never saw.  A wholly unused import is reported once as an
/// unused provider set rather than member by member; injector arguments are exempt.
pub(crate) fn verify_used(
    roots: &[&ProviderSetSpecification],
    usage: &UsageTracker,
    errors: &mut ErrorCollector,
) {
    let mut visited: HashSet<usize> = HashSet::new();
    for root in roots {
        check_set(root, usage, &mut visited, errors);
    }
}

fn check_set(
    set: &ProviderSetSpecification,
    usage: &UsageTracker,
    visited: &mut HashSet<usize>,
    errors: &mut ErrorCollector,
) {
    for provider in &set.providers {
        if !usage.is_marked(Rc::as_ptr(provider) as *const () as usize) {
            errors.add(
                WeftError::unused_declaration(format!("unused provider \"{}\"", provider.name()))
                    .at(provider.pos().clone()),
            );
        }
    }

    for binding in &set.bindings {
        if !usage.is_marked(Rc::as_ptr(binding) as *const () as usize) {
            errors.add(
                WeftError::unused_declaration(format!(
                    "unused interface binding for {}",
                    binding.iface()
                ))
                .at(binding.pos().clone()),
            );
        }
    }

    for value in &set.values {
        if !usage.is_marked(Rc::as_ptr(value) as *const () as usize) {
            let message = if value.is_interface_value() {
                format!("unused interface value for {}", value.out())
            } else {
                format!("unused value of type {}", value.out())
            };
            errors.add(WeftError::unused_declaration(message).at(value.pos().clone()));
        }
    }

    for field in &set.fields {
        if !usage.is_marked(Rc::as_ptr(field) as *const () as usize) {
            errors.add(
                WeftError::unused_declaration(format!(
                    "unused field \"{}\" of {}",
                    field.name(),
                    field.parent()
                ))
                .at(field.pos().clone()),
            );
        }
    }

    for import in &set.imports {
        if !visited.insert(Rc::as_ptr(import) as *const () as usize) {
            continue;
        }
        if !any_used(import, usage) {
            let name = import.name().unwrap_or("<anonymous>");
            errors.add(
                WeftError::unused_declaration(format!("unused provider set \"{}\"", name))
                    .at(import.pos().clone()),
            );
        } else {
            check_set(import, usage, visited, errors);
        }
    }
}

fn any_used(set: &ProviderSetSpecification, usage: &UsageTracker) -> bool {
    set.providers
        .iter()
        .any(|p| usage.is_marked(Rc::as_ptr(p) as *const () as usize))
        || set
            .bindings
            .iter()
            .any(|b| usage.is_marked(Rc::as_ptr(b) as *const () as usize))
        || set
            .values
            .iter()
            .any(|v| usage.is_marked(Rc::as_ptr(v) as *const () as usize))
        || set
            .fields
            .iter()
            .any(|f| usage.is_marked(Rc::as_ptr(f) as *const () as usize))
        || set.imports.iter().any(|i| any_used(i, usage))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorCollector;
    use crate::graph::map::build_maps;
    use crate::graph::solve::solve;
    use crate::testdata::synth;

    #[test]
    fn solved_declarations_are_not_reported() {
        let mut set = synth::set(vec![
            synth::provider("new_a", vec![], "A"),
            synth::provider("new_b", vec!["A"], "B"),
        ]);
        let mut errors = ErrorCollector::new();
        build_maps(&mut set, &mut errors);
        let mut usage = UsageTracker::new();
        solve(&synth::key("B"), &set, &mut usage, &mut errors).unwrap();

        verify_used(&[&set], &usage, &mut errors);
        assert!(errors.is_empty(), "{:?}", errors.into_errors());
    }

    #[test]
    fn unreached_providers_are_reported_by_name() {
        let mut set = synth::set(vec![
            synth::provider("new_a", vec![], "A"),
            synth::provider("new_orphan", vec![], "Orphan"),
        ]);
        let mut errors = ErrorCollector::new();
        build_maps(&mut set, &mut errors);
        let mut usage = UsageTracker::new();
        solve(&synth::key("A"), &set, &mut usage, &mut errors).unwrap();

        verify_used(&[&set], &usage, &mut errors);
        let errors = errors.into_errors();
        assert_eq!(1, errors.len());
        assert!(
            errors[0].to_string().contains("unused provider \"new_orphan\""),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn a_wholly_unused_import_is_reported_once_as_a_set() {
        let inner = synth::named_set(
            "EXTRAS",
            vec![
                synth::provider("new_x", vec![], "X"),
                synth::provider("new_y", vec![], "Y"),
            ],
        );
        let mut set = synth::set(vec![synth::provider("new_a", vec![], "A")]);
        set.imports.push(Rc::new(inner));

        let mut errors = ErrorCollector::new();
        build_maps(&mut set, &mut errors);
        let mut usage = UsageTracker::new();
        solve(&synth::key("A"), &set, &mut usage, &mut errors).unwrap();

        verify_used(&[&set], &usage, &mut errors);
        let errors = errors.into_errors();
        assert_eq!(1, errors.len());
        assert!(
            errors[0].to_string().contains("unused provider set \"EXTRAS\""),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn a_partially_used_import_reports_only_its_unused_members() {
        let inner = synth::named_set(
            "EXTRAS",
            vec![
                synth::provider("new_a", vec![], "A"),
                synth::provider("new_orphan", vec![], "Orphan"),
            ],
        );
        let mut set = synth::set(vec![]);
        set.imports.push(Rc::new(inner));

        let mut errors = ErrorCollector::new();
        build_maps(&mut set, &mut errors);
        let mut usage = UsageTracker::new();
        solve(&synth::key("A"), &set, &mut usage, &mut errors).unwrap();

        verify_used(&[&set], &usage, &mut errors);
        let errors = errors.into_errors();
        assert_eq!(1, errors.len());
        assert!(
            errors[0].to_string().contains("unused provider \"new_orphan\""),
            "{}",
            errors[0]
        );
    }
}
