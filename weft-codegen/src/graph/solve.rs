//! The dependency solver.  Given one output type and a built, acyclic provider map, computes
//! the minimal topologically ordered list of calls that materializes the output from the
//! injector's arguments.  Resolution is depth first with memoization, and inputs are resolved
//! in the declaration order of the consuming provider's parameter list, which makes the emitted
//! plan reproducible byte for byte.

use crate::error::{ErrorCollector, Pos, WeftError};
use crate::graph::usage::UsageTracker;
use crate::model::{PackageId, TypeKey, TypeMap};
use crate::spec::{
    ProvidedType, ProviderKind, ProviderSetSpecification, ValueSpecification,
};
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallKind {
    Function,
    StructLiteral,
    Value,
    FieldAccess,
}

/// Where a call input (or the injector's final output) comes from: a previous call's output or
/// one of the injector's formal arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceRef {
    Call(usize),
    Arg(usize),
}

/// One step of a solved plan
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub kind: CallKind,
    /// Function name, struct name, or field name; empty for values
    pub name: String,
    /// Declaring package for functions and struct literals
    pub pkg: Option<PackageId>,
    pub inputs_from: Vec<SourceRef>,
    /// For struct literals, the field each input fills (parallel to `inputs_from`)
    pub input_fields: Vec<Option<String>>,
    pub output: TypeKey,
    pub has_cleanup: bool,
    pub has_error: bool,
    pub variadic: bool,
    pub pos: Pos,
    #[serde(skip)]
    pub value: Option<Rc<ValueSpecification>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectorPlan {
    pub calls: Vec<Call>,
    /// Where the injector's declared output comes from
    pub output: SourceRef,
    pub needs_cleanup: bool,
    pub needs_error: bool,
}

/// Solves one injector's output type against a frozen set.  Returns `None` (with `no_provider`
/// diagnostics recorded) when any transitively required type has no entry in the map.
pub(crate) fn solve(
    output: &TypeKey,
    set: &ProviderSetSpecification,
    usage: &mut UsageTracker,
    errors: &mut ErrorCollector,
) -> Option<InjectorPlan> {
    let mut solver = Solver {
        set,
        usage,
        errors,
        calls: Vec::new(),
        satisfied: TypeMap::new(),
        missing: TypeMap::new(),
        emitted: HashMap::new(),
        stack: Vec::new(),
    };

    let output_src = solver.resolve(output)?;

    Some(InjectorPlan {
        needs_cleanup: solver.calls.iter().any(|c| c.has_cleanup),
        needs_error: solver.calls.iter().any(|c| c.has_error),
        calls: solver.calls,
        output: output_src,
    })
}

struct Frame {
    label: String,
    pos: Pos,
}

struct Solver<'a> {
    set: &'a ProviderSetSpecification,
    usage: &'a mut UsageTracker,
    errors: &'a mut ErrorCollector,
    calls: Vec<Call>,
    /// Memo of already-resolved request types
    satisfied: TypeMap<SourceRef>,
    /// Types already reported missing, so each gets exactly one diagnostic
    missing: TypeMap<()>,
    /// Declarations that already emitted a call, keyed by `Rc` pointer identity.  An interface
    /// binding and its concrete type share the declaration, so they share the call.
    emitted: HashMap<usize, usize>,
    stack: Vec<Frame>,
}

impl<'a> Solver<'a> {
    fn resolve(&mut self, key: &TypeKey) -> Option<SourceRef> {
        if let Some(src) = self.satisfied.get(key).copied() {
            return Some(src);
        }
        if self.missing.contains_key(key) {
            return None;
        }

        let set = self.set;
        let provided = match set.provider_map().get(key) {
            Some(provided) => provided,
            None => {
                self.report_missing(key);
                return None;
            }
        };

        if let Some(src) = set.src_map().get(key) {
            self.usage.mark_src(src);
        }

        let src_ref = match provided {
            ProvidedType::Arg { index, .. } => SourceRef::Arg(*index),

            ProvidedType::Value { out, value } => {
                let ptr = Rc::as_ptr(value) as *const () as usize;
                match self.emitted.get(&ptr) {
                    Some(&idx) => SourceRef::Call(idx),
                    None => {
                        self.usage.mark_ptr(ptr);
                        let idx = self.calls.len();
                        self.calls.push(Call {
                            kind: CallKind::Value,
                            name: String::new(),
                            pkg: None,
                            inputs_from: Vec::new(),
                            input_fields: Vec::new(),
                            output: out.clone(),
                            has_cleanup: false,
                            has_error: false,
                            variadic: false,
                            pos: value.pos().clone(),
                            value: Some(value.clone()),
                        });
                        self.emitted.insert(ptr, idx);
                        SourceRef::Call(idx)
                    }
                }
            }

            ProvidedType::Provider { out, provider } => {
                let ptr = Rc::as_ptr(provider) as *const () as usize;
                match self.emitted.get(&ptr) {
                    Some(&idx) => SourceRef::Call(idx),
                    None => {
                        self.usage.mark_ptr(ptr);

                        let label = match provider.set_name() {
                            Some(set_name) => format!(
                                "needed by {}::{} in provider set \"{}\"",
                                provider.pkg().import_path,
                                provider.name(),
                                set_name
                            ),
                            None => format!(
                                "needed by {}::{}",
                                provider.pkg().import_path,
                                provider.name()
                            ),
                        };
                        self.stack.push(Frame {
                            label,
                            pos: provider.pos().clone(),
                        });

                        let mut inputs_from = Vec::new();
                        let mut complete = true;
                        for input in provider.inputs() {
                            match self.resolve(&input.key) {
                                Some(src) => inputs_from.push(src),
                                //Keep resolving the remaining inputs so every missing type is
                                //reported, then give up on this provider
                                None => complete = false,
                            }
                        }
                        self.stack.pop();

                        if !complete {
                            return None;
                        }

                        let idx = self.calls.len();
                        self.calls.push(Call {
                            kind: match provider.kind() {
                                ProviderKind::Function => CallKind::Function,
                                ProviderKind::StructLiteral => CallKind::StructLiteral,
                            },
                            name: provider.name().to_owned(),
                            pkg: Some(provider.pkg().clone()),
                            inputs_from,
                            input_fields: provider
                                .inputs()
                                .iter()
                                .map(|i| i.field.clone())
                                .collect(),
                            output: out.clone(),
                            has_cleanup: provider.has_cleanup(),
                            has_error: provider.has_error(),
                            variadic: provider.variadic(),
                            pos: provider.pos().clone(),
                            value: None,
                        });
                        self.emitted.insert(ptr, idx);
                        SourceRef::Call(idx)
                    }
                }
            }

            ProvidedType::Field { out, field } => {
                let ptr = Rc::as_ptr(field) as *const () as usize;
                match self.emitted.get(&ptr) {
                    Some(&idx) => SourceRef::Call(idx),
                    None => {
                        self.usage.mark_ptr(ptr);
                        self.stack.push(Frame {
                            label: format!(
                                "needed by field \"{}\" of {}",
                                field.name(),
                                field.parent()
                            ),
                            pos: field.pos().clone(),
                        });
                        let parent = self.resolve(field.parent());
                        self.stack.pop();
                        let parent = parent?;

                        let idx = self.calls.len();
                        self.calls.push(Call {
                            kind: CallKind::FieldAccess,
                            name: field.name().to_owned(),
                            pkg: None,
                            inputs_from: vec![parent],
                            input_fields: Vec::new(),
                            output: out.clone(),
                            has_cleanup: false,
                            has_error: false,
                            variadic: false,
                            pos: field.pos().clone(),
                            value: None,
                        });
                        self.emitted.insert(ptr, idx);
                        SourceRef::Call(idx)
                    }
                }
            }
        };

        let _ = self.satisfied.try_insert(key.clone(), src_ref);
        Some(src_ref)
    }

    fn report_missing(&mut self, key: &TypeKey) {
        let _ = self.missing.try_insert(key.clone(), ());

        let mut message = format!("no provider found for {}", key);
        for frame in self.stack.iter().rev() {
            message.push_str("\n\t");
            message.push_str(&frame.label);
        }

        let pos = self
            .stack
            .last()
            .map(|frame| frame.pos.clone())
            .unwrap_or_else(|| self.set.pos().clone());

        self.errors.add(WeftError::no_provider(message).at(pos));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::graph::map::build_maps;
    use crate::testdata::synth;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn solve_for(
        mut set: ProviderSetSpecification,
        output: &str,
    ) -> (Option<InjectorPlan>, Vec<crate::error::WeftError>) {
        let mut errors = ErrorCollector::new();
        build_maps(&mut set, &mut errors);
        assert!(errors.is_empty(), "unexpected map errors: {:?}", errors.into_errors());
        let mut errors = ErrorCollector::new();
        let mut usage = UsageTracker::new();
        let plan = solve(&synth::key(output), &set, &mut usage, &mut errors);
        (plan, errors.into_errors())
    }

    fn call_names(plan: &InjectorPlan) -> Vec<&str> {
        plan.calls.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn linear_chain_resolves_in_order() {
        //S1: A() -> A, B(A) -> B, C(B) -> C
        let set = synth::set(vec![
            synth::provider("new_a", vec![], "A"),
            synth::provider("new_b", vec!["A"], "B"),
            synth::provider("new_c", vec!["B"], "C"),
        ]);

        let (plan, errors) = solve_for(set, "C");
        assert!(errors.is_empty(), "{:?}", errors);
        let plan = plan.unwrap();
        assert_eq!(vec!["new_a", "new_b", "new_c"], call_names(&plan));
        assert_eq!(SourceRef::Call(2), plan.output);
    }

    #[test]
    fn diamond_emits_the_shared_dependency_once() {
        //S2: A() -> A, B(A) -> B, C(A) -> C, D(B, C) -> D
        let set = synth::set(vec![
            synth::provider("new_a", vec![], "A"),
            synth::provider("new_b", vec!["A"], "B"),
            synth::provider("new_c", vec!["A"], "C"),
            synth::provider("new_d", vec!["B", "C"], "D"),
        ]);

        let (plan, errors) = solve_for(set, "D");
        assert!(errors.is_empty(), "{:?}", errors);
        let plan = plan.unwrap();
        //B and C resolve in the declaration order of D's inputs; A is emitted exactly once
        assert_eq!(vec!["new_a", "new_b", "new_c", "new_d"], call_names(&plan));
    }

    #[test]
    fn missing_provider_reports_the_needed_by_chain() {
        //S3: B(A) -> B with no provider for A
        let set = synth::set(vec![synth::provider("new_b", vec!["A"], "B")]);

        let (plan, errors) = solve_for(set, "B");
        assert!(plan.is_none());
        assert_eq!(1, errors.len());
        assert_eq!(ErrorKind::NoProvider, errors[0].kind());
        let message = errors[0].to_string();
        assert!(message.contains("no provider found for t::A"), "{}", message);
        assert!(message.contains("needed by t::new_b"), "{}", message);
    }

    #[test]
    fn missing_types_are_reported_once() {
        //Both B and C need the absent A; one diagnostic, first chain wins
        let set = synth::set(vec![
            synth::provider("new_b", vec!["A"], "B"),
            synth::provider("new_c", vec!["A", "B"], "C"),
        ]);

        let (plan, errors) = solve_for(set, "C");
        assert!(plan.is_none());
        assert_eq!(1, errors.len());
    }

    #[test]
    fn injector_args_satisfy_without_a_call() {
        //S6 flavor: the argument type is used directly, never constructed
        let mut set = synth::set(vec![synth::provider("new_b", vec!["A"], "B")]);
        set.injector_args = Some(synth::args(vec!["A"]));

        let (plan, errors) = solve_for(set, "B");
        assert!(errors.is_empty(), "{:?}", errors);
        let plan = plan.unwrap();
        assert_eq!(vec!["new_b"], call_names(&plan));
        assert_eq!(vec![SourceRef::Arg(0)], plan.calls[0].inputs_from);
    }

    #[test]
    fn values_are_emitted_as_value_calls() {
        let mut set = synth::set(vec![synth::provider("new_b", vec!["V"], "B")]);
        set.values.push(synth::value("V"));

        let (plan, errors) = solve_for(set, "B");
        assert!(errors.is_empty(), "{:?}", errors);
        let plan = plan.unwrap();
        assert_eq!(CallKind::Value, plan.calls[0].kind);
        assert_eq!(CallKind::Function, plan.calls[1].kind);
    }

    #[test]
    fn cleanup_and_error_flags_aggregate() {
        let mut with_cleanup = synth::provider_model("new_a", vec![], "A");
        with_cleanup.ret = Some(TypeKey::apply(
            TypeKey::builtin("Result"),
            vec![
                TypeKey::Tuple(vec![synth::key("A"), TypeKey::cleanup()]),
                synth::key("E"),
            ],
        ));
        let set = synth::set(vec![
            synth::provider_from(with_cleanup),
            synth::provider("new_b", vec!["A"], "B"),
        ]);

        let (plan, errors) = solve_for(set, "B");
        assert!(errors.is_empty(), "{:?}", errors);
        let plan = plan.unwrap();
        assert!(plan.needs_cleanup);
        assert!(plan.needs_error);
        assert!(plan.calls[0].has_cleanup);
        assert!(!plan.calls[1].has_cleanup);
    }

    /// A random DAG of providers: node i draws its inputs from nodes with smaller indices, so
    /// the graph is acyclic by construction
    #[derive(Clone, Debug)]
    struct Dag {
        inputs: Vec<Vec<usize>>,
    }

    impl Arbitrary for Dag {
        fn arbitrary<G: Gen>(g: &mut G) -> Dag {
            let n = (usize::arbitrary(g) % 7) + 1;
            let mut inputs = Vec::new();
            for i in 0..n {
                let mut ins = Vec::new();
                for j in 0..i {
                    if bool::arbitrary(g) {
                        ins.push(j);
                    }
                }
                inputs.push(ins);
            }
            Dag { inputs }
        }
    }

    fn dag_set(dag: &Dag) -> ProviderSetSpecification {
        synth::set(
            dag.inputs
                .iter()
                .enumerate()
                .map(|(i, ins)| {
                    synth::provider(
                        &format!("new_t{}", i),
                        ins.iter().map(|j| format!("T{}", j)).collect::<Vec<_>>()
                            .iter()
                            .map(|s| s.as_str())
                            .collect(),
                        &format!("T{}", i),
                    )
                })
                .collect(),
        )
    }

    #[quickcheck]
    fn solved_plans_are_topologically_sound(dag: Dag) -> bool {
        let output = format!("T{}", dag.inputs.len() - 1);
        let (plan, errors) = solve_for(dag_set(&dag), &output);
        if !errors.is_empty() {
            return false;
        }
        let plan = plan.unwrap();

        //Every input must come from a strictly earlier call
        plan.calls.iter().enumerate().all(|(idx, call)| {
            call.inputs_from.iter().all(|src| match src {
                SourceRef::Call(j) => *j < idx,
                SourceRef::Arg(_) => true,
            })
        })
    }

    #[quickcheck]
    fn solving_is_deterministic(dag: Dag) -> bool {
        let output = format!("T{}", dag.inputs.len() - 1);
        let (first, first_errors) = solve_for(dag_set(&dag), &output);
        let (second, second_errors) = solve_for(dag_set(&dag), &output);

        format!("{:?}{:?}", first, first_errors) == format!("{:?}{:?}", second, second_errors)
    }

    #[quickcheck]
    fn argument_types_shadow_nothing_and_emit_no_calls(dag: Dag) -> bool {
        //Present every type as an injector argument as well; no call may produce an arg type.
        //With every node shadowed by an argument, the plan must be empty.
        let mut set = dag_set(&dag);
        //Building the map would report collisions between args and providers, so drop the
        //providers and keep only the args
        set.providers.clear();
        set.injector_args = Some(synth::args(
            (0..dag.inputs.len())
                .map(|i| format!("T{}", i))
                .collect::<Vec<_>>()
                .iter()
                .map(|s| s.as_str())
                .collect(),
        ));

        let output = format!("T{}", dag.inputs.len() - 1);
        let (plan, errors) = solve_for(set, &output);
        errors.is_empty()
            && plan
                .map(|p| p.calls.is_empty() && p.output == SourceRef::Arg(dag.inputs.len() - 1))
                .unwrap_or(false)
    }
}
