#![deny(warnings)]
#![recursion_limit = "256"]

//! The code generation engine behind the `weft` dependency injection markers.
//!
//! The pipeline is strictly linear per injector: the loader builds a typed program model from
//! source text, the collector normalizes marker declarations into provider sets, the map
//! builder indexes each set by output type, the cycle verifier rejects self-reachable types,
//! the solver orders the calls, and the post-solve checks validate the injector's signature
//! against what the plan needs.  Every phase collects diagnostics instead of failing fast, and
//! downstream phases run only when the invariants they rely on actually hold.
//!
//! Nothing here is concurrent and nothing blocks; given the same sources, the whole pipeline
//! produces byte-identical plans, diagnostics, and generated code.

pub mod build_rs;
mod error;
mod gen;
mod graph;
pub mod load;
mod model;
mod spec;

#[cfg(test)]
mod testdata;

pub use build_rs::generate;
pub use error::{ErrorCollector, ErrorKind, Pos, WeftError, WeftResult};
pub use graph::{Call, CallKind, InjectorPlan, SourceRef};
pub use model::{PackageId, ProgramModel, TypeKey};
pub use spec::InjectorSpecification;

/// The outcome for one injector: the validated stub plus, when every phase passed, its plan
#[derive(Debug)]
pub struct PlannedInjector {
    pub spec: InjectorSpecification,
    pub plan: Option<InjectorPlan>,
}

/// The outcome of planning a whole program.  A non-empty `errors` means at least one injector
/// has no plan and nothing should be emitted.
#[derive(Debug)]
pub struct ProgramPlan {
    pub injectors: Vec<PlannedInjector>,
    pub errors: Vec<WeftError>,
}

/// Plans every injector in the program.  Per injector: collect the set named by its `build!`
/// call, build the provider map, verify it acyclic, solve, and check the signature.  Once all
/// injectors are solved cleanly, verify that every declaration was used by at least one of
/// them.
pub fn plan_program(model: &ProgramModel) -> ProgramPlan {
    let mut errors = ErrorCollector::new();
    let mut collector = spec::DeclarationCollector::new(model);
    let mut usage = graph::usage::UsageTracker::new();
    let mut planned: Vec<PlannedInjector> = Vec::new();
    let mut solved_sets: Vec<spec::ProviderSetSpecification> = Vec::new();
    let mut all_solved = true;

    for package in &model.packages {
        for injector_model in &package.injectors {
            let injector = match spec::InjectorSpecification::from_model(injector_model) {
                Ok(injector) => injector,
                Err(e) => {
                    errors.add(e);
                    all_solved = false;
                    continue;
                }
            };

            let before = errors.len();
            let mut set = collector.collect_injector_set(&injector, &mut errors);
            if errors.len() > before || set.tainted() {
                planned.push(PlannedInjector {
                    spec: injector,
                    plan: None,
                });
                all_solved = false;
                continue;
            }

            graph::map::build_maps(&mut set, &mut errors);
            if errors.len() > before {
                planned.push(PlannedInjector {
                    spec: injector,
                    plan: None,
                });
                all_solved = false;
                continue;
            }

            graph::cycles::verify_acyclic(&set, &mut errors);
            if errors.len() > before {
                planned.push(PlannedInjector {
                    spec: injector,
                    plan: None,
                });
                all_solved = false;
                continue;
            }

            match graph::solve(&injector.sig().output, &set, &mut usage, &mut errors) {
                Some(plan) => {
                    graph::checks::check_injector(&injector, &plan, &mut errors);
                    solved_sets.push(set);
                    planned.push(PlannedInjector {
                        spec: injector,
                        plan: Some(plan),
                    });
                }
                None => {
                    planned.push(PlannedInjector {
                        spec: injector,
                        plan: None,
                    });
                    all_solved = false;
                }
            }
        }
    }

    //Usage verification only means something once every consumer of every set actually
    //produced a plan; otherwise a declaration could look unused merely because its consumer
    //failed earlier
    if all_solved && errors.is_empty() {
        let roots: Vec<&spec::ProviderSetSpecification> = solved_sets.iter().collect();
        graph::usage::verify_used(&roots, &usage, &mut errors);
    }

    ProgramPlan {
        injectors: planned,
        errors: errors.into_errors(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testdata::{load_program, TEST_PROGRAMS};

    fn plan(sources: &[(&str, &str)]) -> ProgramPlan {
        let (model, errors) = load_program(sources);
        assert!(errors.is_empty(), "load errors: {:?}", errors);
        plan_program(&model)
    }

    #[test]
    fn a_linear_program_plans_cleanly() {
        let plan = plan(&TEST_PROGRAMS);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        assert_eq!(1, plan.injectors.len());
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        let names: Vec<_> = solved.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["new_config", "new_db", "new_server"], names);
    }

    #[test]
    fn planning_is_deterministic() {
        let first = plan(&TEST_PROGRAMS);
        let second = plan(&TEST_PROGRAMS);
        assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }

    #[test]
    fn interface_bindings_route_to_the_concrete_provider() {
        //S7: the injector returns the interface; the plan calls the concrete provider
        let plan = plan(&[(
            "app",
            r#"
            pub trait Store {
                fn get(&self) -> u32;
            }

            pub struct PgStore;

            impl Store for PgStore {
                fn get(&self) -> u32 { 0 }
            }

            pub fn new_pg_store() -> PgStore {
                PgStore
            }

            pub fn init_store() -> impl Store {
                weft::build!(new_pg_store, weft::bind!(dyn Store, PgStore))
            }
            "#,
        )]);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        assert_eq!(1, solved.calls.len());
        assert_eq!("new_pg_store", solved.calls[0].name);
        assert_eq!(SourceRef::Call(0), solved.output);
    }

    #[test]
    fn requesting_both_interface_and_concrete_shares_one_call() {
        let plan = plan(&[(
            "app",
            r#"
            pub trait Store {
                fn get(&self) -> u32;
            }

            pub struct PgStore;

            impl Store for PgStore {
                fn get(&self) -> u32 { 0 }
            }

            pub struct App;

            pub fn new_pg_store() -> PgStore {
                PgStore
            }

            pub fn new_app(store: impl Store, pg: PgStore) -> App {
                App
            }

            pub fn init_app() -> App {
                weft::build!(new_pg_store, new_app, weft::bind!(dyn Store, PgStore))
            }
            "#,
        )]);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        assert_eq!(2, solved.calls.len());
        //Both the impl Store parameter and the PgStore parameter read the same call
        assert_eq!(
            vec![SourceRef::Call(0), SourceRef::Call(0)],
            solved.calls[1].inputs_from
        );
    }

    #[test]
    fn conflicting_providers_fail_the_injector() {
        //S5: two providers for the same type
        let plan = plan(&[(
            "app",
            r#"
            pub struct Count(pub u32);
            pub fn new_foo() -> Count { Count(1) }
            pub fn new_bar() -> Count { Count(2) }
            pub fn init_count() -> Count {
                weft::build!(new_foo, new_bar)
            }
            "#,
        )]);

        assert!(plan.injectors[0].plan.is_none());
        assert_eq!(1, plan.errors.len());
        assert_eq!(ErrorKind::MultipleBindings, plan.errors[0].kind());
    }

    #[test]
    fn binding_a_concrete_type_nobody_provides_is_reported() {
        let plan = plan(&[(
            "app",
            r#"
            pub trait Store {
                fn get(&self) -> u32;
            }

            pub struct PgStore;

            impl Store for PgStore {
                fn get(&self) -> u32 { 0 }
            }

            pub struct App;

            pub fn new_app(store: impl Store) -> App {
                App
            }

            pub fn init_app() -> App {
                weft::build!(new_app, weft::bind!(dyn Store, PgStore))
            }
            "#,
        )]);

        assert!(plan.injectors[0].plan.is_none());
        assert!(!plan.errors.is_empty());
        assert_eq!(ErrorKind::NoProvider, plan.errors[0].kind());
        assert!(
            plan.errors[0]
                .to_string()
                .contains("does not include a provider for app::PgStore"),
            "{}",
            plan.errors[0]
        );
    }

    #[test]
    fn injector_arguments_shadow_providers_and_feed_calls() {
        let plan = plan(&[(
            "app",
            r#"
            pub struct Config {
                pub port: u16,
            }

            pub struct Server;

            pub fn new_server(config: Config) -> Server {
                Server
            }

            pub fn init_server(config: Config) -> Server {
                weft::build!(new_server)
            }
            "#,
        )]);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        //No call produces Config; the argument feeds the server directly
        assert_eq!(1, solved.calls.len());
        assert_eq!(vec![SourceRef::Arg(0)], solved.calls[0].inputs_from);
    }

    #[test]
    fn cleanup_mismatch_is_caught_after_solving() {
        //S6: provider returns a cleanup, injector does not
        let plan = plan(&[(
            "app",
            r#"
            pub struct Db;
            pub fn new_db() -> (Db, weft::Cleanup) {
                (Db, Box::new(|| {}))
            }
            pub fn init_db() -> Db {
                weft::build!(new_db)
            }
            "#,
        )]);

        assert!(plan.injectors[0].plan.is_some());
        assert_eq!(1, plan.errors.len());
        assert_eq!(ErrorKind::CleanupMismatch, plan.errors[0].kind());
    }

    #[test]
    fn unused_declarations_in_a_named_set_are_reported() {
        let plan = plan(&[(
            "app",
            r#"
            pub struct Db;
            pub struct Orphan;
            pub fn new_db() -> Db { Db }
            pub fn new_orphan() -> Orphan { Orphan }
            pub static APP_SET: weft::ProviderSet = weft::set!(new_db, new_orphan);
            pub fn init_db() -> Db {
                weft::build!(APP_SET)
            }
            "#,
        )]);

        assert_eq!(1, plan.errors.len());
        assert_eq!(ErrorKind::UnusedDeclaration, plan.errors[0].kind());
        assert!(
            plan.errors[0].to_string().contains("unused provider \"new_orphan\""),
            "{}",
            plan.errors[0]
        );
    }

    #[test]
    fn values_flow_through_struct_and_field_markers() {
        let plan = plan(&[(
            "app",
            r#"
            pub struct Config {
                pub port: u16,
                pub retries: u32,
            }

            pub struct Server {
                pub port: u16,
            }

            pub fn new_config() -> Config {
                Config { port: 1, retries: 0 }
            }

            pub fn init_server() -> Server {
                weft::build!(
                    new_config,
                    weft::fields_of!(Config, "port"),
                    weft::struct_provider!(Server, "port")
                )
            }
            "#,
        )]);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        let kinds: Vec<_> = solved.calls.iter().map(|c| c.kind).collect();
        assert_eq!(
            vec![CallKind::Function, CallKind::FieldAccess, CallKind::StructLiteral],
            kinds
        );
    }

    #[test]
    fn cycles_surface_before_solving() {
        //S4 at the pipeline level
        let plan = plan(&[(
            "app",
            r#"
            pub struct A;
            pub struct B;
            pub struct C;
            pub fn new_a(c: C) -> A { A }
            pub fn new_b(a: A) -> B { B }
            pub fn new_c(b: B) -> C { C }
            pub fn init_a() -> A {
                weft::build!(new_a, new_b, new_c)
            }
            "#,
        )]);

        assert!(plan.injectors[0].plan.is_none());
        assert_eq!(1, plan.errors.len());
        assert_eq!(ErrorKind::Cycle, plan.errors[0].kind());
        assert!(
            plan.errors[0]
                .to_string()
                .contains("app::A -> app::C -> app::B -> app::A"),
            "{}",
            plan.errors[0]
        );
    }

    #[test]
    fn interface_values_satisfy_the_interface_key() {
        let plan = plan(&[(
            "app",
            r#"
            pub trait Log {
                fn log(&self, line: &str);
            }

            pub struct NullLog;

            impl Log for NullLog {
                fn log(&self, line: &str) {}
            }

            pub struct App;

            pub fn new_app(log: impl Log) -> App {
                App
            }

            pub fn init_app() -> App {
                weft::build!(new_app, weft::interface_value!(dyn Log, NullLog))
            }
            "#,
        )]);

        assert!(plan.errors.is_empty(), "{:?}", plan.errors);
        let solved = plan.injectors[0].plan.as_ref().unwrap();
        assert_eq!(CallKind::Value, solved.calls[0].kind);
        assert_eq!(CallKind::Function, solved.calls[1].kind);
    }

    #[test]
    fn a_failed_injector_suppresses_usage_verification() {
        //new_db is only reachable from the failing injector; it must not be reported unused
        let plan = plan(&[(
            "app",
            r#"
            pub struct Db;
            pub struct Missing;
            pub fn new_db(m: Missing) -> Db { Db }
            pub fn init_db() -> Db {
                weft::build!(new_db)
            }
            "#,
        )]);

        assert_eq!(1, plan.errors.len());
        assert_eq!(ErrorKind::NoProvider, plan.errors[0].kind());
    }
}
