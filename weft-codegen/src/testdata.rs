//! This module contains shared code and fixtures for the tests in the other modules.  There are
//! two layers: `synth` builds specification structures directly, so the graph phases can be
//! tested without going through the loader, and the `TEST_PROGRAMS` sources exercise the whole
//! pipeline from source text.
#![cfg(test)]

use crate::error::Pos;
use crate::model::{
    ExprModel, FunctionModel, IdentRef, InjectorModel, PackageId, ParamModel, ProgramModel,
    TypeKey,
};
use crate::spec::{
    InjectorArgsSpecification, InjectorSpecification, ProviderSetSpecification,
    ProviderSpecification, ValueSpecification,
};
use lazy_static::lazy_static;
use std::rc::Rc;

/// Builders for synthetic specification structures.  Everything lives in a package named `t`
/// and all positions point into a fictional `src/t.rs`.
pub(crate) mod synth {
    use super::*;
    use crate::model::TypeMap;
    use syn::parse_quote;

    pub(crate) fn key(name: &str) -> TypeKey {
        TypeKey::named("t", name)
    }

    pub(crate) fn pos(line: usize) -> Pos {
        Pos::new("src/t.rs", line, 1)
    }

    pub(crate) fn provider_model(name: &str, inputs: Vec<&str>, out: &str) -> FunctionModel {
        FunctionModel {
            name: name.to_owned(),
            pkg: PackageId::new("t"),
            pos: pos(1),
            exported: true,
            params: inputs
                .into_iter()
                .enumerate()
                .map(|(i, input)| ParamModel {
                    name: format!("arg{}", i),
                    key: key(input),
                })
                .collect(),
            ret: Some(key(out)),
            variadic: false,
        }
    }

    pub(crate) fn provider_from(model: FunctionModel) -> Rc<ProviderSpecification> {
        Rc::new(ProviderSpecification::from_function(&model).expect("synthetic provider is valid"))
    }

    pub(crate) fn provider(name: &str, inputs: Vec<&str>, out: &str) -> Rc<ProviderSpecification> {
        provider_from(provider_model(name, inputs, out))
    }

    pub(crate) fn set(providers: Vec<Rc<ProviderSpecification>>) -> ProviderSetSpecification {
        ProviderSetSpecification {
            name: None,
            pkg: PackageId::new("t"),
            pos: pos(1),
            providers,
            bindings: Vec::new(),
            values: Vec::new(),
            fields: Vec::new(),
            imports: Vec::new(),
            injector_args: None,
            provider_map: TypeMap::new(),
            src_map: TypeMap::new(),
            collect_errors: false,
        }
    }

    pub(crate) fn named_set(
        name: &str,
        providers: Vec<Rc<ProviderSpecification>>,
    ) -> ProviderSetSpecification {
        let mut built = set(providers);
        built.name = Some(name.to_owned());
        built
    }

    pub(crate) fn args(types: Vec<&str>) -> Rc<InjectorArgsSpecification> {
        injector("init", types, key("Out")).args_spec()
    }

    pub(crate) fn injector(name: &str, params: Vec<&str>, ret: TypeKey) -> InjectorSpecification {
        injector_in("t", name, params, ret)
    }

    pub(crate) fn injector_in(
        pkg: &str,
        name: &str,
        params: Vec<&str>,
        ret: TypeKey,
    ) -> InjectorSpecification {
        let model = InjectorModel {
            name: name.to_owned(),
            pkg: PackageId::new(pkg),
            pos: pos(1),
            exported: true,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, param)| ParamModel {
                    name: format!("arg{}", i),
                    key: key(param),
                })
                .collect(),
            ret: Some(ret),
            items: Vec::new(),
        };
        InjectorSpecification::from_model(&model).expect("synthetic injector is valid")
    }

    pub(crate) fn value(out: &str) -> Rc<ValueSpecification> {
        value_with_refs(out, Vec::new())
    }

    pub(crate) fn value_with_refs(out: &str, refs: Vec<IdentRef>) -> Rc<ValueSpecification> {
        let expr = ExprModel {
            expr: parse_quote! { FIXTURE },
            key: Some(key(out)),
            refs,
            pos: pos(2),
        };
        Rc::new(
            ValueSpecification::from_value_marker(&expr, &pos(2))
                .expect("synthetic value is valid"),
        )
    }
}

/// Loads in-memory sources through the real loader; each entry is `(package name, content)`
pub(crate) fn load_program(sources: &[(&str, &str)]) -> (ProgramModel, Vec<crate::error::WeftError>) {
    crate::load::load_sources(
        sources
            .iter()
            .map(|(name, content)| crate::load::SourceInput {
                path: std::path::PathBuf::from(format!("src/{}.rs", name)),
                content: (*content).to_owned(),
            })
            .collect(),
    )
}

/// A two-package program used by the end-to-end pipeline tests: `store` declares the providers
/// and a reusable set, `app` declares the injector that consumes it.
pub(crate) const STORE_RS: &str = r#"
pub struct Config {
    pub port: u16,
}

pub struct Db {
    pub config: Config,
}

pub struct Server {
    pub db: Db,
}

pub fn new_config() -> Config {
    Config { port: 5432 }
}

pub fn new_db(config: Config) -> Db {
    Db { config }
}

pub fn new_server(db: Db) -> Server {
    Server { db }
}

pub static STORE_SET: weft::ProviderSet = weft::set!(new_config, new_db, new_server);
"#;

pub(crate) const APP_RS: &str = r#"
pub fn init_server() -> store::Server {
    weft::build!(store::STORE_SET)
}
"#;

lazy_static! {
    /// The canonical happy-path program for pipeline tests
    pub(crate) static ref TEST_PROGRAMS: Vec<(&'static str, &'static str)> =
        vec![("store", STORE_RS), ("app", APP_RS)];
}
