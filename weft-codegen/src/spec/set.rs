//! Provider sets: the flat aggregation of everything a `set!` or `build!` marker declares, and
//! the collector that normalizes resolved marker items into one.  A set is collected once,
//! frozen after the map builder fills in its `provider_map` and `src_map`, and read-only for the
//! rest of the pipeline.

use crate::error::{ErrorCollector, Pos, WeftError};
use crate::model::{MarkerItem, PackageId, ProgramModel, SetDeclModel, TypeKey, TypeMap};
use crate::spec::binding::BindingSpecification;
use crate::spec::field::FieldSpecification;
use crate::spec::injector::{InjectorArgsSpecification, InjectorSpecification};
use crate::spec::provider::ProviderSpecification;
use crate::spec::value::ValueSpecification;
use std::collections::HashMap;
use std::rc::Rc;

/// What satisfies one type in a built provider map.  Exactly one variant per map entry; an
/// interface binding inserts a clone of the concrete entry under the interface key, so the two
/// keys share the underlying `Rc` and the solver emits one call for both.
#[derive(Debug, Clone)]
pub enum ProvidedType {
    Provider {
        out: TypeKey,
        provider: Rc<ProviderSpecification>,
    },
    Value {
        out: TypeKey,
        value: Rc<ValueSpecification>,
    },
    Arg {
        #[allow(dead_code)]
        out: TypeKey,
        args: Rc<InjectorArgsSpecification>,
        index: usize,
    },
    Field {
        out: TypeKey,
        field: Rc<FieldSpecification>,
    },
}

impl ProvidedType {
    pub fn pos(&self) -> &Pos {
        match self {
            ProvidedType::Provider { provider, .. } => provider.pos(),
            ProvidedType::Value { value, .. } => value.pos(),
            ProvidedType::Arg { args, .. } => args.pos(),
            ProvidedType::Field { field, .. } => field.pos(),
        }
    }

    /// The input types this entry depends on, in declaration order
    pub(crate) fn input_keys(&self) -> Vec<&TypeKey> {
        match self {
            ProvidedType::Provider { provider, .. } => {
                provider.inputs().iter().map(|i| &i.key).collect()
            }
            ProvidedType::Field { field, .. } => vec![field.parent()],
            ProvidedType::Value { .. } | ProvidedType::Arg { .. } => Vec::new(),
        }
    }
}

/// Which declaration put an entry into the provider map.  Used only for diagnostics and for
/// usage tracking; identity is `Rc` pointer identity.
#[derive(Debug, Clone)]
pub enum ProviderSetSrc {
    Provider(Rc<ProviderSpecification>),
    Binding(Rc<BindingSpecification>),
    Value(Rc<ValueSpecification>),
    Field(Rc<FieldSpecification>),
    /// One formal parameter of the injector; the index picks it out of the argument list so
    /// two same-typed parameters produce distinguishable diagnostics
    InjectorArgs(Rc<InjectorArgsSpecification>, usize),
}

impl ProviderSetSrc {
    pub fn describe(&self) -> String {
        match self {
            ProviderSetSrc::Provider(p) => format!("provider \"{}\"", p.name()),
            ProviderSetSrc::Binding(b) => format!("interface binding for {}", b.iface()),
            ProviderSetSrc::Value(v) => format!("value of type {}", v.out()),
            ProviderSetSrc::Field(f) => format!("field \"{}\" of {}", f.name(), f.parent()),
            ProviderSetSrc::InjectorArgs(a, index) => format!(
                "argument \"{}\" of injector {}",
                a.param_name(*index),
                a.injector_name()
            ),
        }
    }

    pub fn pos(&self) -> &Pos {
        match self {
            ProviderSetSrc::Provider(p) => p.pos(),
            ProviderSetSrc::Binding(b) => b.pos(),
            ProviderSetSrc::Value(v) => v.pos(),
            ProviderSetSrc::Field(f) => f.pos(),
            ProviderSetSrc::InjectorArgs(a, _) => a.pos(),
        }
    }

    /// The description plus its location, as quoted in binding-conflict messages
    pub fn describe_at(&self) -> String {
        format!("{} ({})", self.describe(), self.pos())
    }
}

/// The flat, user-named aggregation of declarations.  `provider_map` and `src_map` are empty
/// until the map builder runs; after that the set is frozen.
#[derive(Debug, Clone)]
pub struct ProviderSetSpecification {
    pub(crate) name: Option<String>,
    pub(crate) pkg: PackageId,
    pub(crate) pos: Pos,
    pub(crate) providers: Vec<Rc<ProviderSpecification>>,
    pub(crate) bindings: Vec<Rc<BindingSpecification>>,
    pub(crate) values: Vec<Rc<ValueSpecification>>,
    pub(crate) fields: Vec<Rc<FieldSpecification>>,
    pub(crate) imports: Vec<Rc<ProviderSetSpecification>>,
    pub(crate) injector_args: Option<Rc<InjectorArgsSpecification>>,
    pub(crate) provider_map: TypeMap<ProvidedType>,
    pub(crate) src_map: TypeMap<ProviderSetSrc>,
    pub(crate) collect_errors: bool,
}

impl ProviderSetSpecification {
    fn empty(name: Option<String>, pkg: PackageId, pos: Pos) -> ProviderSetSpecification {
        ProviderSetSpecification {
            name,
            pkg,
            pos,
            providers: Vec::new(),
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

    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.as_str())
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    pub fn provider_map(&self) -> &TypeMap<ProvidedType> {
        &self.provider_map
    }

    pub fn src_map(&self) -> &TypeMap<ProviderSetSrc> {
        &self.src_map
    }

    /// True when collecting this set, or any set it imports, recorded diagnostics.  Downstream
    /// phases do not run against a tainted set.
    pub(crate) fn tainted(&self) -> bool {
        self.collect_errors || self.imports.iter().any(|i| i.tainted())
    }
}

/// Normalizes resolved marker items into `ProviderSetSpecification`s.  Named sets are collected
/// once and shared; the injector-site set (the arguments of `build!`) is collected fresh per
/// injector because it also carries the injector's arguments.
pub(crate) struct DeclarationCollector<'a> {
    model: &'a ProgramModel,
    cache: HashMap<(String, String), Rc<ProviderSetSpecification>>,
    building: Vec<(String, String)>,
}

impl<'a> DeclarationCollector<'a> {
    pub(crate) fn new(model: &'a ProgramModel) -> DeclarationCollector<'a> {
        DeclarationCollector {
            model,
            cache: HashMap::new(),
            building: Vec::new(),
        }
    }

    pub(crate) fn collect_injector_set(
        &mut self,
        injector: &InjectorSpecification,
        errors: &mut ErrorCollector,
    ) -> ProviderSetSpecification {
        let mut set = self.collect_items(
            None,
            injector.pkg().clone(),
            injector.pos().clone(),
            injector.items(),
            errors,
        );
        set.injector_args = Some(injector.args_spec());
        set
    }

    fn collect_named_set(
        &mut self,
        decl: &Rc<SetDeclModel>,
        errors: &mut ErrorCollector,
    ) -> Rc<ProviderSetSpecification> {
        let key = (decl.pkg.import_path.clone(), decl.name.clone());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        if self.building.contains(&key) {
            errors.add(
                WeftError::invalid_argument(format!(
                    "provider set \"{}\" imports itself",
                    decl.name
                ))
                .at(decl.pos.clone()),
            );
            let mut empty = ProviderSetSpecification::empty(
                Some(decl.name.clone()),
                decl.pkg.clone(),
                decl.pos.clone(),
            );
            empty.collect_errors = true;
            return Rc::new(empty);
        }

        self.building.push(key.clone());
        let set = self.collect_items(
            Some(decl.name.clone()),
            decl.pkg.clone(),
            decl.pos.clone(),
            &decl.items,
            errors,
        );
        self.building.pop();

        let set = Rc::new(set);
        self.cache.insert(key, set.clone());
        set
    }

    fn collect_items(
        &mut self,
        name: Option<String>,
        pkg: PackageId,
        pos: Pos,
        items: &[MarkerItem],
        errors: &mut ErrorCollector,
    ) -> ProviderSetSpecification {
        let before = errors.len();
        let mut set = ProviderSetSpecification::empty(name, pkg, pos);

        for item in items {
            match item {
                MarkerItem::Use { path, pos } => self.collect_use(&mut set, path, pos, errors),
                MarkerItem::Bind {
                    iface,
                    concrete,
                    pos,
                } => {
                    match BindingSpecification::from_marker(self.model, iface, concrete, pos) {
                        Ok(binding) => set.bindings.push(Rc::new(binding)),
                        Err(e) => errors.add(e),
                    }
                }
                MarkerItem::Value { expr, pos } => {
                    match ValueSpecification::from_value_marker(expr, pos) {
                        Ok(value) => set.values.push(Rc::new(value)),
                        Err(e) => errors.add(e),
                    }
                }
                MarkerItem::InterfaceValue { iface, expr, pos } => {
                    match ValueSpecification::from_interface_value_marker(
                        self.model, iface, expr, pos,
                    ) {
                        Ok(value) => set.values.push(Rc::new(value)),
                        Err(e) => errors.add(e),
                    }
                }
                MarkerItem::StructLit {
                    target,
                    fields,
                    pos,
                } => match self.model.struct_model(&target.key) {
                    None => errors.add(
                        WeftError::invalid_argument(format!(
                            "struct_provider! requires a struct type; {} is not a struct",
                            target.key
                        ))
                        .at(target.pos.clone()),
                    ),
                    Some(s) => {
                        let s = s.clone();
                        if let Some(mut provider) =
                            ProviderSpecification::from_struct(&s, fields, pos, errors)
                        {
                            if let Some(set_name) = &set.name {
                                provider.mark_declared_in(set_name);
                            }
                            set.providers.push(Rc::new(provider));
                        }
                    }
                },
                MarkerItem::FieldsOf {
                    target,
                    fields,
                    pos,
                } => {
                    for field in
                        FieldSpecification::from_marker(self.model, target, fields, pos, errors)
                    {
                        set.fields.push(Rc::new(field));
                    }
                }
            }
        }

        set.collect_errors = errors.len() > before;
        set
    }

    /// Resolves a bare path item: a provider function or an imported provider set
    fn collect_use(
        &mut self,
        set: &mut ProviderSetSpecification,
        path: &[String],
        pos: &Pos,
        errors: &mut ErrorCollector,
    ) {
        let (pkg_path, ident) = match path.len() {
            0 => return,
            1 => (set.pkg.import_path.clone(), path[0].as_str()),
            n => (path[..n - 1].join("::"), path[n - 1].as_str()),
        };

        if let Some(f) = self.model.function(&pkg_path, ident) {
            let f = f.clone();
            match ProviderSpecification::from_function(&f) {
                Ok(mut provider) => {
                    if let Some(set_name) = &set.name {
                        provider.mark_declared_in(set_name);
                    }
                    set.providers.push(Rc::new(provider));
                }
                Err(e) => errors.add(e),
            }
        } else if let Some(decl) = self.model.set_decl(&pkg_path, ident) {
            let decl = decl.clone();
            let import = self.collect_named_set(&decl, errors);
            set.imports.push(import);
        } else {
            errors.add(
                WeftError::invalid_argument(format!(
                    "{} is not a provider function or provider set",
                    path.join("::")
                ))
                .at(pos.clone()),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{FunctionModel, PackageModel, ParamModel};

    fn pos(line: usize) -> Pos {
        Pos::new("src/app.rs", line, 1)
    }

    fn simple_model() -> ProgramModel {
        let mut pkg = PackageModel::default();
        pkg.id = PackageId::new("app");
        pkg.functions.push(Rc::new(FunctionModel {
            name: "new_config".to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(1),
            exported: true,
            params: Vec::new(),
            ret: Some(TypeKey::named("app", "Config")),
            variadic: false,
        }));
        pkg.functions.push(Rc::new(FunctionModel {
            name: "new_server".to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(2),
            exported: true,
            params: vec![ParamModel {
                name: "config".to_owned(),
                key: TypeKey::named("app", "Config"),
            }],
            ret: Some(TypeKey::named("app", "Server")),
            variadic: false,
        }));
        pkg.sets.push(Rc::new(SetDeclModel {
            name: "APP_SET".to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(3),
            exported: true,
            items: vec![
                MarkerItem::Use {
                    path: vec!["new_config".to_owned()],
                    pos: pos(3),
                },
                MarkerItem::Use {
                    path: vec!["new_server".to_owned()],
                    pos: pos(3),
                },
            ],
        }));
        ProgramModel {
            packages: vec![pkg],
        }
    }

    #[test]
    fn bare_paths_resolve_to_providers_and_sets() {
        let model = simple_model();
        let mut errors = ErrorCollector::new();
        let mut collector = DeclarationCollector::new(&model);

        let mut set = ProviderSetSpecification::empty(None, PackageId::new("app"), pos(9));
        collector.collect_use(
            &mut set,
            &["new_config".to_owned()],
            &pos(9),
            &mut errors,
        );
        collector.collect_use(&mut set, &["APP_SET".to_owned()], &pos(9), &mut errors);

        assert!(errors.is_empty());
        assert_eq!(1, set.providers.len());
        assert_eq!(1, set.imports.len());
        assert_eq!(Some("APP_SET"), set.imports[0].name());
        assert_eq!(2, set.imports[0].providers.len());
    }

    #[test]
    fn named_sets_are_collected_once_and_shared() {
        let model = simple_model();
        let mut errors = ErrorCollector::new();
        let mut collector = DeclarationCollector::new(&model);
        let decl = model.set_decl("app", "APP_SET").unwrap().clone();

        let first = collector.collect_named_set(&decl, &mut errors);
        let second = collector.collect_named_set(&decl, &mut errors);

        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn unresolvable_paths_are_collected_as_errors() {
        let model = simple_model();
        let mut errors = ErrorCollector::new();
        let mut collector = DeclarationCollector::new(&model);

        let mut set = ProviderSetSpecification::empty(None, PackageId::new("app"), pos(9));
        collector.collect_use(&mut set, &["missing".to_owned()], &pos(9), &mut errors);

        let errors = errors.into_errors();
        assert_eq!(1, errors.len());
        assert!(
            errors[0]
                .to_string()
                .contains("missing is not a provider function or provider set"),
            "{}",
            errors[0]
        );
    }
}
