//! Builds the provider map for one set: a mapping from every type the set can produce to the
//! single declaration that produces it, plus a parallel source map for diagnostics.  The order
//! of insertion is fixed (transitive imports first, then the set's own declarations, then the
//! injector arguments, then interface bindings) so that conflicts always report the same
//! "current" and "previous" declarations no matter how the run is invoked.

use crate::error::{ErrorCollector, WeftError};
use crate::model::{TypeKey, TypeMap};
use crate::spec::{
    BindingSpecification, ProvidedType, ProviderSetSpecification, ProviderSetSrc,
};
use std::rc::Rc;

/// Populates `set.provider_map` and `set.src_map`, collecting a `multiple_bindings` diagnostic
/// for every colliding pair of declarations.
pub(crate) fn build_maps(set: &mut ProviderSetSpecification, errors: &mut ErrorCollector) {
    let mut builder = MapBuilder {
        map: TypeMap::new(),
        srcs: TypeMap::new(),
        bindings: Vec::new(),
        set_label: match set.name() {
            Some(name) => format!(" in provider set \"{}\"", name),
            None => String::new(),
        },
    };

    builder.add_decls(set, errors);

    if let Some(args) = &set.injector_args {
        for (index, key) in args.args().iter().enumerate() {
            builder.insert(
                key.clone(),
                ProvidedType::Arg {
                    out: key.clone(),
                    args: args.clone(),
                    index,
                },
                ProviderSetSrc::InjectorArgs(args.clone(), index),
                errors,
            );
        }
    }

    builder.resolve_bindings(errors);

    set.provider_map = builder.map;
    set.src_map = builder.srcs;
}

struct MapBuilder {
    map: TypeMap<ProvidedType>,
    srcs: TypeMap<ProviderSetSrc>,
    bindings: Vec<Rc<BindingSpecification>>,
    set_label: String,
}

impl MapBuilder {
    /// Flattens the set tree in declaration order: each import's contents land before the
    /// importing set's own declarations, and bindings are deferred until every concrete entry
    /// is present.
    fn add_decls(&mut self, set: &ProviderSetSpecification, errors: &mut ErrorCollector) {
        for import in &set.imports {
            self.add_decls(import, errors);
        }

        for provider in &set.providers {
            for out in provider.outputs() {
                self.insert(
                    out.clone(),
                    ProvidedType::Provider {
                        out: out.clone(),
                        provider: provider.clone(),
                    },
                    ProviderSetSrc::Provider(provider.clone()),
                    errors,
                );
            }
        }

        for value in &set.values {
            self.insert(
                value.out().clone(),
                ProvidedType::Value {
                    out: value.out().clone(),
                    value: value.clone(),
                },
                ProviderSetSrc::Value(value.clone()),
                errors,
            );
        }

        for field in &set.fields {
            self.insert(
                field.out().clone(),
                ProvidedType::Field {
                    out: field.out().clone(),
                    field: field.clone(),
                },
                ProviderSetSrc::Field(field.clone()),
                errors,
            );
        }

        self.bindings.extend(set.bindings.iter().cloned());
    }

    fn insert(
        &mut self,
        key: TypeKey,
        provided: ProvidedType,
        src: ProviderSetSrc,
        errors: &mut ErrorCollector,
    ) {
        if self.map.try_insert(key.clone(), provided).is_err() {
            let previous = self
                .srcs
                .get(&key)
                .map(|p| p.describe_at())
                .unwrap_or_else(|| "unknown".to_owned());
            errors.add(
                WeftError::multiple_bindings(format!(
                    "multiple bindings for {}{}: current: {}, previous: {}",
                    key,
                    self.set_label,
                    src.describe_at(),
                    previous
                ))
                .at(src.pos().clone()),
            );
            return;
        }
        let _ = self.srcs.try_insert(key, src);
    }

    /// Interface bindings resolve last.  Each one inserts the same `ProvidedType` as its
    /// concrete type under the interface key, so requests for either share one call.
    fn resolve_bindings(&mut self, errors: &mut ErrorCollector) {
        let bindings = std::mem::replace(&mut self.bindings, Vec::new());
        for binding in bindings {
            let provided = match self.map.get(binding.provided()) {
                Some(provided) => provided.clone(),
                None => {
                    errors.add(
                        WeftError::no_provider(format!(
                            "the set{} does not include a provider for {}, the concrete type bound to {}",
                            self.set_label,
                            binding.provided(),
                            binding.iface()
                        ))
                        .at(binding.pos().clone()),
                    );
                    continue;
                }
            };
            self.insert(
                binding.iface().clone(),
                provided,
                ProviderSetSrc::Binding(binding.clone()),
                errors,
            );
        }
    }
}
