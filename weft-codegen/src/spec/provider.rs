//! Defines and implements `ProviderSpecification`, which represents one way of producing a typed
//! value: either a provider function or a struct-literal provider declared with
//! `struct_provider!`.
//!
//! This module encapsulates the messy details of deciding whether a function's signature is
//! acceptable as a provider: which return shapes carry a cleanup or an error channel, and which
//! shapes are rejected outright with a message naming the offending position.

use crate::error::{ErrorCollector, Pos, WeftError, WeftResult};
use crate::model::{FieldSelector, FunctionModel, PackageId, StructFieldModel, StructModel, TypeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Function,
    StructLiteral,
}

/// One input of a provider, in declaration order.  For struct-literal providers `field` names
/// the field this input fills.
#[derive(Debug, Clone)]
pub struct InputSpecification {
    pub key: TypeKey,
    pub field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSpecification {
    kind: ProviderKind,
    name: String,
    pkg: PackageId,
    pos: Pos,
    inputs: Vec<InputSpecification>,
    outputs: Vec<TypeKey>,
    has_cleanup: bool,
    has_error: bool,
    variadic: bool,
    set_name: Option<String>,
}

/// A provider or injector return type, decomposed into its value, cleanup, and error channels
pub(crate) struct ReturnShape {
    pub output: TypeKey,
    pub has_cleanup: bool,
    pub has_error: bool,
}

/// Why a return type was rejected.  Callers format these into provider- or injector-flavored
/// messages.
pub(crate) enum ReturnShapeError {
    NoValue,
    TooManyValues(usize),
    SecondNotCleanup(TypeKey),
}

/// Splits a return type into its channels.  The accepted shapes are `T`, `(T, weft::Cleanup)`,
/// `Result<T, E>`, and `Result<(T, weft::Cleanup), E>`.
pub(crate) fn decompose_return(ret: Option<&TypeKey>) -> Result<ReturnShape, ReturnShapeError> {
    let ret = match ret {
        None => return Err(ReturnShapeError::NoValue),
        Some(TypeKey::Unit) => return Err(ReturnShapeError::NoValue),
        Some(ret) => ret,
    };

    let (ok, has_error) = match ret {
        TypeKey::Apply { base, args } => match base.as_ref() {
            //Result<T> (an alias with a defaulted error parameter) and Result<T, E> both count
            TypeKey::Builtin(name) if name == "Result" && !args.is_empty() && args.len() <= 2 => {
                (&args[0], true)
            }
            _ => (ret, false),
        },
        _ => (ret, false),
    };

    match ok {
        TypeKey::Unit => Err(ReturnShapeError::NoValue),
        TypeKey::Tuple(elems) => match elems.len() {
            0 => Err(ReturnShapeError::NoValue),
            1 => Ok(ReturnShape {
                output: elems[0].clone(),
                has_cleanup: false,
                has_error,
            }),
            2 => {
                if elems[1].is_cleanup() {
                    Ok(ReturnShape {
                        output: elems[0].clone(),
                        has_cleanup: true,
                        has_error,
                    })
                } else {
                    Err(ReturnShapeError::SecondNotCleanup(elems[1].clone()))
                }
            }
            n => Err(ReturnShapeError::TooManyValues(n)),
        },
        other => Ok(ReturnShape {
            output: other.clone(),
            has_cleanup: false,
            has_error,
        }),
    }
}

impl ProviderSpecification {
    /// Given a free function, compute the provider that corresponds to it.  If the signature
    /// isn't suitable for use as a provider, returns an error naming what is wrong.
    ///
    /// Provider functions must have the following qualities:
    /// * A return of `T`, `(T, weft::Cleanup)`, `Result<T, E>`, or `Result<(T, weft::Cleanup), E>`
    /// * No two parameters of the same type
    /// * If marked `#[weft(variadic)]`, a final parameter of type `Vec<T>`
    pub(crate) fn from_function(f: &FunctionModel) -> WeftResult<ProviderSpecification> {
        let shape = decompose_return(f.ret.as_ref()).map_err(|e| {
            let message = match e {
                ReturnShapeError::NoValue => {
                    format!("provider {} must return a value", f.name)
                }
                ReturnShapeError::TooManyValues(n) => format!(
                    "provider {} returns a tuple of {} elements; at most a value and a weft::Cleanup are allowed",
                    f.name, n
                ),
                ReturnShapeError::SecondNotCleanup(got) => format!(
                    "the second return value of provider {} must be weft::Cleanup, not {}",
                    f.name, got
                ),
            };
            WeftError::bad_provider_signature(message).at(f.pos.clone())
        })?;

        //Two parameters of the same type would make the generated call ambiguous.  This is
        //checked against the declared parameter types, before any variadic unwrapping.
        for (i, a) in f.params.iter().enumerate() {
            for b in f.params.iter().skip(i + 1) {
                if a.key == b.key {
                    return Err(WeftError::bad_provider_signature(format!(
                        "provider {} has two parameters of type {}",
                        f.name, a.key
                    ))
                    .at(f.pos.clone()));
                }
            }
        }

        let mut inputs: Vec<InputSpecification> = f
            .params
            .iter()
            .map(|p| InputSpecification {
                key: p.key.clone(),
                field: None,
            })
            .collect();

        if f.variadic {
            //The declared element type is what gets resolved; the emitter wraps the single
            //resolved element back into a Vec at the call site
            let elem = inputs.last().and_then(|last| match &last.key {
                TypeKey::Apply { base, args } => match base.as_ref() {
                    TypeKey::Builtin(name) if name == "Vec" && args.len() == 1 => {
                        Some(args[0].clone())
                    }
                    _ => None,
                },
                _ => None,
            });
            match elem {
                Some(elem) => {
                    inputs.last_mut().unwrap().key = elem;
                }
                None => {
                    return Err(WeftError::bad_provider_signature(format!(
                        "provider {} is marked #[weft(variadic)] so its final parameter must be Vec<T>",
                        f.name
                    ))
                    .at(f.pos.clone()));
                }
            }
        }

        Ok(ProviderSpecification {
            kind: ProviderKind::Function,
            name: f.name.clone(),
            pkg: f.pkg.clone(),
            pos: f.pos.clone(),
            inputs,
            outputs: vec![shape.output],
            has_cleanup: shape.has_cleanup,
            has_error: shape.has_error,
            variadic: f.variadic,
            set_name: None,
        })
    }

    /// Builds a struct-literal provider from a `struct_provider!` marker: the inputs are the
    /// selected fields in declaration order and the single output is the struct itself.
    pub(crate) fn from_struct(
        s: &StructModel,
        selector: &FieldSelector,
        pos: &Pos,
        errors: &mut ErrorCollector,
    ) -> Option<ProviderSpecification> {
        let selected = select_struct_fields(s, selector, "struct_provider!", pos, errors)?;

        let inputs = selected
            .iter()
            .map(|field| InputSpecification {
                key: field.key.clone(),
                field: Some(field.name.clone()),
            })
            .collect();

        Some(ProviderSpecification {
            kind: ProviderKind::StructLiteral,
            name: s.name.clone(),
            pkg: s.pkg.clone(),
            pos: pos.clone(),
            inputs,
            outputs: vec![TypeKey::named(s.pkg.import_path.clone(), s.name.clone())],
            has_cleanup: false,
            has_error: false,
            variadic: false,
            set_name: None,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pkg(&self) -> &PackageId {
        &self.pkg
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    pub fn inputs(&self) -> &[InputSpecification] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TypeKey] {
        &self.outputs
    }

    pub fn has_cleanup(&self) -> bool {
        self.has_cleanup
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn variadic(&self) -> bool {
        self.variadic
    }

    /// The named set this provider was declared in, if any; used by the solver's
    /// "needed by" chains
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_ref().map(|s| s.as_str())
    }

    pub(crate) fn mark_declared_in(&mut self, set_name: &str) {
        self.set_name = Some(set_name.to_owned());
    }
}

/// Resolves a field selector against a struct's declared fields, in declaration order.  Shared
/// by `struct_provider!` and `fields_of!`.  Returns `None` after recording errors when the
/// selection is invalid.
pub(crate) fn select_struct_fields<'a>(
    s: &'a StructModel,
    selector: &FieldSelector,
    construct: &str,
    pos: &Pos,
    errors: &mut ErrorCollector,
) -> Option<Vec<&'a StructFieldModel>> {
    match selector {
        FieldSelector::All => {
            Some(s.fields.iter().filter(|f| !f.prevented).collect())
        }
        FieldSelector::Named(names) => {
            let mut selected = Vec::new();
            let mut ok = true;
            for (i, name) in names.iter().enumerate() {
                if name == "*" {
                    errors.add(
                        WeftError::invalid_argument(format!(
                            "{} cannot mix \"*\" with named fields",
                            construct
                        ))
                        .at(pos.clone()),
                    );
                    ok = false;
                    continue;
                }
                if names[..i].contains(name) {
                    errors.add(
                        WeftError::invalid_argument(format!(
                            "{} lists field \"{}\" of {} twice",
                            construct, name, s.name
                        ))
                        .at(pos.clone()),
                    );
                    ok = false;
                    continue;
                }
                match s.fields.iter().find(|f| &f.name == name) {
                    None => {
                        errors.add(
                            WeftError::invalid_argument(format!(
                                "struct {} has no field \"{}\"",
                                s.name, name
                            ))
                            .at(pos.clone()),
                        );
                        ok = false;
                    }
                    Some(field) if field.prevented => {
                        errors.add(
                            WeftError::invalid_argument(format!(
                                "field \"{}\" of {} is prevented from injection with #[weft(\"-\")]",
                                name, s.name
                            ))
                            .at(pos.clone()),
                        );
                        ok = false;
                    }
                    Some(field) => selected.push(field),
                }
            }
            if ok {
                Some(selected)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ParamModel;

    fn pos() -> Pos {
        Pos::new("src/app.rs", 1, 1)
    }

    fn function(name: &str, params: Vec<TypeKey>, ret: TypeKey) -> FunctionModel {
        FunctionModel {
            name: name.to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(),
            exported: true,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, key)| ParamModel {
                    name: format!("arg{}", i),
                    key,
                })
                .collect(),
            ret: Some(ret),
            variadic: false,
        }
    }

    #[test]
    fn plain_return_has_no_channels() {
        let f = function("new_config", vec![], TypeKey::named("app", "Config"));
        let p = ProviderSpecification::from_function(&f).unwrap();

        assert_eq!(&[TypeKey::named("app", "Config")], p.outputs());
        assert!(!p.has_cleanup());
        assert!(!p.has_error());
    }

    #[test]
    fn result_return_sets_the_error_channel() {
        let f = function(
            "new_db",
            vec![TypeKey::named("app", "Config")],
            TypeKey::apply(
                TypeKey::builtin("Result"),
                vec![TypeKey::named("app", "Db"), TypeKey::named("app", "Error")],
            ),
        );
        let p = ProviderSpecification::from_function(&f).unwrap();

        assert_eq!(&[TypeKey::named("app", "Db")], p.outputs());
        assert!(p.has_error());
        assert!(!p.has_cleanup());
    }

    #[test]
    fn cleanup_tuple_inside_result_sets_both_channels() {
        let f = function(
            "new_db",
            vec![],
            TypeKey::apply(
                TypeKey::builtin("Result"),
                vec![
                    TypeKey::Tuple(vec![TypeKey::named("app", "Db"), TypeKey::cleanup()]),
                    TypeKey::named("app", "Error"),
                ],
            ),
        );
        let p = ProviderSpecification::from_function(&f).unwrap();

        assert_eq!(&[TypeKey::named("app", "Db")], p.outputs());
        assert!(p.has_error());
        assert!(p.has_cleanup());
    }

    #[test]
    fn unit_return_is_rejected() {
        let mut f = function("do_nothing", vec![], TypeKey::Unit);
        f.ret = None;

        let e = ProviderSpecification::from_function(&f).err().unwrap();
        assert!(e.to_string().contains("must return a value"), "{}", e);
    }

    #[test]
    fn wide_tuples_are_rejected_naming_the_count() {
        let f = function(
            "new_db",
            vec![],
            TypeKey::Tuple(vec![
                TypeKey::named("app", "Db"),
                TypeKey::cleanup(),
                TypeKey::named("app", "Error"),
            ]),
        );

        let e = ProviderSpecification::from_function(&f).err().unwrap();
        assert!(e.to_string().contains("tuple of 3 elements"), "{}", e);
    }

    #[test]
    fn second_tuple_element_must_be_cleanup() {
        let f = function(
            "new_db",
            vec![],
            TypeKey::Tuple(vec![
                TypeKey::named("app", "Db"),
                TypeKey::named("app", "Stats"),
            ]),
        );

        let e = ProviderSpecification::from_function(&f).err().unwrap();
        assert!(
            e.to_string().contains("second return value"),
            "unexpected message: {}",
            e
        );
    }

    #[test]
    fn duplicate_parameter_types_are_rejected() {
        let f = function(
            "new_pair",
            vec![TypeKey::builtin("u16"), TypeKey::builtin("u16")],
            TypeKey::named("app", "Pair"),
        );

        let e = ProviderSpecification::from_function(&f).err().unwrap();
        assert!(e.to_string().contains("two parameters of type u16"), "{}", e);
    }

    #[test]
    fn variadic_final_parameter_resolves_as_its_element_type() {
        let mut f = function(
            "new_server",
            vec![
                TypeKey::named("app", "Config"),
                TypeKey::apply(TypeKey::builtin("Vec"), vec![TypeKey::named("app", "Opt")]),
            ],
            TypeKey::named("app", "Server"),
        );
        f.variadic = true;

        let p = ProviderSpecification::from_function(&f).unwrap();
        assert!(p.variadic());
        assert_eq!(TypeKey::named("app", "Opt"), p.inputs()[1].key);
    }

    #[test]
    fn variadic_without_a_vec_parameter_is_rejected() {
        let mut f = function("new_server", vec![TypeKey::named("app", "Opt")], TypeKey::named("app", "Server"));
        f.variadic = true;

        let e = ProviderSpecification::from_function(&f).err().unwrap();
        assert!(e.to_string().contains("must be Vec<T>"), "{}", e);
    }
}
