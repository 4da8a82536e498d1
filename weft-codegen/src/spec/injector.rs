//! Injector specifications.  The loader recognizes injector stubs syntactically (a function
//! whose body is exactly one `weft::build!` call); this module validates their signatures and
//! exposes the formal arguments as zero-input providers for the map builder.

use crate::error::{Pos, WeftError, WeftResult};
use crate::model::{InjectorModel, MarkerItem, PackageId, ParamModel, TypeKey};
use crate::spec::provider::{decompose_return, ReturnShapeError};
use std::rc::Rc;

/// The channels an injector's declared return type admits
#[derive(Debug, Clone)]
pub struct InjectorSignature {
    pub output: TypeKey,
    pub returns_cleanup: bool,
    pub returns_error: bool,
}

/// The injector's formal parameters, treated as zero-input providers of their declared types
#[derive(Debug, Clone)]
pub struct InjectorArgsSpecification {
    name: String,
    args: Vec<TypeKey>,
    param_names: Vec<String>,
    pos: Pos,
}

impl InjectorArgsSpecification {
    pub fn injector_name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[TypeKey] {
        &self.args
    }

    /// The declared name of the parameter at `index`; lets a collision diagnostic say which
    /// two parameters clashed even though the whole list shares one position
    pub fn param_name(&self, index: usize) -> &str {
        &self.param_names[index]
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }
}

#[derive(Debug, Clone)]
pub struct InjectorSpecification {
    name: String,
    pkg: PackageId,
    pos: Pos,
    exported: bool,
    params: Vec<ParamModel>,
    sig: InjectorSignature,
    declared_ret: TypeKey,
    items: Vec<MarkerItem>,
}

impl InjectorSpecification {
    /// Validates an injector stub's signature.  The same return shapes are accepted as for
    /// provider functions; anything else is an `invalid_injector` diagnostic.
    pub(crate) fn from_model(m: &InjectorModel) -> WeftResult<InjectorSpecification> {
        let shape = decompose_return(m.ret.as_ref()).map_err(|e| {
            let message = match e {
                ReturnShapeError::NoValue => {
                    format!("injector {} must return the type it builds", m.name)
                }
                ReturnShapeError::TooManyValues(n) => format!(
                    "injector {} returns a tuple of {} elements; at most a value and a weft::Cleanup are allowed",
                    m.name, n
                ),
                ReturnShapeError::SecondNotCleanup(got) => format!(
                    "the second return value of injector {} must be weft::Cleanup, not {}",
                    m.name, got
                ),
            };
            WeftError::invalid_injector(message).at(m.pos.clone())
        })?;

        Ok(InjectorSpecification {
            name: m.name.clone(),
            pkg: m.pkg.clone(),
            pos: m.pos.clone(),
            exported: m.exported,
            params: m.params.clone(),
            sig: InjectorSignature {
                output: shape.output,
                returns_cleanup: shape.has_cleanup,
                returns_error: shape.has_error,
            },
            declared_ret: m.ret.clone().expect("a decomposable return type is present"),
            items: m.items.clone(),
        })
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

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    pub fn params(&self) -> &[ParamModel] {
        &self.params
    }

    pub fn sig(&self) -> &InjectorSignature {
        &self.sig
    }

    /// The return type exactly as declared, for re-rendering the signature
    pub fn declared_ret(&self) -> &TypeKey {
        &self.declared_ret
    }

    pub fn items(&self) -> &[MarkerItem] {
        &self.items
    }

    /// The formal arguments packaged for the provider map.  Duplicate argument types are not
    /// rejected here; they collide in the map builder like any other double binding, with the
    /// diagnostic naming both offending parameters.
    pub(crate) fn args_spec(&self) -> Rc<InjectorArgsSpecification> {
        Rc::new(InjectorArgsSpecification {
            name: self.name.clone(),
            args: self.params.iter().map(|p| p.key.clone()).collect(),
            param_names: self.params.iter().map(|p| p.name.clone()).collect(),
            pos: self.pos.clone(),
        })
    }
}
