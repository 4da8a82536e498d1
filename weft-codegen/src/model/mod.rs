//! The typed program model: the loader's view of the user's source, and the only view of it the
//! graph engine ever sees.  The loader (in the `load` module) parses each source file with `syn`
//! and distills it into the tables here; everything downstream works against these tables and
//! never touches a `syn` item again, except for the value expressions which are carried through
//! verbatim so the emitter can copy them into generated code.

mod typemap;
mod types;

pub use typemap::TypeMap;
pub use types::{PackageId, TypeKey};

use crate::error::Pos;
use std::rc::Rc;

/// One formal parameter of a function
#[derive(Debug, Clone)]
pub struct ParamModel {
    pub name: String,
    pub key: TypeKey,
}

/// A free function, before any decision about whether it is a provider or an injector
#[derive(Debug, Clone)]
pub struct FunctionModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
    pub params: Vec<ParamModel>,
    /// `None` for a unit return
    pub ret: Option<TypeKey>,
    /// Set by `#[weft(variadic)]`; the final parameter is then expected to be `Vec<T>`
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub struct StructFieldModel {
    pub name: String,
    pub key: TypeKey,
    pub exported: bool,
    /// The field carries the `#[weft("-")]` opt-out tag
    pub prevented: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct StructModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
    pub fields: Vec<StructFieldModel>,
}

#[derive(Debug, Clone)]
pub struct TraitModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
}

/// A `const` or `static` item and its declared type
#[derive(Debug, Clone)]
pub struct ConstModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
    pub key: TypeKey,
}

/// An `impl Trait for Type` declaration; the source of the `implements` relation
#[derive(Debug, Clone)]
pub struct ImplModel {
    pub trait_key: TypeKey,
    pub for_key: TypeKey,
    pub pos: Pos,
}

/// Where an identifier referenced from a value expression resolved to.  Drives the post-solve
/// visibility check.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentTarget {
    /// A `pub` item; visible from any package
    Exported,
    /// A non-`pub` item; visible only from its declaring package
    PackagePrivate { pkg: String },
    /// A binding local to the enclosing function (an injector parameter); never visible
    Local,
    /// Not resolved to anything the loader knows about; the visibility check ignores these
    Unknown,
}

#[derive(Debug, Clone)]
pub struct IdentRef {
    pub name: String,
    pub target: IdentTarget,
    pub pos: Pos,
}

/// A value expression exactly as written in a `value!`/`interface_value!` marker, annotated with
/// the type the loader inferred for it and the identifiers it references
#[derive(Debug, Clone)]
pub struct ExprModel {
    pub expr: syn::Expr,
    /// `None` when the loader could not determine the expression's type
    pub key: Option<TypeKey>,
    pub refs: Vec<IdentRef>,
    pub pos: Pos,
}

/// Which fields a `struct_provider!`/`fields_of!` marker selects
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelector {
    /// The `"*"` wildcard: every field not opted out
    All,
    Named(Vec<String>),
}

/// A type argument of a marker, positioned for diagnostics
#[derive(Debug, Clone)]
pub struct TypeRefModel {
    pub key: TypeKey,
    pub pos: Pos,
}

/// One resolved item of a `set!` or `build!` invocation
#[derive(Debug, Clone)]
pub enum MarkerItem {
    /// A bare path, naming either a provider function or another provider set
    Use { path: Vec<String>, pos: Pos },
    Bind {
        iface: TypeRefModel,
        concrete: TypeRefModel,
        pos: Pos,
    },
    Value { expr: ExprModel, pos: Pos },
    InterfaceValue {
        iface: TypeRefModel,
        expr: ExprModel,
        pos: Pos,
    },
    StructLit {
        target: TypeRefModel,
        fields: FieldSelector,
        pos: Pos,
    },
    FieldsOf {
        target: TypeRefModel,
        fields: FieldSelector,
        pos: Pos,
    },
}

impl MarkerItem {
    pub fn pos(&self) -> &Pos {
        match self {
            MarkerItem::Use { pos, .. }
            | MarkerItem::Bind { pos, .. }
            | MarkerItem::Value { pos, .. }
            | MarkerItem::InterfaceValue { pos, .. }
            | MarkerItem::StructLit { pos, .. }
            | MarkerItem::FieldsOf { pos, .. } => pos,
        }
    }
}

/// A named provider set: `static NAME: weft::ProviderSet = weft::set!(...)`
#[derive(Debug, Clone)]
pub struct SetDeclModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
    pub items: Vec<MarkerItem>,
}

/// An injector stub: a function whose body is exactly one `weft::build!(...)` call
#[derive(Debug, Clone)]
pub struct InjectorModel {
    pub name: String,
    pub pkg: PackageId,
    pub pos: Pos,
    pub exported: bool,
    pub params: Vec<ParamModel>,
    pub ret: Option<TypeKey>,
    pub items: Vec<MarkerItem>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageModel {
    pub id: PackageId,
    pub functions: Vec<Rc<FunctionModel>>,
    pub structs: Vec<Rc<StructModel>>,
    pub traits: Vec<TraitModel>,
    pub consts: Vec<ConstModel>,
    pub impls: Vec<ImplModel>,
    pub sets: Vec<Rc<SetDeclModel>>,
    pub injectors: Vec<InjectorModel>,
}

/// The whole loaded program.  Packages are kept in load order (sorted file order), which fixes
/// the declaration order every later phase relies on.
#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    pub packages: Vec<PackageModel>,
}

impl ProgramModel {
    pub fn package(&self, import_path: &str) -> Option<&PackageModel> {
        self.packages.iter().find(|p| p.id.import_path == import_path)
    }

    /// True when the key names a trait that is actually declared somewhere in the program.
    /// A `dyn X` spelling in a marker produces a trait-shaped key whether or not `X` is a trait;
    /// this is how the collector tells the difference.
    pub fn is_declared_trait(&self, key: &TypeKey) -> bool {
        match key {
            TypeKey::Trait { pkg, name } => self
                .package(pkg)
                .map(|p| p.traits.iter().any(|t| &t.name == name))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// True when some loaded `impl` block implements `iface` for `concrete`
    pub fn implements(&self, concrete: &TypeKey, iface: &TypeKey) -> bool {
        self.packages.iter().any(|p| {
            p.impls
                .iter()
                .any(|i| &i.trait_key == iface && &i.for_key == concrete)
        })
    }

    pub fn struct_model(&self, key: &TypeKey) -> Option<&Rc<StructModel>> {
        match key {
            TypeKey::Named { pkg, name } => self
                .package(pkg)
                .and_then(|p| p.structs.iter().find(|s| &s.name == name)),
            _ => None,
        }
    }

    pub fn function(&self, pkg: &str, name: &str) -> Option<&Rc<FunctionModel>> {
        self.package(pkg)
            .and_then(|p| p.functions.iter().find(|f| f.name == name))
    }

    pub fn set_decl(&self, pkg: &str, name: &str) -> Option<&Rc<SetDeclModel>> {
        self.package(pkg)
            .and_then(|p| p.sets.iter().find(|s| s.name == name))
    }

    pub fn const_model(&self, pkg: &str, name: &str) -> Option<&ConstModel> {
        self.package(pkg)
            .and_then(|p| p.consts.iter().find(|c| c.name == name))
    }
}
