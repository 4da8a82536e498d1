//! Type identities.  Everything the dependency graph reasons about is keyed by a `TypeKey`, a
//! structural description of a type as it was spelled in the loaded source.  Two occurrences of
//! the same spelling in the same package compare equal, which is what lets a provider's output
//! satisfy another provider's input without any access to rustc's real type system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Identifies one package.  The loader maps each loaded source file to a package; `import_path`
/// is the `::`-joined module path and `short_name` its last segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub import_path: String,
    pub short_name: String,
}

impl PackageId {
    pub fn new(import_path: impl Into<String>) -> PackageId {
        let import_path = import_path.into();
        let short_name = short_name_of(&import_path).to_owned();
        PackageId {
            import_path,
            short_name,
        }
    }
}

impl Default for PackageId {
    fn default() -> PackageId {
        PackageId::new("")
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.import_path)
    }
}

fn short_name_of(import_path: &str) -> &str {
    import_path.rsplit("::").next().unwrap_or(import_path)
}

/// The structural identity of a type.  Supports structural equality and a stable hash, so it can
/// key the typed maps the graph engine is built on.
///
/// Traits get their own variant because the engine treats them specially everywhere: they are
/// the "interface" side of `bind!`/`interface_value!`, they appear in signatures as
/// `impl Trait`, and they can never be constructed directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKey {
    /// A named non-trait type declared in a loaded package
    Named { pkg: String, name: String },
    /// A trait, spelled `dyn Trait` in markers and `impl Trait` in signatures
    Trait { pkg: String, name: String },
    /// A primitive or well-known standard type that needs no package qualification
    Builtin(String),
    /// A reference `&T`
    Ref(Box<TypeKey>),
    /// A generic instantiation such as `Vec<T>` or `Result<T, E>`
    Apply {
        base: Box<TypeKey>,
        args: Vec<TypeKey>,
    },
    /// A tuple `(A, B, ...)`
    Tuple(Vec<TypeKey>),
    /// The unit type
    Unit,
}

impl TypeKey {
    pub fn named(pkg: impl Into<String>, name: impl Into<String>) -> TypeKey {
        TypeKey::Named {
            pkg: pkg.into(),
            name: name.into(),
        }
    }

    pub fn trait_(pkg: impl Into<String>, name: impl Into<String>) -> TypeKey {
        TypeKey::Trait {
            pkg: pkg.into(),
            name: name.into(),
        }
    }

    pub fn builtin(name: impl Into<String>) -> TypeKey {
        TypeKey::Builtin(name.into())
    }

    pub fn apply(base: TypeKey, args: Vec<TypeKey>) -> TypeKey {
        TypeKey::Apply {
            base: Box::new(base),
            args,
        }
    }

    /// The key for `weft::Cleanup`, the teardown channel in provider and injector returns.
    pub fn cleanup() -> TypeKey {
        TypeKey::named("weft", "Cleanup")
    }

    pub fn is_cleanup(&self) -> bool {
        *self == TypeKey::cleanup()
    }

    pub fn is_trait(&self) -> bool {
        match self {
            TypeKey::Trait { .. } => true,
            _ => false,
        }
    }

    /// The bare name of a named or trait key
    pub fn name(&self) -> Option<&str> {
        match self {
            TypeKey::Named { name, .. } | TypeKey::Trait { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The import path of the declaring package, for named and trait keys
    pub fn package(&self) -> Option<&str> {
        match self {
            TypeKey::Named { pkg, .. } | TypeKey::Trait { pkg, .. } => Some(pkg),
            _ => None,
        }
    }

    /// A hash that is stable across runs, suitable for bucketing in `TypeMap` and for content
    /// hashes in the generation manifest.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(42);
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeKey::Named { pkg, name } => write!(f, "{}::{}", short_name_of(pkg), name),
            TypeKey::Trait { pkg, name } => write!(f, "dyn {}::{}", short_name_of(pkg), name),
            TypeKey::Builtin(name) => write!(f, "{}", name),
            TypeKey::Ref(inner) => write!(f, "&{}", inner),
            TypeKey::Apply { base, args } => {
                write!(f, "{}<", base)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeKey::Tuple(elems) => {
                write!(f, "(")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, ")")
            }
            TypeKey::Unit => write!(f, "()"),
        }
    }
}
