#![deny(warnings)]

//! The marker surface for `weft`, a compile-time dependency injection code generator.
//!
//! Nothing in this crate does anything at runtime.  The macros expand to inert marker values
//! (or, for `build!`, to a panic which generated code replaces), and exist so that source files
//! using them still parse and type check before the generator has run.  The real work happens in
//! `weft-codegen`, which scans source files for these markers, solves the dependency graph they
//! describe, and emits an initialization function for every injector stub.
//!
//! A quick sketch of the vocabulary:
//!
//! ```no_execute
//! use weft::ProviderSet;
//!
//! pub struct Config { pub port: u16 }
//! pub struct Server { pub config: Config }
//!
//! pub fn new_config() -> Config { Config { port: 8080 } }
//! pub fn new_server(config: Config) -> Server { Server { config } }
//!
//! static SERVER_SET: ProviderSet = weft::set!(new_config, new_server);
//!
//! /// Injector stub; weft generates the real body.
//! pub fn init_server() -> Server {
//!     weft::build!(SERVER_SET)
//! }
//! ```

/// A no-argument teardown action returned alongside a constructed value.
///
/// A provider that needs teardown returns `(T, Cleanup)` (or `Result<(T, Cleanup), E>`); the
/// generated injector composes all cleanups into one, invoked in reverse construction order.
pub type Cleanup = Box<dyn FnOnce()>;

/// The inert value produced by [`set!`].  Declare provider sets as statics of this type so other
/// sets and injectors can refer to them by name.
pub struct ProviderSet {
    _marker: (),
}

impl ProviderSet {
    #[doc(hidden)]
    pub const fn __new() -> ProviderSet {
        ProviderSet { _marker: () }
    }
}

/// The inert value produced by the item-level markers ([`bind!`], [`value!`],
/// [`interface_value!`], [`struct_provider!`], [`fields_of!`]).  These only carry meaning inside
/// a [`set!`] or [`build!`] invocation.
pub struct SetItem {
    _marker: (),
}

impl SetItem {
    #[doc(hidden)]
    pub const fn __new() -> SetItem {
        SetItem { _marker: () }
    }
}

/// Groups providers and related declarations into a reusable, named provider set.
///
/// Items may be paths to provider functions, paths to other `ProviderSet` statics, or any of the
/// item-level markers.
#[macro_export]
macro_rules! set {
    ($($items:tt)*) => {
        $crate::ProviderSet::__new()
    };
}

/// Names the items that resolve one injector.  The body of an injector stub must consist of
/// exactly this one call; the generator replaces the stub with a real implementation.
#[macro_export]
macro_rules! build {
    ($($items:tt)*) => {
        panic!("this injector stub must be replaced by weft-generated code")
    };
}

/// Asserts that requests for the interface type are satisfied by the concrete type:
/// `bind!(dyn Store, PgStore)`.
#[macro_export]
macro_rules! bind {
    ($($args:tt)*) => {
        $crate::SetItem::__new()
    };
}

/// Provides a fixed, side-effect-free expression as a value of its own type.
#[macro_export]
macro_rules! value {
    ($($args:tt)*) => {
        $crate::SetItem::__new()
    };
}

/// Provides a fixed expression under an interface type it implements:
/// `interface_value!(dyn Log, StderrLog)`.
#[macro_export]
macro_rules! interface_value {
    ($($args:tt)*) => {
        $crate::SetItem::__new()
    };
}

/// Provides a struct by filling the named fields (or `"*"` for all fields not opted out with
/// `#[weft("-")]`) from other providers: `struct_provider!(Server, "config", "log")`.
#[macro_export]
macro_rules! struct_provider {
    ($($args:tt)*) => {
        $crate::SetItem::__new()
    };
}

/// Provides the named fields of an already-provided struct as standalone values:
/// `fields_of!(Config, "port")`.
#[macro_export]
macro_rules! fields_of {
    ($($args:tt)*) => {
        $crate::SetItem::__new()
    };
}
