//! The emitter.  Renders solved plans as a Rust source file: one function per injector, with a
//! `let` binding per call in plan order.  Value expressions are copied token for token from the
//! user's markers; everything else is reconstructed from the plan.  Cleanups accumulate as the
//! plan executes and are composed into a single `weft::Cleanup` invoked in reverse construction
//! order; when a later fallible call fails, the cleanups accumulated so far run before the
//! error returns.
//!
//! The output is deterministic byte for byte for a given program, which is what makes
//! golden-file testing of generated injectors possible.

use crate::graph::{CallKind, InjectorPlan, SourceRef};
use crate::model::TypeKey;
use crate::spec::InjectorSpecification;
use heck::SnakeCase;
use quote::ToTokens;
use std::collections::HashMap;

/// The fixed first line of every generated file
pub const GENERATED_HEADER: &str = "// Code generated by weft. DO NOT EDIT.";

/// Renders the whole generated file for the given solved injectors, in their given order
pub(crate) fn render_file(injectors: &[(&InjectorSpecification, &InjectorPlan)]) -> String {
    let mut out = String::new();
    out.push_str(GENERATED_HEADER);
    out.push('\n');
    for (injector, plan) in injectors {
        out.push('\n');
        out.push_str(&render_injector(injector, plan));
    }
    out
}

/// Renders a single generated injector function
pub(crate) fn render_injector(injector: &InjectorSpecification, plan: &InjectorPlan) -> String {
    let mut names = NameAllocator::default();

    //Pick a local name per call up front so later calls can reference earlier outputs
    let locals: Vec<String> = plan
        .calls
        .iter()
        .map(|call| {
            let base = match call.kind {
                CallKind::FieldAccess => call.name.to_snake_case(),
                _ => local_base(&call.output),
            };
            names.allocate(&base)
        })
        .collect();

    let mut uses = UseCounter::new(plan);

    let mut body = String::new();
    //Cleanup locals accumulated so far, in construction order
    let mut cleanups: Vec<String> = Vec::new();

    for (idx, call) in plan.calls.iter().enumerate() {
        let local = &locals[idx];

        let expr = match call.kind {
            CallKind::Value => call
                .value
                .as_ref()
                .expect("value calls carry their expression")
                .expr()
                .to_token_stream()
                .to_string(),
            CallKind::Function => {
                let mut args: Vec<String> = Vec::new();
                for (i, src) in call.inputs_from.iter().enumerate() {
                    let arg = uses.use_source(src, &locals, injector);
                    if call.variadic && i + 1 == call.inputs_from.len() {
                        args.push(format!("vec![{}]", arg));
                    } else {
                        args.push(arg);
                    }
                }
                format!(
                    "{}({})",
                    callee_path(call.pkg.as_ref().map(|p| p.import_path.as_str()), &call.name),
                    args.join(", ")
                )
            }
            CallKind::StructLiteral => {
                let mut fields: Vec<String> = Vec::new();
                for (i, src) in call.inputs_from.iter().enumerate() {
                    let field = call.input_fields[i]
                        .as_ref()
                        .expect("struct literal inputs carry field names");
                    fields.push(format!(
                        "{}: {}",
                        field,
                        uses.use_source(src, &locals, injector)
                    ));
                }
                format!(
                    "{} {{ {} }}",
                    callee_path(call.pkg.as_ref().map(|p| p.import_path.as_str()), &call.name),
                    fields.join(", ")
                )
            }
            CallKind::FieldAccess => {
                let parent = uses.use_source(&call.inputs_from[0], &locals, injector);
                format!("{}.{}", parent, call.name)
            }
        };

        let pattern = if call.has_cleanup {
            format!("({}, {}_cleanup)", local, local)
        } else {
            local.clone()
        };

        if call.has_error {
            if cleanups.is_empty() {
                body.push_str(&format!("    let {} = {}?;\n", pattern, expr));
            } else {
                //Run the cleanups accumulated so far before propagating the failure
                body.push_str(&format!("    let {} = match {} {{\n", pattern, expr));
                body.push_str("        Ok(v) => v,\n");
                body.push_str("        Err(e) => {\n");
                for cleanup in cleanups.iter().rev() {
                    body.push_str(&format!("            {}();\n", cleanup));
                }
                body.push_str("            return Err(e.into());\n");
                body.push_str("        }\n");
                body.push_str("    };\n");
            }
        } else {
            body.push_str(&format!("    let {} = {};\n", pattern, expr));
        }

        if call.has_cleanup {
            cleanups.push(format!("{}_cleanup", local));
        }
    }

    let out_expr = uses.use_source(&plan.output, &locals, injector);

    if injector.sig().returns_cleanup {
        body.push_str("    let cleanup: weft::Cleanup = Box::new(move || {\n");
        for cleanup in cleanups.iter().rev() {
            body.push_str(&format!("        {}();\n", cleanup));
        }
        body.push_str("    });\n");
    }

    let tail = match (injector.sig().returns_error, injector.sig().returns_cleanup) {
        (false, false) => out_expr,
        (false, true) => format!("({}, cleanup)", out_expr),
        (true, false) => format!("Ok({})", out_expr),
        (true, true) => format!("Ok(({}, cleanup))", out_expr),
    };
    body.push_str(&format!("    {}\n", tail));

    let params: Vec<String> = injector
        .params()
        .iter()
        .map(|p| format!("{}: {}", p.name, type_text(&p.key)))
        .collect();

    format!(
        "{}fn {}({}) -> {} {{\n{}}}\n",
        if injector.is_exported() { "pub " } else { "" },
        injector.name(),
        params.join(", "),
        type_text(injector.declared_ret()),
        body
    )
}

/// Renders a `TypeKey` as source text, as seen from the generated file at the crate root.
/// Trait keys render as `impl Trait` in signature position and `dyn Trait` when nested inside
/// another type.
fn type_text(key: &TypeKey) -> String {
    type_text_at(key, true)
}

fn type_text_at(key: &TypeKey, top: bool) -> String {
    match key {
        TypeKey::Named { pkg, name } => {
            if pkg == "weft" {
                format!("weft::{}", name)
            } else {
                format!("crate::{}::{}", pkg, name)
            }
        }
        TypeKey::Trait { pkg, name } => {
            let spelled = if top { "impl" } else { "dyn" };
            format!("{} crate::{}::{}", spelled, pkg, name)
        }
        TypeKey::Builtin(name) => name.clone(),
        TypeKey::Ref(inner) => format!("&{}", type_text_at(inner, false)),
        TypeKey::Apply { base, args } => {
            //`impl Trait` survives through the return channels (Result's Ok position) but
            //nowhere else; any other nesting must be `dyn`
            let is_result = matches!(base.as_ref(), TypeKey::Builtin(n) if n == "Result");
            let args: Vec<String> = args
                .iter()
                .enumerate()
                .map(|(i, a)| type_text_at(a, top && is_result && i == 0))
                .collect();
            format!("{}<{}>", type_text_at(base, false), args.join(", "))
        }
        TypeKey::Tuple(elems) => {
            let elems: Vec<String> = elems.iter().map(|e| type_text_at(e, top)).collect();
            format!("({})", elems.join(", "))
        }
        TypeKey::Unit => "()".to_owned(),
    }
}

fn callee_path(pkg: Option<&str>, name: &str) -> String {
    match pkg {
        Some(pkg) => format!("crate::{}::{}", pkg, name),
        None => name.to_owned(),
    }
}

/// The base local-variable name for a value of the given type
fn local_base(key: &TypeKey) -> String {
    match key {
        TypeKey::Named { name, .. } | TypeKey::Trait { name, .. } => name.to_snake_case(),
        TypeKey::Builtin(name) => name.to_snake_case(),
        TypeKey::Ref(inner) => local_base(inner),
        TypeKey::Apply { base, .. } => local_base(base),
        TypeKey::Tuple(_) | TypeKey::Unit => "value".to_owned(),
    }
}

#[derive(Default)]
struct NameAllocator {
    taken: HashMap<String, usize>,
}

impl NameAllocator {
    fn allocate(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "value" } else { base };
        let count = self.taken.entry(base.to_owned()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.to_owned()
        } else {
            format!("{}_{}", base, count)
        }
    }
}

/// Tracks how many uses each source has left, so that every use except the last clones instead
/// of moving
struct UseCounter {
    remaining: HashMap<SourceRef, usize>,
}

impl UseCounter {
    fn new(plan: &InjectorPlan) -> UseCounter {
        let mut remaining: HashMap<SourceRef, usize> = HashMap::new();
        for call in &plan.calls {
            for src in &call.inputs_from {
                *remaining.entry(*src).or_insert(0) += 1;
            }
        }
        *remaining.entry(plan.output).or_insert(0) += 1;
        UseCounter { remaining }
    }

    fn use_source(
        &mut self,
        src: &SourceRef,
        locals: &[String],
        injector: &InjectorSpecification,
    ) -> String {
        let name = match src {
            SourceRef::Call(idx) => locals[*idx].clone(),
            SourceRef::Arg(idx) => injector.params()[*idx].name.clone(),
        };
        let remaining = self.remaining.entry(*src).or_insert(1);
        if *remaining > 1 {
            *remaining -= 1;
            format!("{}.clone()", name)
        } else {
            name
        }
    }
}
