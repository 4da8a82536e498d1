//! Fixed values: the parsed and validated form of `value!(expr)` and
//! `interface_value!(dyn Iface, expr)` markers.  A value is a provider with no inputs and no
//! cleanup or error channel; its expression is carried through verbatim so the emitter can copy
//! it into the generated injector.

use crate::error::{Pos, WeftError, WeftResult};
use crate::model::{ExprModel, IdentRef, ProgramModel, TypeKey, TypeRefModel};

#[derive(Debug, Clone)]
pub struct ValueSpecification {
    out: TypeKey,
    expr: syn::Expr,
    refs: Vec<IdentRef>,
    pos: Pos,
    interface_value: bool,
}

impl ValueSpecification {
    pub(crate) fn from_value_marker(expr: &ExprModel, pos: &Pos) -> WeftResult<ValueSpecification> {
        if let Some(found) = find_side_effect(&expr.expr) {
            return Err(WeftError::invalid_argument(format!(
                "value expressions must be side-effect free; found {}",
                found
            ))
            .at(expr.pos.clone()));
        }

        let out = expr.key.clone().ok_or_else(|| {
            WeftError::invalid_argument("cannot determine the type of this value expression")
                .at(expr.pos.clone())
        })?;

        if out.is_trait() {
            return Err(WeftError::invalid_argument(format!(
                "value! cannot provide the interface type {}; use interface_value! instead",
                out
            ))
            .at(expr.pos.clone()));
        }

        Ok(ValueSpecification {
            out,
            expr: expr.expr.clone(),
            refs: expr.refs.clone(),
            pos: pos.clone(),
            interface_value: false,
        })
    }

    pub(crate) fn from_interface_value_marker(
        model: &ProgramModel,
        iface: &TypeRefModel,
        expr: &ExprModel,
        pos: &Pos,
    ) -> WeftResult<ValueSpecification> {
        if !model.is_declared_trait(&iface.key) {
            return Err(WeftError::invalid_argument(format!(
                "the first argument to interface_value! must be an interface; {} is not a trait",
                iface.key
            ))
            .at(iface.pos.clone()));
        }

        if let Some(found) = find_side_effect(&expr.expr) {
            return Err(WeftError::invalid_argument(format!(
                "value expressions must be side-effect free; found {}",
                found
            ))
            .at(expr.pos.clone()));
        }

        let concrete = expr.key.clone().ok_or_else(|| {
            WeftError::invalid_argument("cannot determine the type of this value expression")
                .at(expr.pos.clone())
        })?;

        if !model.implements(&concrete, &iface.key) {
            return Err(WeftError::incompatible_binding(format!(
                "{} does not implement {}",
                concrete, iface.key
            ))
            .at(pos.clone()));
        }

        Ok(ValueSpecification {
            out: iface.key.clone(),
            expr: expr.expr.clone(),
            refs: expr.refs.clone(),
            pos: pos.clone(),
            interface_value: true,
        })
    }

    pub fn out(&self) -> &TypeKey {
        &self.out
    }

    pub fn expr(&self) -> &syn::Expr {
        &self.expr
    }

    pub fn refs(&self) -> &[IdentRef] {
        &self.refs
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    pub fn is_interface_value(&self) -> bool {
        self.interface_value
    }
}

/// Walks a value expression looking for anything whose evaluation could have side effects.
/// Returns a description of the first offending form, or `None` when the expression is pure.
fn find_side_effect(expr: &syn::Expr) -> Option<&'static str> {
    use syn::Expr;

    match expr {
        Expr::Lit(_) | Expr::Path(_) => None,
        Expr::Struct(s) => s.fields.iter().map(|f| &f.expr).find_map(find_side_effect),
        Expr::Reference(r) => find_side_effect(&r.expr),
        Expr::Paren(p) => find_side_effect(&p.expr),
        Expr::Group(g) => find_side_effect(&g.expr),
        Expr::Unary(u) => find_side_effect(&u.expr),
        Expr::Binary(b) => find_side_effect(&b.left).or_else(|| find_side_effect(&b.right)),
        Expr::Cast(c) => find_side_effect(&c.expr),
        Expr::Field(f) => find_side_effect(&f.base),
        Expr::Tuple(t) => t.elems.iter().find_map(find_side_effect),
        Expr::Array(a) => a.elems.iter().find_map(find_side_effect),
        Expr::Index(i) => find_side_effect(&i.expr).or_else(|| find_side_effect(&i.index)),
        Expr::Call(_) => Some("a function call"),
        Expr::MethodCall(_) => Some("a method call"),
        Expr::Macro(_) => Some("a macro invocation"),
        Expr::Await(_) => Some("an await"),
        _ => Some("an unsupported expression form"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use syn::parse_quote;

    fn pos() -> Pos {
        Pos::new("src/app.rs", 4, 1)
    }

    fn expr_model(expr: syn::Expr, key: Option<TypeKey>) -> ExprModel {
        ExprModel {
            expr,
            key,
            refs: Vec::new(),
            pos: pos(),
        }
    }

    #[test]
    fn struct_literals_are_accepted() {
        let expr = expr_model(
            parse_quote! { Config { port: 8080 } },
            Some(TypeKey::named("app", "Config")),
        );
        let v = ValueSpecification::from_value_marker(&expr, &pos()).unwrap();

        assert_eq!(&TypeKey::named("app", "Config"), v.out());
        assert!(!v.is_interface_value());
    }

    #[test]
    fn calls_are_rejected_as_side_effects() {
        let expr = expr_model(
            parse_quote! { Config::load("app.toml") },
            Some(TypeKey::named("app", "Config")),
        );
        let e = ValueSpecification::from_value_marker(&expr, &pos()).err().unwrap();

        assert!(e.to_string().contains("side-effect free"), "{}", e);
    }

    #[test]
    fn nested_calls_inside_struct_literals_are_found() {
        let expr = expr_model(
            parse_quote! { Config { port: default_port() } },
            Some(TypeKey::named("app", "Config")),
        );
        assert!(ValueSpecification::from_value_marker(&expr, &pos()).is_err());
    }

    #[test]
    fn untypeable_expressions_are_rejected() {
        let expr = expr_model(parse_quote! { mystery }, None);
        let e = ValueSpecification::from_value_marker(&expr, &pos()).err().unwrap();

        assert!(e.to_string().contains("cannot determine the type"), "{}", e);
    }

    #[test]
    fn interface_typed_values_point_at_interface_value() {
        let expr = expr_model(parse_quote! { SINK }, Some(TypeKey::trait_("app", "Log")));
        let e = ValueSpecification::from_value_marker(&expr, &pos()).err().unwrap();

        assert!(e.to_string().contains("use interface_value!"), "{}", e);
    }
}
