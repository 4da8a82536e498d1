//! Interface bindings: the parsed and validated form of a `bind!(dyn Iface, Concrete)` marker.
//! A binding is a rename, not a provider.  It tells the map builder to satisfy requests for the
//! interface type with whatever already provides the concrete type.

use crate::error::{Pos, WeftError, WeftResult};
use crate::model::{ProgramModel, TypeKey, TypeRefModel};

#[derive(Debug, Clone)]
pub struct BindingSpecification {
    iface: TypeKey,
    provided: TypeKey,
    pos: Pos,
}

impl BindingSpecification {
    pub(crate) fn from_marker(
        model: &ProgramModel,
        iface: &TypeRefModel,
        concrete: &TypeRefModel,
        pos: &Pos,
    ) -> WeftResult<BindingSpecification> {
        if !model.is_declared_trait(&iface.key) {
            return Err(WeftError::invalid_argument(format!(
                "the first argument to bind! must be an interface; {} is not a trait",
                iface.key
            ))
            .at(iface.pos.clone()));
        }

        if concrete.key == iface.key {
            return Err(WeftError::incompatible_binding(format!(
                "cannot bind {} to itself",
                iface.key
            ))
            .at(pos.clone()));
        }

        if concrete.key.is_trait() {
            return Err(WeftError::incompatible_binding(format!(
                "the second argument to bind! must be a concrete type, not {}",
                concrete.key
            ))
            .at(concrete.pos.clone()));
        }

        if !model.implements(&concrete.key, &iface.key) {
            return Err(WeftError::incompatible_binding(format!(
                "{} does not implement {}",
                concrete.key, iface.key
            ))
            .at(pos.clone()));
        }

        Ok(BindingSpecification {
            iface: iface.key.clone(),
            provided: concrete.key.clone(),
            pos: pos.clone(),
        })
    }

    pub fn iface(&self) -> &TypeKey {
        &self.iface
    }

    pub fn provided(&self) -> &TypeKey {
        &self.provided
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ImplModel, PackageModel, TraitModel};
    use crate::model::PackageId;

    fn pos() -> Pos {
        Pos::new("src/app.rs", 2, 1)
    }

    fn type_ref(key: TypeKey) -> TypeRefModel {
        TypeRefModel { key, pos: pos() }
    }

    fn model_with_impl() -> ProgramModel {
        let mut pkg = PackageModel::default();
        pkg.id = PackageId::new("app");
        pkg.traits.push(TraitModel {
            name: "Log".to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(),
            exported: true,
        });
        pkg.impls.push(ImplModel {
            trait_key: TypeKey::trait_("app", "Log"),
            for_key: TypeKey::named("app", "StderrLog"),
            pos: pos(),
        });
        ProgramModel {
            packages: vec![pkg],
        }
    }

    #[test]
    fn valid_binding_is_accepted() {
        let model = model_with_impl();
        let b = BindingSpecification::from_marker(
            &model,
            &type_ref(TypeKey::trait_("app", "Log")),
            &type_ref(TypeKey::named("app", "StderrLog")),
            &pos(),
        )
        .unwrap();

        assert_eq!(&TypeKey::trait_("app", "Log"), b.iface());
        assert_eq!(&TypeKey::named("app", "StderrLog"), b.provided());
    }

    #[test]
    fn first_argument_must_be_a_declared_trait() {
        let model = model_with_impl();
        let e = BindingSpecification::from_marker(
            &model,
            &type_ref(TypeKey::named("app", "StderrLog")),
            &type_ref(TypeKey::named("app", "StderrLog")),
            &pos(),
        )
        .err()
        .unwrap();

        assert!(e.to_string().contains("is not a trait"), "{}", e);
    }

    #[test]
    fn binding_an_interface_to_itself_is_rejected() {
        let model = model_with_impl();
        let e = BindingSpecification::from_marker(
            &model,
            &type_ref(TypeKey::trait_("app", "Log")),
            &type_ref(TypeKey::trait_("app", "Log")),
            &pos(),
        )
        .err()
        .unwrap();

        assert!(e.to_string().contains("to itself"), "{}", e);
    }

    #[test]
    fn the_concrete_type_must_implement_the_interface() {
        let model = model_with_impl();
        let e = BindingSpecification::from_marker(
            &model,
            &type_ref(TypeKey::trait_("app", "Log")),
            &type_ref(TypeKey::named("app", "NullLog")),
            &pos(),
        )
        .err()
        .unwrap();

        assert!(e.to_string().contains("does not implement"), "{}", e);
    }
}
