//! Field extractors: the parsed form of a `fields_of!(S, ...)` marker.  Each selected field
//! becomes a provider that takes the parent struct as its only input and yields the field's
//! type.

use crate::error::{ErrorCollector, Pos, WeftError};
use crate::model::{FieldSelector, ProgramModel, TypeKey, TypeRefModel};
use crate::spec::provider::select_struct_fields;

#[derive(Debug, Clone)]
pub struct FieldSpecification {
    parent: TypeKey,
    name: String,
    out: TypeKey,
    pos: Pos,
}

impl FieldSpecification {
    /// Expands one `fields_of!` marker into a `FieldSpecification` per selected field
    pub(crate) fn from_marker(
        model: &ProgramModel,
        target: &TypeRefModel,
        selector: &FieldSelector,
        pos: &Pos,
        errors: &mut ErrorCollector,
    ) -> Vec<FieldSpecification> {
        let s = match model.struct_model(&target.key) {
            Some(s) => s,
            None => {
                errors.add(
                    WeftError::invalid_argument(format!(
                        "fields_of! requires a struct type; {} is not a struct",
                        target.key
                    ))
                    .at(target.pos.clone()),
                );
                return Vec::new();
            }
        };

        let selected = match select_struct_fields(s, selector, "fields_of!", pos, errors) {
            Some(selected) => selected,
            None => return Vec::new(),
        };

        selected
            .into_iter()
            .map(|field| FieldSpecification {
                parent: target.key.clone(),
                name: field.name.clone(),
                out: field.key.clone(),
                pos: pos.clone(),
            })
            .collect()
    }

    pub fn parent(&self) -> &TypeKey {
        &self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn out(&self) -> &TypeKey {
        &self.out
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{PackageId, PackageModel, StructFieldModel, StructModel};
    use std::rc::Rc;

    fn pos() -> Pos {
        Pos::new("src/app.rs", 6, 1)
    }

    fn model_with_config() -> ProgramModel {
        let mut pkg = PackageModel::default();
        pkg.id = PackageId::new("app");
        pkg.structs.push(Rc::new(StructModel {
            name: "Config".to_owned(),
            pkg: PackageId::new("app"),
            pos: pos(),
            exported: true,
            fields: vec![
                StructFieldModel {
                    name: "port".to_owned(),
                    key: TypeKey::builtin("u16"),
                    exported: true,
                    prevented: false,
                    pos: pos(),
                },
                StructFieldModel {
                    name: "secret".to_owned(),
                    key: TypeKey::builtin("String"),
                    exported: false,
                    prevented: true,
                    pos: pos(),
                },
            ],
        }));
        ProgramModel {
            packages: vec![pkg],
        }
    }

    fn target() -> TypeRefModel {
        TypeRefModel {
            key: TypeKey::named("app", "Config"),
            pos: pos(),
        }
    }

    #[test]
    fn wildcard_selects_everything_not_prevented() {
        let model = model_with_config();
        let mut errors = ErrorCollector::new();
        let fields = FieldSpecification::from_marker(
            &model,
            &target(),
            &FieldSelector::All,
            &pos(),
            &mut errors,
        );

        assert!(errors.is_empty());
        assert_eq!(1, fields.len());
        assert_eq!("port", fields[0].name());
        assert_eq!(&TypeKey::builtin("u16"), fields[0].out());
        assert_eq!(&TypeKey::named("app", "Config"), fields[0].parent());
    }

    #[test]
    fn naming_a_prevented_field_is_an_error() {
        let model = model_with_config();
        let mut errors = ErrorCollector::new();
        let fields = FieldSpecification::from_marker(
            &model,
            &target(),
            &FieldSelector::Named(vec!["secret".to_owned()]),
            &pos(),
            &mut errors,
        );

        assert!(fields.is_empty());
        let errors = errors.into_errors();
        assert_eq!(1, errors.len());
        assert!(errors[0].to_string().contains("prevented"), "{}", errors[0]);
    }

    #[test]
    fn non_struct_targets_are_rejected() {
        let model = model_with_config();
        let mut errors = ErrorCollector::new();
        let fields = FieldSpecification::from_marker(
            &model,
            &TypeRefModel {
                key: TypeKey::builtin("u16"),
                pos: pos(),
            },
            &FieldSelector::All,
            &pos(),
            &mut errors,
        );

        assert!(fields.is_empty());
        assert_eq!(1, errors.len());
    }
}
