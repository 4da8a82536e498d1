//! Post-solve compatibility checks: once a plan exists, the injector's declared signature must
//! admit every feature the plan requires, and every identifier a copied value expression
//! references must be visible from the injector's package.

use crate::error::{ErrorCollector, WeftError};
use crate::graph::solve::InjectorPlan;
use crate::model::IdentTarget;
use crate::spec::InjectorSpecification;

pub(crate) fn check_injector(
    injector: &InjectorSpecification,
    plan: &InjectorPlan,
    errors: &mut ErrorCollector,
) {
    for call in &plan.calls {
        if call.has_cleanup && !injector.sig().returns_cleanup {
            errors.add(
                WeftError::cleanup_mismatch(format!(
                    "provider for {} returns a cleanup but injector {} does not return weft::Cleanup",
                    call.output,
                    injector.name()
                ))
                .at(call.pos.clone()),
            );
        }

        if call.has_error && !injector.sig().returns_error {
            errors.add(
                WeftError::error_mismatch(format!(
                    "provider for {} may fail but injector {} is not allowed to fail",
                    call.output,
                    injector.name()
                ))
                .at(call.pos.clone()),
            );
        }

        if let Some(value) = &call.value {
            for ident in value.refs() {
                match &ident.target {
                    IdentTarget::Exported | IdentTarget::Unknown => {}
                    IdentTarget::PackagePrivate { pkg } => {
                        if pkg != &injector.pkg().import_path {
                            errors.add(
                                WeftError::visibility(format!(
                                    "identifier \"{}\" is not exported by package \"{}\" and is not visible from package \"{}\"",
                                    ident.name,
                                    pkg,
                                    injector.pkg().import_path
                                ))
                                .at(ident.pos.clone()),
                            );
                        }
                    }
                    IdentTarget::Local => {
                        errors.add(
                            WeftError::visibility(format!(
                                "identifier \"{}\" is local to a function and cannot be referenced from generated code",
                                ident.name
                            ))
                            .at(ident.pos.clone()),
                        );
                    }
                }
            }
        }
    }
}
