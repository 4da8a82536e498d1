//! Rejects provider maps in which any type is reachable from itself through its inputs.  This
//! runs before the solver so that solving can assume termination; types that are simply absent
//! from the map are not treated as cycles here, they surface later as `no_provider`
//! diagnostics.

use crate::error::{ErrorCollector, WeftError};
use crate::model::TypeKey;
use crate::spec::ProviderSetSpecification;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Three-color depth-first search over the provider map, in insertion (declaration) order.
/// Every detected cycle produces a single `cycle` diagnostic positioned at the declaration of
/// the first cycle member reached.
pub(crate) fn verify_acyclic(set: &ProviderSetSpecification, errors: &mut ErrorCollector) {
    let mut colors: HashMap<TypeKey, Color> = HashMap::new();
    let mut stack: Vec<TypeKey> = Vec::new();

    for key in set.provider_map().keys() {
        if color_of(&colors, key) == Color::White {
            visit(set, key, &mut colors, &mut stack, errors);
        }
    }
}

fn color_of(colors: &HashMap<TypeKey, Color>, key: &TypeKey) -> Color {
    colors.get(key).copied().unwrap_or(Color::White)
}

fn visit(
    set: &ProviderSetSpecification,
    key: &TypeKey,
    colors: &mut HashMap<TypeKey, Color>,
    stack: &mut Vec<TypeKey>,
    errors: &mut ErrorCollector,
) {
    colors.insert(key.clone(), Color::Grey);
    stack.push(key.clone());

    let provided = set
        .provider_map()
        .get(key)
        .expect("visited key must be in the provider map");
    for input in provided.input_keys() {
        if !set.provider_map().contains_key(input) {
            //Absent types are the solver's problem, not a cycle
            continue;
        }
        match color_of(colors, input) {
            Color::White => visit(set, input, colors, stack, errors),
            Color::Grey => report_cycle(set, input, stack, errors),
            Color::Black => {}
        }
    }

    stack.pop();
    colors.insert(key.clone(), Color::Black);
}

fn report_cycle(
    set: &ProviderSetSpecification,
    repeated: &TypeKey,
    stack: &[TypeKey],
    errors: &mut ErrorCollector,
) {
    let start = stack
        .iter()
        .position(|k| k == repeated)
        .expect("a grey key is always on the stack");

    let mut chain = String::new();
    for key in &stack[start..] {
        chain.push_str(&key.to_string());
        chain.push_str(" -> ");
    }
    chain.push_str(&repeated.to_string());

    let pos = set
        .provider_map()
        .get(repeated)
        .expect("repeated key must be in the provider map")
        .pos()
        .clone();

    errors.add(WeftError::cycle(format!("cycle for {}: {}", repeated, chain)).at(pos));
}
