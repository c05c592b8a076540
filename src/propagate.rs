//! Property propagation from dependencies to a component's publication.

use crate::dependency::Dependency;
use crate::properties::{is_private_key, Properties};

/// Merge the properties of every available, propagating dependency into
/// `base`.
///
/// Dependencies are applied in order, so a later one overrides an earlier
/// one on a key collision, and any of them overrides `base`. Registry and
/// store bookkeeping keys (`service.id`, `service.pid`, dotted keys, ...)
/// stay with their source.
pub fn merge<'a>(
    base: &Properties,
    dependencies: impl IntoIterator<Item = &'a dyn Dependency>,
) -> Properties {
    let mut merged = base.clone();
    for dependency in dependencies {
        if !dependency.is_propagate() || !dependency.is_available() {
            continue;
        }
        let Some(value) = dependency.current_value() else {
            continue;
        };
        for (key, v) in value.properties() {
            if !is_private_key(key) {
                merged.insert(key.clone(), v.clone());
            }
        }
    }
    merged
}
