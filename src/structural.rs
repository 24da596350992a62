//! Structural tree transforms: web tag escaping and component-name
//! compression.
//!
//! Both passes mutate the tree in place, are idempotent, and are independent
//! of each other. Escaping runs for the web target only; compression runs
//! for production builds of non-passthrough targets. Neither pass touches
//! shared state: the registration-map side of escaping uses the same pure
//! naming rule instead of a shared reference.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use crate::node::Node;
use crate::platform::{is_builtin_tag, is_html_tag};
use crate::visitor::{walk_elements, walk_elements_mut};

/// Prefix applied to custom component names that collide with reserved web
/// or built-in tag names.
pub const WEB_ESCAPE_PREFIX: &str = "strata-com-";

// ═══════════════════════════════════════════════════════════════════════════════
// TAG ESCAPING (web target)
// ═══════════════════════════════════════════════════════════════════════════════

/// The naming rule shared by the tree pass and the component-registration
/// map. Returns the escaped name when `name` collides with a reserved HTML
/// element or a built-in component, `None` otherwise. Escaped names never
/// collide again, which is what makes the pass idempotent.
pub fn escaped_component_name(name: &str) -> Option<String> {
    if is_html_tag(name) || is_builtin_tag(name) {
        Some(format!("{}{}", WEB_ESCAPE_PREFIX, name))
    } else {
        None
    }
}

/// Applies [`escaped_component_name`] to a registration map's keys; entries
/// without a collision pass through unchanged.
pub fn escape_using_components(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| escaped_component_name(n).unwrap_or_else(|| n.clone()))
        .collect()
}

/// Rewrites colliding tags in the tree to their escaped form. The rewrite
/// only fires when the escaped name is actually registered, so templates
/// using the genuine native tag keep it.
pub fn escape_web_tags(root: &mut Node, using_components: &[String]) {
    walk_elements_mut(root, &mut |el| {
        if let Some(escaped) = escaped_component_name(&el.tag) {
            if using_components.iter().any(|c| *c == escaped) {
                el.tag = escaped;
                el.is_component = true;
                el.is_native = false;
            }
        }
    });
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT-NAME COMPRESSION (production, non-web)
// ═══════════════════════════════════════════════════════════════════════════════

/// Deterministic short alias for a custom tag. Pure function of
/// `(tag, seed, excludes)`: the digest prefix comes from hashing both seed
/// and tag, and a numeric suffix walks past anything in the exclusion set.
pub fn generate_component_alias(tag: &str, seed: &str, excludes: &HashSet<String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(tag.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let base = format!("c{}", &digest[..5]);
    if !excludes.contains(&base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{}{}", base, n);
        if !excludes.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Replaces every registered custom tag with a compressed alias, guaranteed
/// distinct from all native tags observed in the same tree and from aliases
/// assigned earlier in the pass. Returns the original → alias mapping so the
/// registration map can be rewritten with the identical rule.
pub fn compress_component_names(
    root: &mut Node,
    resource_path: &str,
    using_components: &[String],
) -> BTreeMap<String, String> {
    let seed = format!("{}componentName", resource_path);

    let mut excludes: HashSet<String> = HashSet::new();
    walk_elements(root, &mut |el| {
        if !using_components.iter().any(|c| *c == el.tag) {
            excludes.insert(el.tag.clone());
        }
    });

    let mut assigned: BTreeMap<String, String> = BTreeMap::new();
    walk_elements_mut(root, &mut |el| {
        if !using_components.iter().any(|c| *c == el.tag) {
            return;
        }
        if !assigned.contains_key(&el.tag) {
            let alias = generate_component_alias(&el.tag, &seed, &excludes);
            excludes.insert(alias.clone());
            assigned.insert(el.tag.clone(), alias);
        }
        if let Some(alias) = assigned.get(&el.tag) {
            el.tag = alias.clone();
        }
    });
    assigned
}
