//! Integrity - Layer Tree Consistency Checking
//!
//! This module validates the structure of a composition and reports issues
//! (errors/warnings) found in it.
//!
//! # Features
//!
//! - **Issue**: Represents a detected problem (Error, Warning, Info).
//! - **check_integrity**: Main function to validate a `Composition`.
//! - **assert_integrity**: Panics on errors; run after structural edits in
//!   debug builds.

use crate::composition::Composition;
use crate::layer::{FilterSource, HolderRef, LayerId, LayerKind};
use std::collections::HashSet;

/// Represents an issue found within a composition
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    /// Severity level of the issue
    pub severity: IssueSeverity,
    /// Human-readable description
    pub message: String,
    /// Layer related to the issue (if any)
    pub layer: Option<LayerId>,
}

/// Severity level of a diagnostic issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Broken structure; the engine cannot work with this tree
    Error,
    /// Suspicious but usable
    Warning,
    /// Informational message
    Info,
}

impl Issue {
    fn error(message: String, layer: Option<LayerId>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message,
            layer,
        }
    }

    fn warning(message: String, layer: LayerId) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message,
            layer: Some(layer),
        }
    }

    fn info(message: String, layer: LayerId) -> Self {
        Self {
            severity: IssueSeverity::Info,
            message,
            layer: Some(layer),
        }
    }
}

/// Check a composition for structural integrity
///
/// This performs multiple checks:
/// 1. Holder membership (dead handles, back-references, duplicates, orphans)
/// 2. Placement rules (smart filters only in smart objects, pass-through only on groups)
/// 3. Smart filter chain links
/// 4. Layer configuration (mask footprint, invisible opacity, empty groups)
pub fn check_integrity(comp: &Composition) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    // 1. Walk every holder from the root
    let mut stack = vec![HolderRef::Root];
    while let Some(holder) = stack.pop() {
        let Ok(children) = comp.children(holder) else {
            issues.push(Issue::error(format!("Holder {} has no child list", holder), None));
            continue;
        };
        for &child in children {
            let Ok(layer) = comp.layer(child) else {
                issues.push(Issue::error(
                    format!("{} lists dead layer handle {}", holder, child),
                    None,
                ));
                continue;
            };
            if !seen.insert(child) {
                issues.push(Issue::error(
                    format!("Layer '{}' is listed more than once", layer.name()),
                    Some(child),
                ));
                continue;
            }
            if layer.holder() != holder {
                issues.push(Issue::error(
                    format!(
                        "Layer '{}' is listed in {} but points back to {}",
                        layer.name(),
                        holder,
                        layer.holder()
                    ),
                    Some(child),
                ));
            }
            if layer.kind().as_holder().is_some() {
                stack.push(HolderRef::Layer(child));
            }
        }
    }
    for (id, layer) in comp.store.iter() {
        if !seen.contains(&id) {
            issues.push(Issue::error(
                format!("Layer '{}' is not reachable from the root", layer.name()),
                Some(id),
            ));
        }
    }

    // 2. Placement rules
    for (id, layer) in comp.store.iter() {
        let in_smart_object = match layer.holder() {
            HolderRef::Layer(holder) => matches!(
                comp.layer(holder).map(|h| h.kind()),
                Ok(LayerKind::SmartObject(_))
            ),
            HolderRef::Root => false,
        };
        let is_filter = matches!(layer.kind(), LayerKind::SmartFilter(_));
        if is_filter != in_smart_object {
            issues.push(Issue::error(
                format!(
                    "A {} layer ('{}') cannot live in {}",
                    layer.kind().name(),
                    layer.name(),
                    layer.holder()
                ),
                Some(id),
            ));
        }
        if layer.blend_mode().is_pass_through() && !matches!(layer.kind(), LayerKind::Group(_)) {
            issues.push(Issue::error(
                format!("Layer '{}' uses pass-through but is not a group", layer.name()),
                Some(id),
            ));
        }
    }

    // 3. Chain links
    for (so_id, layer) in comp.store.iter() {
        let LayerKind::SmartObject(so) = layer.kind() else {
            continue;
        };
        let filters = so.filters();
        for (index, &id) in filters.iter().enumerate() {
            let Ok(LayerKind::SmartFilter(node)) = comp.layer(id).map(|l| l.kind()) else {
                continue;
            };
            let expected_source = match index {
                0 => FilterSource::Base,
                _ => FilterSource::Filter(filters[index - 1]),
            };
            if node.source() != expected_source {
                issues.push(Issue::error(
                    format!(
                        "Smart filter #{} of '{}' has source {:?}, expected {:?}",
                        index,
                        layer.name(),
                        node.source(),
                        expected_source
                    ),
                    Some(id),
                ));
            }
            let expected_next = filters.get(index + 1).copied();
            if node.next() != expected_next {
                issues.push(Issue::error(
                    format!(
                        "Smart filter #{} of '{}' has next {:?}, expected {:?}",
                        index,
                        layer.name(),
                        node.next(),
                        expected_next
                    ),
                    Some(id),
                ));
            }
        }

        for issue in check_integrity(so.content()) {
            if issue.severity == IssueSeverity::Error {
                issues.push(Issue::error(
                    format!("In content of '{}': {}", layer.name(), issue.message),
                    Some(so_id),
                ));
            }
        }
    }

    // 4. Layer configuration
    for (id, layer) in comp.store.iter() {
        if let (Some(mask), Ok(footprint)) = (layer.mask(), comp.mask_size(id)) {
            if mask.pixels().dimensions() != footprint {
                issues.push(Issue::warning(
                    format!(
                        "Mask of '{}' is {:?}, its footprint is {:?}",
                        layer.name(),
                        mask.pixels().dimensions(),
                        footprint
                    ),
                    id,
                ));
            }
        }
        if layer.is_visible() && layer.opacity() == 0.0 {
            issues.push(Issue::info(
                format!("Layer '{}' is visible but fully transparent", layer.name()),
                id,
            ));
        }
        if let LayerKind::Group(group) = layer.kind() {
            if group.children.is_empty() {
                issues.push(Issue::info(format!("Group '{}' is empty", layer.name()), id));
            }
        }
    }
    for pending in comp.pending_links() {
        issues.push(Issue::warning(
            format!("Linked file {} is missing", pending.path.display()),
            pending.layer,
        ));
    }

    issues
}

/// Panic if the composition has structural errors
pub fn assert_integrity(comp: &Composition) {
    let errors: Vec<String> = check_integrity(comp)
        .into_iter()
        .filter(|issue| issue.severity == IssueSeverity::Error)
        .map(|issue| issue.message)
        .collect();
    assert!(
        errors.is_empty(),
        "Layer tree of '{}' is inconsistent:\n{}",
        comp.name(),
        errors.join("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Invert;
    use crate::layer::Layer;
    use crate::mask::{Mask, MaskInit};
    use image::Rgba;

    fn fill(name: &str) -> Layer {
        Layer::fill(name, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_valid_tree_has_no_errors() {
        let mut comp = Composition::new("doc", 2, 2);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        comp.add_layer(HolderRef::Layer(group), fill("a")).unwrap();
        let so = comp
            .add_layer(HolderRef::Root, Layer::smart_object("so", Composition::new("c", 2, 2)))
            .unwrap();
        comp.add_smart_filter(so, "inv", Box::new(Invert)).unwrap();
        comp.add_smart_filter(so, "inv 2", Box::new(Invert)).unwrap();

        let issues = check_integrity(&comp);
        assert!(issues.iter().all(|i| i.severity != IssueSeverity::Error));
    }

    #[test]
    fn test_detects_broken_back_reference() {
        let mut comp = Composition::new("doc", 2, 2);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        let a = comp.add_layer(HolderRef::Root, fill("a")).unwrap();
        comp.layer_mut(a).unwrap().props.holder = HolderRef::Layer(group);

        let issues = check_integrity(&comp);
        assert!(issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error && i.layer == Some(a)));
    }

    #[test]
    fn test_detects_broken_chain_link() {
        let mut comp = Composition::new("doc", 2, 2);
        let so = comp
            .add_layer(HolderRef::Root, Layer::smart_object("so", Composition::new("c", 2, 2)))
            .unwrap();
        let a = comp.add_smart_filter(so, "a", Box::new(Invert)).unwrap();
        comp.add_smart_filter(so, "b", Box::new(Invert)).unwrap();
        if let LayerKind::SmartFilter(sf) = &mut comp.layer_mut(a).unwrap().kind {
            sf.next = None;
        }
        let issues = check_integrity(&comp);
        assert!(issues.iter().any(|i| i.message.contains("has next")));
    }

    #[test]
    fn test_warnings_and_info() {
        let mut comp = Composition::new("doc", 2, 2);
        comp.add_layer(HolderRef::Root, Layer::group("empty")).unwrap();
        comp.add_layer(
            HolderRef::Root,
            fill("odd mask").with_mask(Mask::new(5, 5, MaskInit::RevealAll)),
        )
        .unwrap();
        comp.add_layer(HolderRef::Root, fill("clear").with_opacity(0.0))
            .unwrap();

        let issues = check_integrity(&comp);
        let count = |severity| issues.iter().filter(|i| i.severity == severity).count();
        assert_eq!(count(IssueSeverity::Error), 0);
        assert_eq!(count(IssueSeverity::Warning), 1);
        assert_eq!(count(IssueSeverity::Info), 2);
    }

    #[test]
    #[should_panic(expected = "inconsistent")]
    fn test_assert_integrity_panics() {
        let mut comp = Composition::new("doc", 2, 2);
        let a = comp.add_layer(HolderRef::Root, fill("a")).unwrap();
        comp.root.push(a);
        assert_integrity(&comp);
    }
}
