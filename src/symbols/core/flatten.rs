//! Symbol tree flattening: type tree → ordered list of readable leaf symbols.
//!
//! Rules:
//! - depth-first, left-to-right; the output order is the batch-read order and the display order
//! - `Reference` nodes and excluded types are dropped together with their whole subtree
//! - an `Array`/`Struct` without children is a broken type description, not an empty collection
//! - any error aborts the walk (no partial list)

use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{LeafSymbol, SymbolCategory, SymbolNode};

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Vendor motion-control library; its function blocks expose no plain process data.
pub const DEFAULT_EXCLUDED_TYPE_PREFIX: &str = "TC2_MC2.";

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_excluded_type_prefixes() -> Vec<String> {
    vec![DEFAULT_EXCLUDED_TYPE_PREFIX.to_string()]
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlattenOptions {
    /// Visit at most this many elements of each array; `None` = all elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_element_limit: Option<usize>,
    #[serde(default = "default_excluded_type_prefixes")]
    pub excluded_type_prefixes: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Log every visited node at `debug` level.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            array_element_limit: None,
            excluded_type_prefixes: default_excluded_type_prefixes(),
            max_depth: DEFAULT_MAX_DEPTH,
            verbose: false,
        }
    }
}

impl FlattenOptions {
    fn is_excluded_type(&self, type_name: &str) -> bool {
        self.excluded_type_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && type_name.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidSymbolError {
    #[error("{category:?} symbol {instance_path} has no children")]
    EmptyAggregate {
        instance_path: String,
        category: SymbolCategory,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraversalError {
    #[error("cycle detected: {instance_path} is its own ancestor")]
    Cycle { instance_path: String },

    #[error("symbol {instance_path} exceeds max depth {max_depth}")]
    DepthExceeded {
        instance_path: String,
        max_depth: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlattenError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] InvalidSymbolError),

    #[error("traversal failed: {0}")]
    Traversal(#[from] TraversalError),
}

pub fn flatten(
    roots: &[SymbolNode],
    options: &FlattenOptions,
) -> Result<Vec<LeafSymbol>, FlattenError> {
    flatten_with(roots, options, |_| false)
}

/// Same as [`flatten`], with an extra caller predicate; nodes for which it
/// returns `true` are skipped together with their descendants.
pub fn flatten_with<F>(
    roots: &[SymbolNode],
    options: &FlattenOptions,
    exclude: F,
) -> Result<Vec<LeafSymbol>, FlattenError>
where
    F: Fn(&SymbolNode) -> bool,
{
    let mut walker = Walker {
        options,
        exclude: &exclude,
        ancestors: HashSet::new(),
        leaves: Vec::new(),
    };

    for root in roots {
        walker.visit(root, 0)?;
    }

    if options.verbose {
        debug!(
            "flatten: roots={} leaves={}",
            roots.len(),
            walker.leaves.len()
        );
    }

    Ok(walker.leaves)
}

struct Walker<'a, F> {
    options: &'a FlattenOptions,
    exclude: &'a F,
    /// instancePaths on the current root→node path
    ancestors: HashSet<&'a str>,
    leaves: Vec<LeafSymbol>,
}

impl<'a, F> Walker<'a, F>
where
    F: Fn(&SymbolNode) -> bool,
{
    fn visit(&mut self, node: &'a SymbolNode, depth: usize) -> Result<(), FlattenError> {
        if depth > self.options.max_depth {
            return Err(TraversalError::DepthExceeded {
                instance_path: node.instance_path.clone(),
                max_depth: self.options.max_depth,
            }
            .into());
        }

        if node.category == SymbolCategory::Reference {
            self.trace(node, "skip reference");
            return Ok(());
        }

        if (self.exclude)(node) {
            self.trace(node, "skip excluded");
            return Ok(());
        }

        let Some(type_name) = node.type_name.as_deref() else {
            if node.category != SymbolCategory::Struct {
                self.trace(node, "skip unresolved type");
                return Ok(());
            }
            return self.visit_children(node, depth);
        };

        if self.options.is_excluded_type(type_name) {
            self.trace(node, "skip excluded type");
            return Ok(());
        }

        match node.category {
            SymbolCategory::Scalar => {
                self.trace(node, "leaf");
                self.leaves.push(LeafSymbol::from_node(node));
                Ok(())
            }
            SymbolCategory::Array | SymbolCategory::Struct => self.visit_children(node, depth),
            SymbolCategory::Reference => Ok(()),
        }
    }

    fn visit_children(&mut self, node: &'a SymbolNode, depth: usize) -> Result<(), FlattenError> {
        if node.children.is_empty() {
            return Err(InvalidSymbolError::EmptyAggregate {
                instance_path: node.instance_path.clone(),
                category: node.category,
            }
            .into());
        }

        if !self.ancestors.insert(node.instance_path.as_str()) {
            return Err(TraversalError::Cycle {
                instance_path: node.instance_path.clone(),
            }
            .into());
        }
        self.trace(node, "enter");

        let limit = match node.category {
            SymbolCategory::Array => self.options.array_element_limit.unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        for child in node.children.iter().take(limit) {
            if self.ancestors.contains(child.instance_path.as_str()) {
                return Err(TraversalError::Cycle {
                    instance_path: child.instance_path.clone(),
                }
                .into());
            }
            self.visit(child, depth + 1)?;
        }

        self.ancestors.remove(node.instance_path.as_str());
        Ok(())
    }

    fn trace(&self, node: &SymbolNode, action: &str) {
        if !self.options.verbose {
            return;
        }

        debug!(
            "{action}: {} : {} (IG: 0x{:x} IO: 0x{:x} size: {})",
            node.instance_path,
            node.type_name_or_empty(),
            node.address_group,
            node.address_offset,
            node.size
        );
    }
}

/// Case-insensitive substring filter on `path`; keeps the input order.
pub fn filter_by_path<'a>(symbols: &'a [LeafSymbol], needle: &str) -> Vec<&'a LeafSymbol> {
    let needle = needle.to_lowercase();
    symbols
        .iter()
        .filter(|s| needle.is_empty() || s.path.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(path: &str, type_name: &str, offset: u64) -> SymbolNode {
        SymbolNode::scalar(path, type_name, 2, 0x4020, offset)
    }

    fn array(path: &str, len: usize) -> SymbolNode {
        let elements = (0..len)
            .map(|i| scalar(&format!("{path}[{i}]"), "INT", (i * 2) as u64))
            .collect();
        SymbolNode::aggregate(path, "ARRAY OF INT", SymbolCategory::Array, elements)
    }

    fn reference(path: &str) -> SymbolNode {
        SymbolNode {
            instance_path: path.to_string(),
            type_name: Some("REFERENCE TO INT".to_string()),
            category: SymbolCategory::Reference,
            size: 8,
            is_static: false,
            children: Vec::new(),
            address_group: 0,
            address_offset: 0,
        }
    }

    fn sample_tree() -> Vec<SymbolNode> {
        vec![
            scalar("MAIN.bStart", "BOOL", 0),
            SymbolNode::aggregate(
                "MAIN.stMotor",
                "ST_Motor",
                SymbolCategory::Struct,
                vec![
                    scalar("MAIN.stMotor.nSpeed", "INT", 10),
                    array("MAIN.stMotor.aTemps", 3),
                    reference("MAIN.stMotor.refAxis"),
                    scalar("MAIN.stMotor.tRamp", "TIME", 20),
                ],
            ),
            SymbolNode::aggregate(
                "MAIN.fbPower",
                "TC2_MC2.MC_Power",
                SymbolCategory::Struct,
                vec![scalar("MAIN.fbPower.Status", "BOOL", 30)],
            ),
            scalar("GVL.sName", "STRING(80)", 40),
        ]
    }

    fn paths(leaves: &[LeafSymbol]) -> Vec<&str> {
        leaves.iter().map(|l| l.path.as_str()).collect()
    }

    #[test]
    fn flatten_keeps_depth_first_order_and_drops_references_and_excluded_types() {
        let leaves = flatten(&sample_tree(), &FlattenOptions::default()).unwrap();

        assert_eq!(
            paths(&leaves),
            vec![
                "MAIN.bStart",
                "MAIN.stMotor.nSpeed",
                "MAIN.stMotor.aTemps[0]",
                "MAIN.stMotor.aTemps[1]",
                "MAIN.stMotor.aTemps[2]",
                "MAIN.stMotor.tRamp",
                "GVL.sName",
            ]
        );
        assert!(leaves.iter().all(|l| !l.path.contains("refAxis")));
        assert!(leaves.iter().all(|l| !l.path.starts_with("MAIN.fbPower")));
        assert_eq!(leaves[6].type_tag, "STRING(80)");
    }

    #[test]
    fn flatten_is_idempotent_on_unchanged_tree() {
        let tree = sample_tree();
        let first = flatten(&tree, &FlattenOptions::default()).unwrap();
        let second = flatten(&tree, &FlattenOptions::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn flatten_fails_on_struct_without_members() {
        let tree = vec![
            scalar("MAIN.a", "INT", 0),
            SymbolNode::aggregate("MAIN.stEmpty", "ST_Empty", SymbolCategory::Struct, vec![]),
        ];

        let err = flatten(&tree, &FlattenOptions::default()).unwrap_err();
        assert_eq!(
            err,
            FlattenError::InvalidSymbol(InvalidSymbolError::EmptyAggregate {
                instance_path: "MAIN.stEmpty".to_string(),
                category: SymbolCategory::Struct,
            })
        );
    }

    #[test]
    fn flatten_fails_on_array_without_elements_even_when_nested() {
        let tree = vec![SymbolNode::aggregate(
            "MAIN.st",
            "ST_Outer",
            SymbolCategory::Struct,
            vec![array("MAIN.st.aNone", 0)],
        )];

        let err = flatten(&tree, &FlattenOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            FlattenError::InvalidSymbol(InvalidSymbolError::EmptyAggregate { ref instance_path, category: SymbolCategory::Array })
                if instance_path == "MAIN.st.aNone"
        ));
    }

    #[test]
    fn array_element_limit_is_configurable() {
        let tree = vec![array("MAIN.aBig", 50)];

        let all = flatten(&tree, &FlattenOptions::default()).unwrap();
        assert_eq!(all.len(), 50);

        let capped = flatten(
            &tree,
            &FlattenOptions {
                array_element_limit: Some(20),
                ..FlattenOptions::default()
            },
        )
        .unwrap();
        assert_eq!(capped.len(), 20);
        assert_eq!(capped[19].path, "MAIN.aBig[19]");
    }

    #[test]
    fn caller_predicate_excludes_whole_subtree() {
        let leaves = flatten_with(&sample_tree(), &FlattenOptions::default(), |node| {
            node.type_name_or_empty() == "ST_Motor"
        })
        .unwrap();

        assert_eq!(paths(&leaves), vec!["MAIN.bStart", "GVL.sName"]);
    }

    #[test]
    fn unresolved_scalar_is_skipped_but_unresolved_struct_is_walked() {
        let mut unresolved_scalar = scalar("MAIN.x", "INT", 0);
        unresolved_scalar.type_name = None;

        let mut unresolved_struct = SymbolNode::aggregate(
            "MAIN.st",
            "ST_Any",
            SymbolCategory::Struct,
            vec![scalar("MAIN.st.n", "INT", 2)],
        );
        unresolved_struct.type_name = None;

        let leaves = flatten(
            &[unresolved_scalar, unresolved_struct],
            &FlattenOptions::default(),
        )
        .unwrap();
        assert_eq!(paths(&leaves), vec!["MAIN.st.n"]);
    }

    #[test]
    fn caller_exclusion_applies_to_unresolved_struct() {
        let mut hidden = SymbolNode::aggregate(
            "MAIN.fbHidden",
            "FB_Hidden",
            SymbolCategory::Struct,
            vec![scalar("MAIN.fbHidden.n", "INT", 0)],
        );
        hidden.type_name = None;
        let visible = scalar("MAIN.nVisible", "INT", 2);

        let leaves = flatten_with(&[hidden, visible], &FlattenOptions::default(), |n| {
            n.instance_path == "MAIN.fbHidden"
        })
        .unwrap();
        assert_eq!(paths(&leaves), vec!["MAIN.nVisible"]);
    }

    #[test]
    fn repeated_instance_path_on_ancestor_chain_is_a_cycle() {
        let inner = SymbolNode::aggregate(
            "MAIN.st",
            "ST_Self",
            SymbolCategory::Struct,
            vec![scalar("MAIN.st.n", "INT", 0)],
        );
        let tree = vec![SymbolNode::aggregate(
            "MAIN.st",
            "ST_Self",
            SymbolCategory::Struct,
            vec![inner],
        )];

        let err = flatten(&tree, &FlattenOptions::default()).unwrap_err();
        assert_eq!(
            err,
            FlattenError::Traversal(TraversalError::Cycle {
                instance_path: "MAIN.st".to_string()
            })
        );
    }

    #[test]
    fn sibling_structs_with_distinct_paths_are_not_cycles() {
        let make = |path: &str| {
            SymbolNode::aggregate(
                path,
                "ST_Same",
                SymbolCategory::Struct,
                vec![scalar(&format!("{path}.n"), "INT", 0)],
            )
        };
        let leaves = flatten(&[make("MAIN.a"), make("MAIN.b")], &FlattenOptions::default()).unwrap();
        assert_eq!(paths(&leaves), vec!["MAIN.a.n", "MAIN.b.n"]);
    }

    #[test]
    fn depth_guard_rejects_too_deep_trees() {
        let mut node = scalar("L.leaf", "INT", 0);
        for level in 0..5 {
            node = SymbolNode::aggregate(
                format!("L{level}"),
                "ST_Level",
                SymbolCategory::Struct,
                vec![node],
            );
        }

        let err = flatten(
            &[node.clone()],
            &FlattenOptions {
                max_depth: 3,
                ..FlattenOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlattenError::Traversal(TraversalError::DepthExceeded { max_depth: 3, .. })
        ));

        let leaves = flatten(&[node], &FlattenOptions::default()).unwrap();
        assert_eq!(leaves.len(), 1);
    }

    #[test]
    fn verbose_flag_does_not_change_output() {
        let quiet = flatten(&sample_tree(), &FlattenOptions::default()).unwrap();
        let verbose = flatten(
            &sample_tree(),
            &FlattenOptions {
                verbose: true,
                ..FlattenOptions::default()
            },
        )
        .unwrap();
        assert_eq!(quiet, verbose);
    }

    #[test]
    fn filter_by_path_is_case_insensitive_and_ordered() {
        let leaves = flatten(&sample_tree(), &FlattenOptions::default()).unwrap();

        let hits = filter_by_path(&leaves, "atemps");
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].path, "MAIN.stMotor.aTemps[0]");

        assert_eq!(filter_by_path(&leaves, "").len(), leaves.len());
        assert!(filter_by_path(&leaves, "nothing-here").is_empty());
    }
}
