//! Symbol model: controller type tree (input) and flat leaf symbols (output).
//!
//! Constraints:
//! - `SymbolNode` is owned by the type loader; the core only reads it
//! - `LeafSymbol` is rebuilt on every walk and carries no identity across walks
//! - JSON uses camelCase field names, same as the rest of the persisted DTOs

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SymbolCategory {
    Scalar,
    Array,
    Struct,
    /// `REFERENCE TO ...` (function block in/out parameters); never readable by address.
    Reference,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolNode {
    pub instance_path: String,
    /// `None` when the loader could not resolve the data type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub category: SymbolCategory,
    pub size: u32,
    #[serde(default)]
    pub is_static: bool,
    /// Array elements or struct members; empty for scalars and references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SymbolNode>,
    pub address_group: u64,
    pub address_offset: u64,
}

impl SymbolNode {
    pub fn scalar(
        instance_path: impl Into<String>,
        type_name: impl Into<String>,
        size: u32,
        address_group: u64,
        address_offset: u64,
    ) -> Self {
        Self {
            instance_path: instance_path.into(),
            type_name: Some(type_name.into()),
            category: SymbolCategory::Scalar,
            size,
            is_static: false,
            children: Vec::new(),
            address_group,
            address_offset,
        }
    }

    pub fn aggregate(
        instance_path: impl Into<String>,
        type_name: impl Into<String>,
        category: SymbolCategory,
        children: Vec<SymbolNode>,
    ) -> Self {
        let size = children.iter().map(|c| c.size).sum();
        let (address_group, address_offset) = children
            .first()
            .map(|c| (c.address_group, c.address_offset))
            .unwrap_or((0, 0));

        Self {
            instance_path: instance_path.into(),
            type_name: Some(type_name.into()),
            category,
            size,
            is_static: false,
            children,
            address_group,
            address_offset,
        }
    }

    pub fn type_name_or_empty(&self) -> &str {
        self.type_name.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeafSymbol {
    pub path: String,
    pub type_tag: String,
    pub size: u32,
    pub address_group: u64,
    pub address_offset: u64,
    pub is_static: bool,
}

impl LeafSymbol {
    pub fn from_node(node: &SymbolNode) -> Self {
        Self {
            path: node.instance_path.clone(),
            type_tag: node.type_name_or_empty().to_string(),
            size: node.size,
            address_group: node.address_group,
            address_offset: node.address_offset,
            is_static: node.is_static,
        }
    }

    pub fn read_request(&self, expected_size: usize) -> ReadRequest {
        ReadRequest {
            address_group: self.address_group,
            address_offset: self.address_offset,
            expected_size,
        }
    }
}

/// `(addressGroup, addressOffset, expectedSize)` triple consumed by the driver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub address_group: u64,
    pub address_offset: u64,
    pub expected_size: usize,
}
