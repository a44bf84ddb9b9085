use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SkeinError;

pub const VALID_NODE_TYPES: &[&str] = &[
    "decision",
    "pattern",
    "discovery",
    "work_item",
    "document",
    "commit",
    "note",
];

pub const VALID_RELATIONS: &[&str] = &[
    "depends_on",
    "informed_by",
    "supersedes",
    "relates_to",
    "implements",
    "extracted_from",
];

/// Kind of knowledge a node holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Decision,
    Pattern,
    Discovery,
    WorkItem,
    Document,
    Commit,
    Note,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        Self::Decision,
        Self::Pattern,
        Self::Discovery,
        Self::WorkItem,
        Self::Document,
        Self::Commit,
        Self::Note,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Discovery => "discovery",
            Self::WorkItem => "work_item",
            Self::Document => "document",
            Self::Commit => "commit",
            Self::Note => "note",
        }
    }
}

impl FromStr for NodeType {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                SkeinError::validation(format!(
                    "Invalid node type '{}' (must be: {})",
                    s,
                    VALID_NODE_TYPES.join("|")
                ))
            })
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed relationship between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    DependsOn,
    InformedBy,
    Supersedes,
    RelatesTo,
    Implements,
    ExtractedFrom,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Self::DependsOn,
        Self::InformedBy,
        Self::Supersedes,
        Self::RelatesTo,
        Self::Implements,
        Self::ExtractedFrom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DependsOn => "depends_on",
            Self::InformedBy => "informed_by",
            Self::Supersedes => "supersedes",
            Self::RelatesTo => "relates_to",
            Self::Implements => "implements",
            Self::ExtractedFrom => "extracted_from",
        }
    }
}

impl FromStr for Relation {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| {
                SkeinError::validation(format!(
                    "Invalid relation '{}' (must be: {})",
                    s,
                    VALID_RELATIONS.join("|")
                ))
            })
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parse() {
        assert_eq!("work_item".parse::<NodeType>().unwrap(), NodeType::WorkItem);
        for name in VALID_NODE_TYPES {
            assert_eq!(name.parse::<NodeType>().unwrap().as_str(), *name);
        }
        let err = "idea".parse::<NodeType>().unwrap_err();
        assert!(matches!(err, SkeinError::Validation(_)));
    }

    #[test]
    fn test_relation_parse() {
        for name in VALID_RELATIONS {
            assert_eq!(name.parse::<Relation>().unwrap().as_str(), *name);
        }
        assert!("blocks".parse::<Relation>().is_err());
    }

    #[test]
    fn test_serde_names_match() {
        let json = serde_json::to_string(&NodeType::WorkItem).unwrap();
        assert_eq!(json, "\"work_item\"");
        let rel: Relation = serde_json::from_str("\"extracted_from\"").unwrap();
        assert_eq!(rel, Relation::ExtractedFrom);
    }
}
