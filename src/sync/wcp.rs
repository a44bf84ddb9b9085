//! Work Context Protocol tracker on disk
//!
//! ```text
//! <root>/<namespace>/<ITEM>.md          work item (YAML frontmatter + body)
//! <root>/<namespace>/<ITEM>/<file>.md   artifact attached to ITEM
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::{DirEntry, WalkDir};

use super::{Connector, ExternalRecord, LinkDirection, RecordLink, SourceEntry};
use crate::core::frontmatter::Frontmatter;
use crate::core::model::{MetaValue, Metadata};
use crate::core::schema::{NodeType, Relation};
use crate::error::{Result, SkeinError};

pub const CONNECTOR_NAME: &str = "wcp";

/// Separates a work item's description from its activity log
const ACTIVITY_SEPARATOR: &str = "---\n\n## Activity";

/// Metadata key holding the file a record was read from
pub const SOURCE_URI_KEY: &str = "source_uri";

/// Frontmatter keys mapped to node fields rather than metadata
const RESERVED_KEYS: &[&str] = &["id", "title", "parent"];

pub struct WcpConnector {
    root: PathBuf,
}

impl WcpConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn external_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        match parts.len() {
            // ns/ITEM.md -> ns/ITEM
            2 => {
                let stem = Path::new(&parts[1]).file_stem()?.to_string_lossy().into_owned();
                parts[1] = stem;
                Some(parts.join("/"))
            }
            // ns/ITEM/file.md
            3 => Some(parts.join("/")),
            _ => None,
        }
    }
}

impl Connector for WcpConnector {
    fn name(&self) -> &str {
        CONNECTOR_NAME
    }

    fn list(&self) -> Result<Vec<SourceEntry>> {
        if !self.root.is_dir() {
            return Err(SkeinError::not_found(format!(
                "WCP data path {}",
                self.root.display()
            )));
        }

        let mut entries = Vec::new();
        // min_depth would bypass filter_entry for namespaces, so depth is checked below
        let walker = WalkDir::new(&self.root)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(|e| SkeinError::Io(e.into()))?;
            if entry.depth() < 2 || !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }
            let external_id = match self.external_id(entry.path()) {
                Some(id) => id,
                None => continue,
            };
            let modified: DateTime<Utc> = entry
                .metadata()
                .map_err(|e| SkeinError::Io(e.into()))?
                .modified()?
                .into();

            entries.push(SourceEntry {
                external_id,
                modified,
                locator: entry.path().to_string_lossy().into_owned(),
            });
        }

        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(entries)
    }

    fn load(&self, entry: &SourceEntry) -> Result<ExternalRecord> {
        let content = fs::read_to_string(&entry.locator)?;
        let parts: Vec<&str> = entry.external_id.split('/').collect();

        let mut record = match parts.as_slice() {
            [namespace, item] => parse_work_item(&entry.external_id, namespace, item, &content)?,
            [namespace, item, file] => {
                parse_artifact(&entry.external_id, namespace, item, file, &content)
            }
            _ => {
                return Err(SkeinError::validation(format!(
                    "unexpected WCP path '{}'",
                    entry.external_id
                )))
            }
        };
        record.metadata.insert(
            SOURCE_URI_KEY.to_string(),
            MetaValue::Text(entry.locator.clone()),
        );
        Ok(record)
    }
}

fn parse_work_item(
    external_id: &str,
    namespace: &str,
    item: &str,
    content: &str,
) -> Result<ExternalRecord> {
    let (fm, rest) = Frontmatter::split(content)?;
    let fm = fm.unwrap_or_default();
    let (description, activity) = split_activity(rest);

    let item_id = fm.get_str("id").unwrap_or_else(|| item.to_string());
    let title = fm.get_str("title").unwrap_or_else(|| item.to_string());
    let body = if activity.is_empty() {
        description.to_string()
    } else {
        format!("{}\n\n## Activity\n\n{}", description, activity)
    };

    let links = fm
        .get_str("parent")
        .map(|parent| RecordLink {
            target: format!("{}/{}", namespace, parent),
            relation: Relation::DependsOn,
            direction: LinkDirection::Outgoing,
        })
        .into_iter()
        .collect();

    Ok(ExternalRecord {
        external_id: external_id.to_string(),
        node_type: NodeType::WorkItem,
        title: format!("[{}] {}", item_id, title),
        body,
        project: Some(namespace.to_string()),
        metadata: fm.scalar_metadata(RESERVED_KEYS),
        links,
    })
}

fn parse_artifact(
    external_id: &str,
    namespace: &str,
    item: &str,
    file: &str,
    content: &str,
) -> ExternalRecord {
    let title = content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_from_stem(file));

    ExternalRecord {
        external_id: external_id.to_string(),
        node_type: NodeType::Document,
        title,
        body: content.to_string(),
        project: Some(namespace.to_string()),
        metadata: Metadata::new(),
        links: vec![RecordLink {
            target: format!("{}/{}", namespace, item),
            relation: Relation::RelatesTo,
            direction: LinkDirection::Incoming,
        }],
    }
}

/// `(description, activity)`, both trimmed
fn split_activity(content: &str) -> (&str, &str) {
    match content.find(ACTIVITY_SEPARATOR) {
        Some(idx) => (
            content[..idx].trim(),
            content[idx + ACTIVITY_SEPARATOR.len()..].trim(),
        ),
        None => (content.trim(), ""),
    }
}

/// `api-design-notes.md` -> `Api Design Notes`
fn title_from_stem(file: &str) -> String {
    let stem = file.strip_suffix(".md").unwrap_or(file);
    stem.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "md")
}
