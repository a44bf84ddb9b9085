//! BM25 lookups over the FTS5 index

use tracing::debug;

use super::{GraphStore, NodeFilter};
use crate::error::Result;

/// Query terms beyond this are ignored
const MAX_QUERY_TERMS: usize = 32;

/// Relative weight of title vs body hits in bm25()
const TITLE_WEIGHT: f64 = 2.0;
const BODY_WEIGHT: f64 = 1.0;

/// Build an FTS5 MATCH expression from free text.
///
/// Each alphanumeric run becomes a quoted term and terms are OR-ed, so user
/// punctuation never reaches the FTS5 query parser. `None` when the text has
/// no searchable terms.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

impl GraphStore {
    /// `(node_id, score)` for nodes matching `query`, best first.
    ///
    /// Scores are negated bm25() values, so higher is better.
    pub fn lexical_matches(&self, query: &str, filter: &NodeFilter) -> Result<Vec<(String, f64)>> {
        let expr = match fts_query(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let mut values = vec![expr];
        let clause = filter.sql(&mut values);
        let sql = format!(
            r#"
            SELECT n.id, bm25(nodes_fts, {}, {}) AS rank
            FROM nodes_fts
            JOIN nodes n ON n.seq = nodes_fts.rowid
            WHERE nodes_fts MATCH ?{}
            ORDER BY rank ASC, n.id ASC
            "#,
            TITLE_WEIGHT, BODY_WEIGHT, clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, rank) = row?;
            matches.push((id, -rank));
        }
        debug!(query, hits = matches.len(), "lexical search");
        Ok(matches)
    }

    /// Rebuild the text index from the nodes table
    pub fn rebuild_text_index(&self) -> Result<()> {
        self.conn
            .execute_batch("INSERT INTO nodes_fts(nodes_fts) VALUES('rebuild');")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{NewNode, NodePatch};
    use crate::core::schema::NodeType;
    use crate::testing::concept_store;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("Why did we pick storage?").as_deref(),
            Some("\"why\" OR \"did\" OR \"we\" OR \"pick\" OR \"storage\"")
        );
        assert_eq!(fts_query("NOT \"x\" AND (y)").as_deref(), Some("\"not\" OR \"x\" OR \"and\" OR \"y\""));
        assert_eq!(fts_query("rust rust RUST").as_deref(), Some("\"rust\""));
        assert_eq!(fts_query("  ?! "), None);
    }

    #[test]
    fn test_lexical_matches_rank_and_filter() -> Result<()> {
        let mut store = concept_store();
        let storage = store.add_node(
            NewNode::new(NodeType::Decision, "Storage engine", "we picked storage on disk")
                .project("p1"),
        )?;
        store.add_node(NewNode::new(NodeType::Note, "Lunch", "pasta").project("p1"))?;
        let other = store.add_node(
            NewNode::new(NodeType::Note, "Aside", "storage mentioned once").project("p2"),
        )?;

        let all = store.lexical_matches("storage", &NodeFilter::default())?;
        let ids: Vec<&str> = all.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec![storage.id.as_str(), other.id.as_str()]);
        assert!(all[0].1 > all[1].1);

        let filtered = store.lexical_matches(
            "storage",
            &NodeFilter {
                node_type: None,
                project: Some("p2".into()),
            },
        )?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, other.id);
        Ok(())
    }

    #[test]
    fn test_text_index_follows_updates_and_deletes() -> Result<()> {
        let mut store = concept_store();
        let node = store.add_node(NewNode::new(NodeType::Note, "draft", "alpha"))?;

        store.update_node(
            &node.id,
            NodePatch {
                body: Some("beta".into()),
                ..Default::default()
            },
        )?;
        assert!(store.lexical_matches("alpha", &NodeFilter::default())?.is_empty());
        assert_eq!(store.lexical_matches("beta", &NodeFilter::default())?.len(), 1);

        store.delete_node(&node.id)?;
        assert!(store.lexical_matches("beta", &NodeFilter::default())?.is_empty());

        store.rebuild_text_index()?;
        assert!(store.lexical_matches("draft", &NodeFilter::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_text_index_survives_vacuum() -> Result<()> {
        let mut store = concept_store();
        let first = store.add_node(NewNode::new(NodeType::Note, "first", "alpha"))?;
        let second = store.add_node(NewNode::new(NodeType::Note, "second", "beta"))?;
        store.delete_node(&first.id)?;

        store.conn.execute_batch("VACUUM;")?;

        let hits = store.lexical_matches("beta", &NodeFilter::default())?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, second.id);
        assert!(store.lexical_matches("alpha", &NodeFilter::default())?.is_empty());
        Ok(())
    }
}
