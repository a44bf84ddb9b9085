use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{timestamp_at, GraphStore};
use crate::core::model::{format_ts, SyncState};
use crate::error::Result;

impl GraphStore {
    pub fn sync_state(&self, connector_name: &str) -> Result<Option<SyncState>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT connector_name, cursor, last_run_at, last_success_count, last_failure_count
                FROM sync_state WHERE connector_name = ?1
                "#,
                params![connector_name],
                sync_state_from_row,
            )
            .optional()?)
    }

    pub fn sync_states(&self) -> Result<Vec<SyncState>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT connector_name, cursor, last_run_at, last_success_count, last_failure_count
            FROM sync_state ORDER BY connector_name
            "#,
        )?;
        let rows = stmt.query_map([], sync_state_from_row)?;

        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }

    pub fn save_sync_state(&mut self, state: &SyncState) -> Result<()> {
        save_sync_state_tx(&self.conn, state)
    }
}

fn save_sync_state_tx(conn: &Connection, state: &SyncState) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_state (connector_name, cursor, last_run_at, last_success_count, last_failure_count)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(connector_name) DO UPDATE SET
            cursor = excluded.cursor,
            last_run_at = excluded.last_run_at,
            last_success_count = excluded.last_success_count,
            last_failure_count = excluded.last_failure_count
        "#,
        params![
            state.connector_name,
            state.cursor,
            state.last_run_at.as_ref().map(format_ts),
            state.last_success_count as i64,
            state.last_failure_count as i64,
        ],
    )?;
    Ok(())
}

fn sync_state_from_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    let last_run_at = match row.get::<_, Option<String>>(2)? {
        Some(_) => Some(timestamp_at(row, 2)?),
        None => None,
    };
    Ok(SyncState {
        connector_name: row.get(0)?,
        cursor: row.get(1)?,
        last_run_at,
        last_success_count: row.get::<_, i64>(3)? as usize,
        last_failure_count: row.get::<_, i64>(4)? as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::now;
    use crate::testing::concept_store;

    #[test]
    fn test_sync_state_round_trip() -> Result<()> {
        let mut store = concept_store();
        assert!(store.sync_state("wcp")?.is_none());

        let mut state = SyncState {
            connector_name: "wcp".into(),
            cursor: "{}".into(),
            last_run_at: Some(now()),
            last_success_count: 3,
            last_failure_count: 1,
        };
        store.save_sync_state(&state)?;
        state.last_success_count = 5;
        store.save_sync_state(&state)?;

        assert_eq!(store.sync_state("wcp")?, Some(state));
        assert_eq!(store.sync_states()?.len(), 1);
        Ok(())
    }
}
