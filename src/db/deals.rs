use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{DbError, DealDb};
use crate::types::Deal;

/// Timestamps are stored as second-precision RFC 3339 UTC text.
fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn from_db_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn deal_from_row(row: &Row<'_>) -> rusqlite::Result<Deal> {
    Ok(Deal {
        record_id: row.get(0)?,
        deal_name: row.get(1)?,
        deal_owner: row.get(2)?,
        second_owner: row.get(3)?,
        last_activity_date: from_db_timestamp(row.get(4)?),
        deal_stage: row.get(5)?,
    })
}

impl DealDb {
    // =========================================================================
    // Deals
    // =========================================================================

    /// Replace the entire deals collection in one transaction.
    ///
    /// If any insert fails the previous collection is left untouched.
    /// Returns the number of deals stored.
    pub fn replace_all_deals(&mut self, deals: &[Deal]) -> Result<usize, DbError> {
        let imported_at = to_db_timestamp(&Utc::now());
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM deals", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO deals (record_id, deal_name, deal_owner, second_owner,
                                    last_activity_date, deal_stage, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for deal in deals {
                stmt.execute(params![
                    deal.record_id,
                    deal.deal_name,
                    deal.deal_owner,
                    deal.second_owner,
                    deal.last_activity_date.as_ref().map(to_db_timestamp),
                    deal.deal_stage,
                    imported_at,
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Replaced deals collection with {} deals", deals.len());
        Ok(deals.len())
    }

    /// All stored deals in upload order.
    pub fn list_deals(&self) -> Result<Vec<Deal>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, deal_name, deal_owner, second_owner,
                    last_activity_date, deal_stage
             FROM deals
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], deal_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_deals(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM deals", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn deal(name: &str, last: Option<DateTime<Utc>>) -> Deal {
        Deal {
            record_id: format!("rec-{}", name),
            deal_name: name.to_string(),
            deal_owner: "Omer Zia".to_string(),
            second_owner: None,
            last_activity_date: last,
            deal_stage: "Open".to_string(),
        }
    }

    #[test]
    fn test_replace_all_round_trips_fields() {
        let mut db = DealDb::open_in_memory().expect("db");
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let mut shared = deal("Globex", Some(last));
        shared.second_owner = Some("Sara Khan".to_string());

        db.replace_all_deals(&[deal("Acme", None), shared.clone()])
            .expect("replace");

        let stored = db.list_deals().expect("list");
        assert_eq!(stored, vec![deal("Acme", None), shared]);
    }

    #[test]
    fn test_replace_all_discards_previous_upload() {
        let mut db = DealDb::open_in_memory().expect("db");
        db.replace_all_deals(&[deal("Old one", None), deal("Old two", None)])
            .expect("first upload");
        db.replace_all_deals(&[deal("New", None)]).expect("second upload");

        let names: Vec<String> = db
            .list_deals()
            .unwrap()
            .into_iter()
            .map(|d| d.deal_name)
            .collect();
        assert_eq!(names, vec!["New".to_string()]);
    }

    #[test]
    fn test_replace_with_empty_upload_clears() {
        let mut db = DealDb::open_in_memory().expect("db");
        db.replace_all_deals(&[deal("Acme", None)]).unwrap();
        assert_eq!(db.replace_all_deals(&[]).unwrap(), 0);
        assert_eq!(db.count_deals().unwrap(), 0);
    }

    #[test]
    fn test_unparseable_stored_date_reads_as_none() {
        let db = DealDb::open_in_memory().expect("db");
        db.conn_ref()
            .execute(
                "INSERT INTO deals (deal_name, deal_owner, last_activity_date, deal_stage, imported_at)
                 VALUES ('Legacy', 'Omer Zia', 'yesterday', 'Open', '2024-03-20T00:00:00Z')",
                [],
            )
            .unwrap();

        let stored = db.list_deals().unwrap();
        assert_eq!(stored[0].last_activity_date, None);
    }
}
