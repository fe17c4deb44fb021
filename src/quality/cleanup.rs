use crate::quality::aggregate::BadSpillSet;
use crate::quality::error::{QualityError, Result};
use crate::quality::rules::SpillId;
use crate::quality::schema;
use crate::quality::store::SpillStore;
use rusqlite::{params_from_iter, Transaction, TransactionBehavior};

// Stays well under SQLite's bound-parameter limit.
const CHUNK: usize = 500;

/// An analysis table that has been checked to be a safe cleanup target.
///
/// The name is a plain identifier, the table exists, it has a `spillID`
/// column, and it is neither a raw dataset table nor the bad-spill cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTable(String);

impl AnalysisTable {
    pub fn resolve(store: &SpillStore, name: &str) -> Result<Self> {
        let reject = |reason: &str| QualityError::InvalidTable {
            table: name.to_string(),
            reason: reason.to_string(),
        };

        if !is_identifier(name) {
            return Err(reject("not a plain table identifier"));
        }
        let protected = schema::DATASET_TABLES
            .iter()
            .chain(std::iter::once(&schema::BAD_SPILLS_TABLE))
            .any(|t| t.eq_ignore_ascii_case(name));
        if protected {
            return Err(reject("raw dataset tables are never cleaned"));
        }
        if !store.table_exists(name)? {
            return Err(reject("no such table"));
        }
        if !store.has_column(name, "spillID")? {
            return Err(reject("table has no spillID column"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn in_clause(len: usize) -> String {
    vec!["?"; len].join(", ")
}

/// Rows of `table` belonging to bad spills; what a cleanup would delete.
pub fn count_rows_for_bad_spills(
    store: &SpillStore,
    table: &AnalysisTable,
    bad_spills: &BadSpillSet,
) -> Result<usize> {
    let ids: Vec<SpillId> = bad_spills.iter().collect();
    let mut total = 0usize;
    for chunk in ids.chunks(CHUNK) {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE spillID IN ({})",
            table.name(),
            in_clause(chunk.len())
        );
        let count: i64 = store
            .conn()
            .query_row(&sql, params_from_iter(chunk.iter()), |r| r.get(0))?;
        total += count as usize;
    }
    Ok(total)
}

/// Delete every row of `table` whose spill is in `bad_spills`.
///
/// An empty set is a no-op returning 0; no unfiltered delete is ever issued.
/// All chunks commit in one transaction.
pub fn delete_rows_for_bad_spills(
    store: &SpillStore,
    table: &AnalysisTable,
    bad_spills: &BadSpillSet,
) -> Result<usize> {
    if bad_spills.is_empty() {
        tracing::warn!(table = table.name(), "empty bad spill set; nothing deleted");
        return Ok(0);
    }

    let ids: Vec<SpillId> = bad_spills.iter().collect();
    let tx = Transaction::new_unchecked(store.conn(), TransactionBehavior::Immediate)?;
    let mut deleted = 0;
    for chunk in ids.chunks(CHUNK) {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE spillID IN ({})",
            table.name(),
            in_clause(chunk.len())
        );
        deleted += tx.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    tx.commit()?;

    tracing::info!(
        table = table.name(),
        bad_spills = bad_spills.len(),
        deleted,
        "removed rows from bad spills"
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIMUON_DDL: &str = "\
CREATE TABLE kDimuon (dimuonID INTEGER PRIMARY KEY, spillID INTEGER, mass REAL);";

    fn store_with_dimuons(spills: &[SpillId]) -> SpillStore {
        let store = SpillStore::open_in_memory().unwrap();
        store.conn().execute_batch(DIMUON_DDL).unwrap();
        for spill in spills {
            store
                .conn()
                .execute(
                    "INSERT INTO kDimuon (spillID, mass) VALUES (?1, 4.2)",
                    [spill],
                )
                .unwrap();
        }
        store
    }

    fn remaining(store: &SpillStore) -> Vec<SpillId> {
        let mut stmt = store
            .conn()
            .prepare("SELECT spillID FROM kDimuon ORDER BY spillID")
            .unwrap();
        let ids: Vec<SpillId> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        ids
    }

    #[test]
    fn empty_set_deletes_nothing() {
        let store = store_with_dimuons(&[100, 200]);
        let table = AnalysisTable::resolve(&store, "kDimuon").unwrap();
        let deleted = delete_rows_for_bad_spills(&store, &table, &BadSpillSet::new()).unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(remaining(&store), vec![100, 200]);
    }

    #[test]
    fn deletes_exactly_the_bad_spill_rows() {
        let store = store_with_dimuons(&[100, 150, 200, 300]);
        let table = AnalysisTable::resolve(&store, "kDimuon").unwrap();
        let bad: BadSpillSet = [100, 200].into_iter().collect();

        assert_eq!(count_rows_for_bad_spills(&store, &table, &bad).unwrap(), 2);
        assert_eq!(delete_rows_for_bad_spills(&store, &table, &bad).unwrap(), 2);
        assert_eq!(remaining(&store), vec![150, 300]);
    }

    #[test]
    fn large_sets_span_several_chunks() {
        let spills: Vec<SpillId> = (1..=1200).collect();
        let store = store_with_dimuons(&spills);
        let table = AnalysisTable::resolve(&store, "kDimuon").unwrap();
        let bad: BadSpillSet = (1..=1100).collect();
        assert_eq!(delete_rows_for_bad_spills(&store, &table, &bad).unwrap(), 1100);
        assert_eq!(remaining(&store).len(), 100);
    }

    #[test]
    fn rejects_unsafe_names() {
        let store = store_with_dimuons(&[]);
        for name in ["kDimuon; DROP TABLE Spill", "k\"Dimuon", "", "1table", "db.kDimuon"] {
            let err = AnalysisTable::resolve(&store, name).unwrap_err();
            assert!(matches!(err, QualityError::InvalidTable { .. }), "{name}");
        }
    }

    #[test]
    fn rejects_dataset_and_cache_tables() {
        let store = store_with_dimuons(&[]);
        for name in ["Spill", "scaler", "BeamDAQ", "bad_spills"] {
            assert!(AnalysisTable::resolve(&store, name).is_err(), "{name}");
        }
    }

    #[test]
    fn rejects_missing_or_unkeyed_tables() {
        let store = store_with_dimuons(&[]);
        store
            .conn()
            .execute_batch("CREATE TABLE notes (body TEXT)")
            .unwrap();
        assert!(AnalysisTable::resolve(&store, "kTrack").is_err());
        assert!(AnalysisTable::resolve(&store, "notes").is_err());
        assert_eq!(
            AnalysisTable::resolve(&store, "kDimuon").unwrap().name(),
            "kDimuon"
        );
    }
}
