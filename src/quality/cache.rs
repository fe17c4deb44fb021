use crate::quality::aggregate::BadSpillSet;
use crate::quality::error::Result;
use crate::quality::rules::SpillId;
use crate::quality::schema;
use crate::quality::store::SpillStore;
use rusqlite::{Transaction, TransactionBehavior};

/// Persists a bad-spill set in the dataset's `bad_spills` table so that the
/// (slow) rule evaluation need not be repeated.
pub struct BadSpillCache<'a> {
    store: &'a SpillStore,
}

impl<'a> BadSpillCache<'a> {
    pub fn new(store: &'a SpillStore) -> Self {
        Self { store }
    }

    /// Create `bad_spills` if it is missing.
    pub fn ensure_schema(&self) -> Result<()> {
        self.store.conn().execute_batch(schema::BAD_SPILLS_DDL)?;
        Ok(())
    }

    /// Store `set`, optionally clearing previous contents first.
    ///
    /// Clear and insert commit together, so readers see either the old or
    /// the new contents. Identifiers already present are skipped. Returns
    /// the number of newly inserted rows.
    pub fn write(&self, set: &BadSpillSet, clear_first: bool) -> Result<usize> {
        self.ensure_schema()?;

        let tx = Transaction::new_unchecked(self.store.conn(), TransactionBehavior::Immediate)?;
        if clear_first {
            let cleared = tx.execute("DELETE FROM bad_spills", [])?;
            tracing::debug!(cleared, "cleared bad_spills");
        }

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO bad_spills (spillID) VALUES (?1)")?;
            for spill in set.iter() {
                inserted += stmt.execute([spill])?;
            }
        }
        tx.commit()?;

        let source = self.store.source();
        tracing::info!(
            schema = %source.schema,
            inserted,
            total = set.len(),
            clear_first,
            "stored bad spill set"
        );
        Ok(inserted)
    }

    /// Load the stored set; empty if nothing has been stored yet.
    pub fn read(&self) -> Result<BadSpillSet> {
        if !self.store.table_exists(schema::BAD_SPILLS_TABLE)? {
            return Ok(BadSpillSet::new());
        }
        let mut stmt = self
            .store
            .conn()
            .prepare("SELECT DISTINCT spillID FROM bad_spills")?;
        let rows = stmt.query_map([], |row| row.get::<_, SpillId>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids.into_iter().collect())
    }
}
