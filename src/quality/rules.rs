//! The spill quality rules.
//!
//! Each rule is a read-only query over the dataset returning the spills that
//! violate it. Rules share no state and may run in any order or in parallel.

use crate::quality::error::{QualityError, Result};
use crate::quality::store::SpillStore;
use crate::quality::thresholds::{Quantity, Range, ThresholdProfile};
use rusqlite::{params, Connection, Params};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

pub type SpillId = i64;

pub const EOS: &str = "EOS";
pub const TARGPOS_CONTROL: &str = "TARGPOS_CONTROL";
pub const TSGO: &str = "TSGo";
pub const ACCEPTED_MATRIX1: &str = "AcceptedMatrix1";
pub const AFTER_INH_MATRIX1: &str = "AfterInhMatrix1";
pub const G2SEM: &str = "S:G2SEM";
pub const NM3ION: &str = "F:NM3ION";

const TARGET_MISMATCH_SQL: &str = "\
SELECT DISTINCT s.spillID
FROM Spill s INNER JOIN Target t ON t.spillID = s.spillID
WHERE t.name = ?1 AND s.targetPos != t.value";

const TARGET_POS_SQL: &str = "\
SELECT DISTINCT spillID FROM Spill
WHERE targetPos NOT BETWEEN ?1 AND ?2";

const SCALER_RANGE_SQL: &str = "\
SELECT DISTINCT spillID FROM Scaler
WHERE spillType = ?1 AND scalerName = ?2 AND value NOT BETWEEN ?3 AND ?4";

// A non-positive AfterInh count yields ratio 0 rather than a division error.
const ACCEPT_RATIO_SQL: &str = "\
SELECT DISTINCT acc.spillID
FROM (SELECT spillID, value FROM Scaler WHERE spillType = ?1 AND scalerName = ?2) acc
INNER JOIN (SELECT spillID, value FROM Scaler WHERE spillType = ?1 AND scalerName = ?3) aft
    ON aft.spillID = acc.spillID
WHERE (CASE WHEN aft.value > 0 THEN CAST(acc.value AS REAL) / aft.value ELSE 0.0 END)
    NOT BETWEEN ?4 AND ?5";

const BEAM_RANGE_SQL: &str = "\
SELECT DISTINCT spillID FROM Beam
WHERE name = ?1 AND value NOT BETWEEN ?2 AND ?3";

const QIE_SUM_SQL: &str = "\
SELECT DISTINCT spillID FROM BeamDAQ WHERE QIESum NOT BETWEEN ?1 AND ?2";

const INHIBIT_SUM_SQL: &str = "\
SELECT DISTINCT spillID FROM BeamDAQ WHERE inhibit_block_sum NOT BETWEEN ?1 AND ?2";

const BUSY_SUM_SQL: &str = "\
SELECT DISTINCT spillID FROM BeamDAQ WHERE trigger_sum_no_inhibit NOT BETWEEN ?1 AND ?2";

const DUTY_FACTOR_SQL: &str = "\
SELECT DISTINCT spillID FROM BeamDAQ WHERE dutyfactor53MHz NOT BETWEEN ?1 AND ?2";

const SPILL_ID_RANGE_SQL: &str = "\
SELECT DISTINCT spillID FROM Spill WHERE spillID BETWEEN ?1 AND ?2";

// ?1 TARGPOS_CONTROL, ?2 EOS, ?3 TSGo, ?4 AfterInhMatrix1, ?5 AcceptedMatrix1,
// ?6 F:NM3ION, ?7 S:G2SEM
const DUPLICATE_RECORDS_SQL: &str = "\
SELECT spillID FROM Target WHERE name = ?1
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Spill
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Scaler WHERE spillType = ?2 AND scalerName = ?3
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Scaler WHERE spillType = ?2 AND scalerName = ?4
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Scaler WHERE spillType = ?2 AND scalerName = ?5
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM BeamDAQ
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Beam WHERE name = ?6
    GROUP BY spillID HAVING COUNT(*) > 1
UNION
SELECT spillID FROM Beam WHERE name = ?7
    GROUP BY spillID HAVING COUNT(*) > 1";

// Spills lacking a companion record, then companion records lacking a spill.
// ?1 TARGPOS_CONTROL, ?2 EOS, ?3 TSGo, ?4 AfterInhMatrix1, ?5 AcceptedMatrix1,
// ?6 S:G2SEM
const MISSING_RECORDS_SQL: &str = "\
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM Target t WHERE t.spillID = s.spillID AND t.name = ?1)
UNION
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM Scaler sc WHERE sc.spillID = s.spillID
        AND sc.spillType = ?2 AND sc.scalerName = ?3)
UNION
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM Scaler sc WHERE sc.spillID = s.spillID
        AND sc.spillType = ?2 AND sc.scalerName = ?4)
UNION
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM Scaler sc WHERE sc.spillID = s.spillID
        AND sc.spillType = ?2 AND sc.scalerName = ?5)
UNION
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM BeamDAQ b WHERE b.spillID = s.spillID)
UNION
SELECT s.spillID FROM Spill s WHERE NOT EXISTS
    (SELECT 1 FROM Beam b WHERE b.spillID = s.spillID AND b.name = ?6)
UNION
SELECT t.spillID FROM Target t WHERE t.name = ?1 AND NOT EXISTS
    (SELECT 1 FROM Spill s WHERE s.spillID = t.spillID)
UNION
SELECT sc.spillID FROM Scaler sc
    WHERE sc.spillType = ?2 AND sc.scalerName IN (?3, ?4, ?5) AND NOT EXISTS
    (SELECT 1 FROM Spill s WHERE s.spillID = sc.spillID)
UNION
SELECT b.spillID FROM BeamDAQ b WHERE NOT EXISTS
    (SELECT 1 FROM Spill s WHERE s.spillID = b.spillID)
UNION
SELECT b.spillID FROM Beam b WHERE b.name = ?6 AND NOT EXISTS
    (SELECT 1 FROM Spill s WHERE s.spillID = b.spillID)";

/// One data-quality rule. Serializes as its [`Rule::id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
    TargetMismatch,
    TargetPosRange,
    TsGoRange,
    AcceptedRange,
    AfterInhRange,
    AcceptRatioRange,
    G2SemRange,
    QieSumRange,
    InhibitSumRange,
    BusySumRange,
    DutyFactorRange,
    BadSpillRanges,
    DuplicateRecords,
    MissingRecords,
}

impl Rule {
    pub const ALL: [Rule; 14] = [
        Rule::TargetMismatch,
        Rule::TargetPosRange,
        Rule::TsGoRange,
        Rule::AcceptedRange,
        Rule::AfterInhRange,
        Rule::AcceptRatioRange,
        Rule::G2SemRange,
        Rule::QieSumRange,
        Rule::InhibitSumRange,
        Rule::BusySumRange,
        Rule::DutyFactorRange,
        Rule::BadSpillRanges,
        Rule::DuplicateRecords,
        Rule::MissingRecords,
    ];

    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Rule::TargetMismatch => "target_mismatch",
            Rule::TargetPosRange => "target_pos_range",
            Rule::TsGoRange => "tsgo_range",
            Rule::AcceptedRange => "accepted_range",
            Rule::AfterInhRange => "after_inh_range",
            Rule::AcceptRatioRange => "accept_ratio_range",
            Rule::G2SemRange => "g2sem_range",
            Rule::QieSumRange => "qie_sum_range",
            Rule::InhibitSumRange => "inhibit_sum_range",
            Rule::BusySumRange => "busy_sum_range",
            Rule::DutyFactorRange => "duty_factor_range",
            Rule::BadSpillRanges => "bad_spill_ranges",
            Rule::DuplicateRecords => "duplicate_records",
            Rule::MissingRecords => "missing_records",
        }
    }

    pub fn from_id(id: &str) -> Option<Rule> {
        Rule::ALL.into_iter().find(|rule| rule.id() == id)
    }

    /// The monitored quantity, for range rules.
    pub fn quantity(&self) -> Option<Quantity> {
        match self {
            Rule::TargetPosRange => Some(Quantity::TargetPos),
            Rule::TsGoRange => Some(Quantity::TsGo),
            Rule::AcceptedRange => Some(Quantity::Accepted),
            Rule::AfterInhRange => Some(Quantity::AfterInh),
            Rule::AcceptRatioRange => Some(Quantity::AcceptedOverAfterInh),
            Rule::G2SemRange => Some(Quantity::G2Sem),
            Rule::QieSumRange => Some(Quantity::QieSum),
            Rule::InhibitSumRange => Some(Quantity::Inhibit),
            Rule::BusySumRange => Some(Quantity::Busy),
            Rule::DutyFactorRange => Some(Quantity::DutyFactor),
            Rule::TargetMismatch
            | Rule::BadSpillRanges
            | Rule::DuplicateRecords
            | Rule::MissingRecords => None,
        }
    }

    /// Human-readable summary for log lines, with the window applied.
    pub fn describe(&self, profile: &ThresholdProfile) -> String {
        if let Some(quantity) = self.quantity() {
            return format!("{quantity} not in {}", profile.range(quantity));
        }
        match self {
            Rule::TargetMismatch => "Spill.targetPos != Target.TARGPOS_CONTROL".into(),
            Rule::BadSpillRanges => {
                format!("{} configured bad spill range(s)", profile.bad_spill_ranges.len())
            }
            Rule::DuplicateRecords => "duplicate records".into(),
            Rule::MissingRecords => "missing or orphaned records".into(),
            _ => self.id().into(),
        }
    }

    /// Spills violating this rule.
    pub fn evaluate(&self, store: &SpillStore, profile: &ThresholdProfile) -> Result<BTreeSet<SpillId>> {
        self.run(store.conn(), profile).map_err(|source| {
            let ds = store.source();
            QualityError::Query {
                server: ds.server.clone(),
                schema: ds.schema.clone(),
                rule: self.id(),
                source,
            }
        })
    }

    fn run(&self, conn: &Connection, profile: &ThresholdProfile) -> rusqlite::Result<BTreeSet<SpillId>> {
        match self {
            Rule::TargetMismatch => spill_ids(conn, TARGET_MISMATCH_SQL, [TARGPOS_CONTROL]),
            Rule::TargetPosRange => outside(conn, TARGET_POS_SQL, profile.target_pos),
            Rule::TsGoRange => scaler_outside(conn, TSGO, profile.tsgo),
            Rule::AcceptedRange => scaler_outside(conn, ACCEPTED_MATRIX1, profile.accepted),
            Rule::AfterInhRange => scaler_outside(conn, AFTER_INH_MATRIX1, profile.after_inh),
            Rule::AcceptRatioRange => spill_ids(
                conn,
                ACCEPT_RATIO_SQL,
                params![
                    EOS,
                    ACCEPTED_MATRIX1,
                    AFTER_INH_MATRIX1,
                    profile.accept_ratio.lo,
                    profile.accept_ratio.hi
                ],
            ),
            Rule::G2SemRange => spill_ids(
                conn,
                BEAM_RANGE_SQL,
                params![G2SEM, profile.g2sem.lo, profile.g2sem.hi],
            ),
            Rule::QieSumRange => outside(conn, QIE_SUM_SQL, profile.qie_sum),
            Rule::InhibitSumRange => outside(conn, INHIBIT_SUM_SQL, profile.inhibit),
            Rule::BusySumRange => outside(conn, BUSY_SUM_SQL, profile.busy),
            Rule::DutyFactorRange => outside(conn, DUTY_FACTOR_SQL, profile.duty_factor),
            Rule::BadSpillRanges => {
                let mut ids = BTreeSet::new();
                for range in &profile.bad_spill_ranges {
                    ids.extend(spill_ids(
                        conn,
                        SPILL_ID_RANGE_SQL,
                        params![range.first, range.last],
                    )?);
                }
                Ok(ids)
            }
            Rule::DuplicateRecords => spill_ids(
                conn,
                DUPLICATE_RECORDS_SQL,
                params![
                    TARGPOS_CONTROL,
                    EOS,
                    TSGO,
                    AFTER_INH_MATRIX1,
                    ACCEPTED_MATRIX1,
                    NM3ION,
                    G2SEM
                ],
            ),
            Rule::MissingRecords => spill_ids(
                conn,
                MISSING_RECORDS_SQL,
                params![
                    TARGPOS_CONTROL,
                    EOS,
                    TSGO,
                    AFTER_INH_MATRIX1,
                    ACCEPTED_MATRIX1,
                    G2SEM
                ],
            ),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

fn outside(conn: &Connection, sql: &str, range: Range) -> rusqlite::Result<BTreeSet<SpillId>> {
    spill_ids(conn, sql, params![range.lo, range.hi])
}

fn scaler_outside(conn: &Connection, scaler: &str, range: Range) -> rusqlite::Result<BTreeSet<SpillId>> {
    spill_ids(
        conn,
        SCALER_RANGE_SQL,
        params![EOS, scaler, range.lo, range.hi],
    )
}

/// Run a single-column query and collect the non-null spill identifiers.
fn spill_ids<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<BTreeSet<SpillId>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, Option<SpillId>>(0))?;

    let mut ids = BTreeSet::new();
    for row in rows {
        if let Some(id) = row? {
            ids.insert(id);
        }
    }
    Ok(ids)
}
