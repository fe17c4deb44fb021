// DDL constants for spill datasets and the bad-spill cache table.
//
// The dataset tables deliberately carry no uniqueness constraints on spillID:
// duplicated records are a data-quality defect the rules must be able to see.

pub const SPILL_DDL: &str = "\
CREATE TABLE IF NOT EXISTS Spill (
    spillID     INTEGER,
    targetPos   INTEGER,
    spillType   TEXT
);
CREATE INDEX IF NOT EXISTS idx_spill_id ON Spill(spillID);
";

pub const TARGET_DDL: &str = "\
CREATE TABLE IF NOT EXISTS Target (
    spillID     INTEGER,
    name        TEXT,
    value       INTEGER
);
CREATE INDEX IF NOT EXISTS idx_target_spill ON Target(spillID, name);
";

pub const SCALER_DDL: &str = "\
CREATE TABLE IF NOT EXISTS Scaler (
    spillID     INTEGER,
    scalerName  TEXT,
    value       REAL,
    spillType   TEXT
);
CREATE INDEX IF NOT EXISTS idx_scaler_spill ON Scaler(spillID, scalerName, spillType);
";

pub const BEAM_DDL: &str = "\
CREATE TABLE IF NOT EXISTS Beam (
    spillID     INTEGER,
    name        TEXT,
    value       REAL
);
CREATE INDEX IF NOT EXISTS idx_beam_spill ON Beam(spillID, name);
";

pub const BEAM_DAQ_DDL: &str = "\
CREATE TABLE IF NOT EXISTS BeamDAQ (
    spillID                 INTEGER,
    QIESum                  REAL,
    inhibit_block_sum       REAL,
    trigger_sum_no_inhibit  REAL,
    dutyfactor53MHz         REAL
);
CREATE INDEX IF NOT EXISTS idx_beamdaq_spill ON BeamDAQ(spillID);
";

pub const BAD_SPILLS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS bad_spills (
    spillID     INTEGER PRIMARY KEY
);
";

/// Tables holding raw spill data. Cleanup never touches these.
pub const DATASET_TABLES: [&str; 5] = ["Spill", "Target", "Scaler", "Beam", "BeamDAQ"];

pub const BAD_SPILLS_TABLE: &str = "bad_spills";

// Persistent: changes the file's journal. Only for datasets we create.
pub const JOURNAL_PRAGMA: &str = "PRAGMA journal_mode = WAL;";

/// Per-connection settings, safe on any existing dataset.
pub const CONNECTION_PRAGMAS: &str = "\
PRAGMA synchronous  = NORMAL;
PRAGMA cache_size   = -4000;
PRAGMA temp_store   = MEMORY;
";

/// Every dataset table, in dependency-free order.
pub fn dataset_ddl() -> [&'static str; 5] {
    [SPILL_DDL, TARGET_DDL, SCALER_DDL, BEAM_DDL, BEAM_DAQ_DDL]
}
