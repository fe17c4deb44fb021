#![allow(dead_code)]

use rusqlite::{params, Connection};
use spillcheck::quality::rules::{SpillId, EOS};

/// A spill whose every reading sits inside the roadset 57 and 62 windows.
pub fn insert_good_spill(conn: &Connection, id: SpillId) {
    conn.execute("INSERT INTO Spill VALUES (?1, 1, 'EOS')", [id])
        .unwrap();
    conn.execute("INSERT INTO Target VALUES (?1, 'TARGPOS_CONTROL', 1)", [id])
        .unwrap();
    for (name, value) in [
        ("TSGo", 5000.0),
        ("AcceptedMatrix1", 4000.0),
        ("AfterInhMatrix1", 8000.0),
    ] {
        conn.execute(
            "INSERT INTO Scaler VALUES (?1, ?2, ?3, ?4)",
            params![id, name, value, EOS],
        )
        .unwrap();
    }
    for name in ["S:G2SEM", "F:NM3ION"] {
        conn.execute("INSERT INTO Beam VALUES (?1, ?2, 5e12)", params![id, name])
            .unwrap();
    }
    conn.execute(
        "INSERT INTO BeamDAQ VALUES (?1, 1e11, 1e10, 1e10, 30)",
        [id],
    )
    .unwrap();
}

/// Move a spill to `pos`, keeping its control record consistent.
pub fn set_target_pos(conn: &Connection, id: SpillId, pos: i64) {
    conn.execute("UPDATE Spill SET targetPos = ?1 WHERE spillID = ?2", [pos, id])
        .unwrap();
    conn.execute("UPDATE Target SET value = ?1 WHERE spillID = ?2", [pos, id])
        .unwrap();
}

/// Change an end-of-spill reading; other spill types are left alone.
pub fn set_scaler(conn: &Connection, id: SpillId, name: &str, value: f64) {
    conn.execute(
        "UPDATE Scaler SET value = ?1 WHERE spillID = ?2 AND scalerName = ?3 AND spillType = ?4",
        params![value, id, name, EOS],
    )
    .unwrap();
}
