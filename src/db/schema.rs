use anyhow::Result;
use rusqlite::Connection;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Registry tables: enrolled students, teachers and subject assignments.
pub fn apply_registry_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS students (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  username TEXT NOT NULL UNIQUE,
  semester TEXT NOT NULL,
  department TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS teachers (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  username TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS subjects (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  teacher_username TEXT,
  FOREIGN KEY (teacher_username) REFERENCES teachers(username)
);
CREATE INDEX IF NOT EXISTS idx_subjects_name ON subjects(name);
    "#,
    )?;
    Ok(())
}

/// Per-subject ledger tables. Column types stay REAL to match existing ledger
/// files. The unique keys live in [`apply_ledger_keys`] so reads never touch them.
pub fn apply_ledger_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS ClassesTaken (
  teacher_name TEXT,
  subject TEXT,
  classes_taken REAL
);
CREATE TABLE IF NOT EXISTS Attendance (
  student_id TEXT,
  classes_present REAL,
  attendance_percentage REAL
);
    "#,
    )
}

/// Build the natural-key indexes the upserts rely on. Ledgers written without
/// them may hold duplicate keys; those rows are first collapsed into one,
/// keeping the highest counter. Returns how many rows were removed.
pub fn apply_ledger_keys(conn: &Connection) -> rusqlite::Result<usize> {
    let indexed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index'
         AND name IN ('idx_classes_taken_key', 'idx_attendance_student')",
        [],
        |r| r.get(0),
    )?;
    if indexed == 2 {
        return Ok(0);
    }

    let before: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM ClassesTaken) + (SELECT COUNT(*) FROM Attendance)",
        [],
        |r| r.get(0),
    )?;
    conn.execute_batch(
        r#"
CREATE TEMP TABLE merged_classes AS
  SELECT teacher_name, subject, MAX(COALESCE(classes_taken, 0)) AS classes_taken
  FROM ClassesTaken GROUP BY teacher_name, subject;
DELETE FROM ClassesTaken;
INSERT INTO ClassesTaken (teacher_name, subject, classes_taken)
  SELECT teacher_name, subject, classes_taken FROM merged_classes;
DROP TABLE merged_classes;

CREATE TEMP TABLE merged_attendance AS
  SELECT student_id, MAX(COALESCE(classes_present, 0)) AS classes_present
  FROM Attendance GROUP BY student_id;
DELETE FROM Attendance;
INSERT INTO Attendance (student_id, classes_present, attendance_percentage)
  SELECT student_id, classes_present, 0 FROM merged_attendance;
DROP TABLE merged_attendance;

CREATE UNIQUE INDEX IF NOT EXISTS idx_classes_taken_key ON ClassesTaken(teacher_name, subject);
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_student ON Attendance(student_id);
    "#,
    )?;
    let after: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM ClassesTaken) + (SELECT COUNT(*) FROM Attendance)",
        [],
        |r| r.get(0),
    )?;
    Ok((before - after).max(0) as usize)
}
