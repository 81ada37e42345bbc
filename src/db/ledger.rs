//! Per-subject attendance ledger.
//!
//! Each ledger is its own SQLite file holding the `ClassesTaken` counters
//! (per teacher and subject) and the `Attendance` counters (per student).
//! `attendance_percentage` is denormalized: every write recomputes it for all
//! rows from the ledger-wide sum of classes taken, inside the same IMMEDIATE
//! transaction as the counter change and under the ledger's write lock.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::db::schema;
use crate::error::{AttendanceError, Result};
use crate::models::attendance::AttendanceRow;
use crate::utils::config::TeacherAssignment;
use crate::utils::path::resolve_under;

#[derive(Clone, Debug)]
pub struct Ledger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_lock(path, Arc::new(Mutex::new(())))
    }

    fn with_lock(path: impl Into<PathBuf>, write_lock: Arc<Mutex<()>>) -> Self {
        Self { path: path.into(), write_lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger file, its tables and keys if they do not exist yet.
    /// Duplicate rows left by older writers are merged here.
    pub fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AttendanceError::InvalidConfig(format!("cannot create ledger directory {:?}: {}", parent, e))
                })?;
            }
        }
        self.write(|_| Ok(()))?;
        debug!(ledger = ?self.path, "ledger initialized");
        Ok(())
    }

    /// Increment the (teacher, subject) counter, creating it at 1.
    /// Returns the new count.
    pub fn record_class_taken(&self, teacher: &str, subject: &str) -> Result<i64> {
        let count = self.write(|tx| {
            tx.execute(
                "INSERT INTO ClassesTaken (teacher_name, subject, classes_taken) VALUES (?1, ?2, 1)
                 ON CONFLICT(teacher_name, subject) DO UPDATE SET classes_taken = classes_taken + 1",
                params![teacher, subject],
            )?;
            recompute(tx)?;
            tx.query_row(
                "SELECT CAST(classes_taken AS INTEGER) FROM ClassesTaken WHERE teacher_name = ?1 AND subject = ?2",
                params![teacher, subject],
                |r| r.get(0),
            )
        })?;
        info!(ledger = ?self.path, teacher, subject, classes_taken = count, "class taken recorded");
        Ok(count)
    }

    /// Increment the student's present counter, creating it at 1, then
    /// recompute every percentage in the ledger.
    pub fn record_attendance(&self, student_id: &str) -> Result<AttendanceRow> {
        let row = self.write(|tx| {
            tx.execute(
                "INSERT INTO Attendance (student_id, classes_present, attendance_percentage) VALUES (?1, 1, 0)
                 ON CONFLICT(student_id) DO UPDATE SET classes_present = classes_present + 1",
                params![student_id],
            )?;
            recompute(tx)?;
            select_row(tx, student_id)
        })?;
        debug!(ledger = ?self.path, student = student_id, present = row.classes_present, "attendance recorded");
        Ok(row)
    }

    /// Teacher override: set the absolute present count, then recompute.
    pub fn set_classes_present(&self, student_id: &str, value: i64) -> Result<AttendanceRow> {
        if value < 0 {
            return Err(AttendanceError::InvalidInput(format!(
                "classes_present must not be negative (got {})",
                value
            )));
        }
        let row = self.write(|tx| {
            tx.execute(
                "INSERT INTO Attendance (student_id, classes_present, attendance_percentage) VALUES (?1, ?2, 0)
                 ON CONFLICT(student_id) DO UPDATE SET classes_present = excluded.classes_present",
                params![student_id, value as f64],
            )?;
            recompute(tx)?;
            select_row(tx, student_id)
        })?;
        info!(ledger = ?self.path, student = student_id, present = value, "classes present overridden");
        Ok(row)
    }

    /// The global percentage recompute on its own. Returns the divisor used.
    pub fn recompute_percentages(&self) -> Result<f64> {
        self.write(|tx| recompute(tx))
    }

    /// All attendance rows, plus a `(username, 0, 0.0)` placeholder for every
    /// enrolled student the ledger has never seen, sorted by student id.
    pub fn read_attendance(&self, enrolled: &[String]) -> Result<Vec<AttendanceRow>> {
        let conn = self.open()?;
        let mut rows: BTreeMap<String, AttendanceRow> = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT student_id, CAST(COALESCE(classes_present, 0) AS INTEGER), COALESCE(attendance_percentage, 0.0)
                     FROM Attendance ORDER BY student_id ASC",
                )
                .map_err(|e| self.storage(e))?;
            let mapped = stmt
                .query_map([], |r| {
                    Ok(AttendanceRow {
                        student_id: r.get(0)?,
                        classes_present: r.get(1)?,
                        attendance_percentage: r.get(2)?,
                    })
                })
                .map_err(|e| self.storage(e))?;
            for row in mapped {
                let row = row.map_err(|e| self.storage(e))?;
                rows.insert(row.student_id.clone(), row);
            }
        }
        for username in enrolled {
            rows.entry(username.clone()).or_insert_with(|| AttendanceRow::absent(username.clone()));
        }
        Ok(rows.into_values().collect())
    }

    /// Classes taken by `teacher` in this ledger, 0 when never recorded.
    pub fn read_classes_taken(&self, teacher: &str) -> Result<i64> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT CAST(TOTAL(classes_taken) AS INTEGER) FROM ClassesTaken WHERE teacher_name = ?1",
            params![teacher],
            |r| r.get(0),
        )
        .map_err(|e| self.storage(e))
    }

    pub fn total_classes_taken(&self) -> Result<i64> {
        let conn = self.open()?;
        conn.query_row("SELECT CAST(TOTAL(classes_taken) AS INTEGER) FROM ClassesTaken", [], |r| r.get(0))
            .map_err(|e| self.storage(e))
    }

    /// Stored percentage for one student, `None` if the student has no row.
    pub fn read_student_percentage(&self, student_id: &str) -> Result<Option<f64>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT COALESCE(attendance_percentage, 0.0) FROM Attendance WHERE student_id = ?1",
            params![student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| self.storage(e))
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| self.storage(e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(|e| self.storage(e))?;
        schema::apply_ledger_schema(&conn).map_err(|e| self.storage(e))?;
        Ok(conn)
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| self.storage(e))?;
        let merged = schema::apply_ledger_keys(&tx).map_err(|e| self.storage(e))?;
        if merged > 0 {
            recompute(&tx).map_err(|e| self.storage(e))?;
            warn!(ledger = ?self.path, merged, "merged duplicate ledger rows");
        }
        let out = f(&tx).map_err(|e| self.storage(e))?;
        tx.commit().map_err(|e| self.storage(e))?;
        Ok(out)
    }

    fn storage(&self, e: rusqlite::Error) -> AttendanceError {
        AttendanceError::storage(&self.path, e)
    }
}

// Divisor falls back to 1 when nothing has been taught yet.
fn recompute(conn: &Connection) -> rusqlite::Result<f64> {
    let total: f64 = conn.query_row("SELECT TOTAL(classes_taken) FROM ClassesTaken", [], |r| r.get(0))?;
    let divisor = if total == 0.0 { 1.0 } else { total };
    conn.execute(
        "UPDATE Attendance SET attendance_percentage = (classes_present / ?1) * 100",
        params![divisor],
    )?;
    Ok(divisor)
}

fn select_row(conn: &Connection, student_id: &str) -> rusqlite::Result<AttendanceRow> {
    conn.query_row(
        "SELECT student_id, CAST(classes_present AS INTEGER), COALESCE(attendance_percentage, 0.0)
         FROM Attendance WHERE student_id = ?1",
        params![student_id],
        |r| {
            Ok(AttendanceRow {
                student_id: r.get(0)?,
                classes_present: r.get(1)?,
                attendance_percentage: r.get(2)?,
            })
        },
    )
}

/// The ledger a teacher's sessions are written to.
#[derive(Clone, Debug)]
pub struct SubjectLedger {
    pub teacher: String,
    pub subject: String,
    pub ledger: Ledger,
}

/// Teacher → subject ledger mapping built from configuration.
///
/// Teachers that share a database file share one write lock, so every writer
/// in the process goes through the same critical section for that file.
#[derive(Clone, Debug, Default)]
pub struct LedgerSet {
    by_teacher: BTreeMap<String, SubjectLedger>,
}

impl LedgerSet {
    pub fn from_assignments(data_dir: &Path, assignments: &BTreeMap<String, TeacherAssignment>) -> Self {
        let mut locks: HashMap<PathBuf, Arc<Mutex<()>>> = HashMap::new();
        let by_teacher = assignments
            .iter()
            .map(|(teacher, a)| {
                let path = resolve_under(data_dir, &a.database);
                let lock = locks.entry(path.clone()).or_default().clone();
                let entry = SubjectLedger {
                    teacher: teacher.clone(),
                    subject: a.subject.clone(),
                    ledger: Ledger::with_lock(path, lock),
                };
                (teacher.clone(), entry)
            })
            .collect();
        Self { by_teacher }
    }

    pub fn for_teacher(&self, teacher: &str) -> Option<&SubjectLedger> {
        self.by_teacher.get(teacher)
    }

    pub fn contains_teacher(&self, teacher: &str) -> bool {
        self.by_teacher.contains_key(teacher)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubjectLedger> {
        self.by_teacher.values()
    }

    pub fn len(&self) -> usize {
        self.by_teacher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_teacher.is_empty()
    }

    /// Create every mapped ledger up front.
    pub fn initialize_all(&self) -> Result<()> {
        for entry in self.iter() {
            entry.ledger.initialize()?;
        }
        info!(ledgers = self.len(), "subject ledgers ready");
        Ok(())
    }
}
