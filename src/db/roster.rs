//! Registry of enrolled students, teachers and subject assignments.
//!
//! The capture pipeline only reads `student_usernames`; the rest backs the
//! admin API. Deleting a student or teacher here never touches the subject
//! ledgers.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AttendanceError;
use crate::models::attendance::{Student, Subject, Teacher};

pub fn add_student(conn: &Connection, name: &str, username: &str, semester: &str, department: &str) -> Result<i64> {
    if is_student(conn, username)? {
        return Err(AttendanceError::Conflict(format!("student username {} already exists", username)).into());
    }
    conn.execute(
        "INSERT INTO students (name, username, semester, department) VALUES (?1, ?2, ?3, ?4)",
        params![name, username, semester, department],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn is_student(conn: &Connection, username: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE username = ?1", params![username], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn list_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare("SELECT id, name, username, semester, department FROM students ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(Student {
            id: row.get(0)?,
            name: row.get(1)?,
            username: row.get(2)?,
            semester: row.get(3)?,
            department: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows { out.push(r?); }
    Ok(out)
}

/// Enrolled usernames, sorted. Used to gap-fill attendance sheets.
pub fn student_usernames(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT username FROM students ORDER BY username ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_student(conn: &Connection, username: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM students WHERE username = ?1", params![username])?;
    Ok(n > 0)
}

pub fn add_teacher(conn: &Connection, name: &str, username: &str) -> Result<i64> {
    if is_teacher(conn, username)? {
        return Err(AttendanceError::Conflict(format!("teacher username {} already exists", username)).into());
    }
    conn.execute("INSERT INTO teachers (name, username) VALUES (?1, ?2)", params![name, username])?;
    Ok(conn.last_insert_rowid())
}

pub fn is_teacher(conn: &Connection, username: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM teachers WHERE username = ?1", params![username], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn list_teachers(conn: &Connection) -> Result<Vec<Teacher>> {
    let mut stmt = conn.prepare("SELECT id, name, username FROM teachers ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(Teacher { id: row.get(0)?, name: row.get(1)?, username: row.get(2)? })
    })?;
    let mut out = Vec::new();
    for r in rows { out.push(r?); }
    Ok(out)
}

pub fn delete_teacher(conn: &Connection, username: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM teachers WHERE username = ?1", params![username])?;
    Ok(n > 0)
}

/// Assign a subject to a teacher. A subject already held by a different
/// teacher is a conflict; re-assigning to the same teacher is a no-op.
pub fn assign_subject(conn: &Connection, name: &str, teacher_username: &str) -> Result<bool> {
    let holders: Vec<Option<String>> = {
        let mut stmt = conn.prepare("SELECT teacher_username FROM subjects WHERE name = ?1")?;
        let rows = stmt.query_map(params![name], |r| r.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    if holders.iter().any(|h| h.as_deref() != Some(teacher_username)) {
        return Err(AttendanceError::Conflict(format!("subject {} is assigned to a different teacher", name)).into());
    }
    if !holders.is_empty() {
        return Ok(false);
    }
    conn.execute("INSERT INTO subjects (name, teacher_username) VALUES (?1, ?2)", params![name, teacher_username])?;
    Ok(true)
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT name, teacher_username FROM subjects ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(Subject { name: row.get(0)?, teacher_username: row.get(1)? })
    })?;
    let mut out = Vec::new();
    for r in rows { out.push(r?); }
    Ok(out)
}

pub fn delete_subject(conn: &Connection, name: &str, teacher_username: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM subjects WHERE name = ?1 AND teacher_username = ?2",
        params![name, teacher_username],
    )?;
    Ok(n > 0)
}
