use rollcall_backend_sqlite::db::{self, ledger::Ledger, roster};
use rollcall_backend_sqlite::error::AttendanceError;
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, rusqlite::Connection) {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_or_create(tmp.path().join("registry.db")).unwrap();
    (tmp, conn)
}

fn is_conflict(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<AttendanceError>(), Some(AttendanceError::Conflict(_)))
}

#[test]
fn test_add_and_list_students() {
    let (_tmp, conn) = setup_test_db();
    let id = roster::add_student(&conn, "Bob B", "bob", "S6", "CSE").unwrap();
    assert!(id > 0);
    roster::add_student(&conn, "Alice A", "alice", "S6", "CSE").unwrap();

    let students = roster::list_students(&conn).unwrap();
    assert_eq!(students.len(), 2);
    assert_eq!(students[0].username, "bob");
    assert_eq!(students[1].department, "CSE");
    assert_eq!(roster::student_usernames(&conn).unwrap(), vec!["alice".to_string(), "bob".to_string()]);
    assert!(roster::is_student(&conn, "alice").unwrap());
}

#[test]
fn test_duplicate_student_is_conflict() {
    let (_tmp, conn) = setup_test_db();
    roster::add_student(&conn, "Alice", "alice", "S6", "CSE").unwrap();
    let err = roster::add_student(&conn, "Alice Again", "alice", "S4", "ECE").unwrap_err();
    assert!(is_conflict(&err));
    assert_eq!(roster::list_students(&conn).unwrap().len(), 1);
}

#[test]
fn test_delete_student() {
    let (_tmp, conn) = setup_test_db();
    roster::add_student(&conn, "Alice", "alice", "S6", "CSE").unwrap();
    assert!(roster::delete_student(&conn, "alice").unwrap());
    assert!(!roster::delete_student(&conn, "alice").unwrap());
    assert!(roster::student_usernames(&conn).unwrap().is_empty());
}

#[test]
fn test_teachers() {
    let (_tmp, conn) = setup_test_db();
    roster::add_teacher(&conn, "Dr. One", "teacher01").unwrap();
    assert!(is_conflict(&roster::add_teacher(&conn, "Dup", "teacher01").unwrap_err()));
    roster::add_teacher(&conn, "Dr. Two", "teacher02").unwrap();

    let teachers = roster::list_teachers(&conn).unwrap();
    assert_eq!(teachers.iter().map(|t| t.username.as_str()).collect::<Vec<_>>(), vec!["teacher01", "teacher02"]);
    assert!(roster::delete_teacher(&conn, "teacher02").unwrap());
    assert!(!roster::is_teacher(&conn, "teacher02").unwrap());
}

#[test]
fn test_subject_assignment_rules() {
    let (_tmp, conn) = setup_test_db();
    roster::add_teacher(&conn, "Dr. One", "teacher01").unwrap();
    roster::add_teacher(&conn, "Dr. Two", "teacher02").unwrap();

    assert!(roster::assign_subject(&conn, "DCC", "teacher01").unwrap());
    // Same teacher again is a no-op.
    assert!(!roster::assign_subject(&conn, "DCC", "teacher01").unwrap());
    // A different teacher cannot take it.
    assert!(is_conflict(&roster::assign_subject(&conn, "DCC", "teacher02").unwrap_err()));
    roster::assign_subject(&conn, "AAD", "teacher02").unwrap();

    let subjects = roster::list_subjects(&conn).unwrap();
    let listed: Vec<(&str, Option<&str>)> =
        subjects.iter().map(|s| (s.name.as_str(), s.teacher_username.as_deref())).collect();
    assert_eq!(listed, vec![("AAD", Some("teacher02")), ("DCC", Some("teacher01"))]);

    assert!(!roster::delete_subject(&conn, "DCC", "teacher02").unwrap());
    assert!(roster::delete_subject(&conn, "DCC", "teacher01").unwrap());
    assert!(roster::assign_subject(&conn, "DCC", "teacher02").unwrap());
}

#[test]
fn test_roster_deletion_keeps_ledger_rows() {
    let (tmp, conn) = setup_test_db();
    roster::add_student(&conn, "Alice", "alice", "S6", "CSE").unwrap();
    let ledger = Ledger::new(tmp.path().join("dcc.db"));
    ledger.record_class_taken("teacher01", "DCC").unwrap();
    ledger.record_attendance("alice").unwrap();

    roster::delete_student(&conn, "alice").unwrap();
    let enrolled = roster::student_usernames(&conn).unwrap();
    let rows = ledger.read_attendance(&enrolled).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].student_id, "alice");
    assert_eq!(rows[0].classes_present, 1);
}
