use serde::{Serialize, Deserialize};

/// One line of a subject's attendance sheet.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRow {
    pub student_id: String,
    pub classes_present: i64,
    pub attendance_percentage: f64,
}

impl AttendanceRow {
    pub fn absent(student_id: impl Into<String>) -> Self {
        Self { student_id: student_id.into(), classes_present: 0, attendance_percentage: 0.0 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub semester: String,
    pub department: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Subject {
    pub name: String,
    pub teacher_username: Option<String>,
}

/// Teacher dashboard payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TeacherSheet {
    pub teacher_username: String,
    pub subject: String,
    pub total_classes_taken: i64,
    pub attendance: Vec<AttendanceRow>,
}

/// Student dashboard payload: percentage per subject, `None` when the
/// student has never been recorded in that subject's ledger.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StudentSheet {
    pub student_username: String,
    pub subjects: Vec<SubjectPercentage>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubjectPercentage {
    pub subject: String,
    pub attendance_percentage: Option<f64>,
}
