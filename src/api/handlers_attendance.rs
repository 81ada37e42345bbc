use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;

use crate::api::handlers::respond;
use crate::db::{self, roster};
use crate::error::AttendanceError;
use crate::models::attendance::{AttendanceRow, StudentSheet, SubjectPercentage, TeacherSheet};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub student_id: String,
    pub classes_present: i64,
}

fn unmapped(teacher: &str) -> anyhow::Error {
    AttendanceError::NotFound(format!("teacher {} has no subject mapping", teacher)).into()
}

/// Attendance sheet for the teacher's subject, gap-filled with every enrolled
/// student.
pub async fn teacher_sheet(State(state): State<Arc<AppState>>, Path(teacher): Path<String>) -> Response {
    let result = tokio::task::spawn_blocking(move || -> Result<TeacherSheet> {
        let entry = state.ledgers.for_teacher(&teacher).ok_or_else(|| unmapped(&teacher))?;
        let enrolled = {
            let conn = db::open_or_create(&state.registry_path)?;
            roster::student_usernames(&conn)?
        };
        let attendance = entry.ledger.read_attendance(&enrolled)?;
        let total_classes_taken = entry.ledger.read_classes_taken(&teacher)?;
        Ok(TeacherSheet {
            teacher_username: teacher,
            subject: entry.subject.clone(),
            total_classes_taken,
            attendance,
        })
    })
    .await;
    respond("reading teacher attendance", StatusCode::OK, result)
}

/// Teacher override of one student's present count.
pub async fn override_attendance(
    State(state): State<Arc<AppState>>,
    Path(teacher): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || -> Result<AttendanceRow> {
        let entry = state.ledgers.for_teacher(&teacher).ok_or_else(|| unmapped(&teacher))?;
        if req.student_id.trim().is_empty() {
            return Err(AttendanceError::InvalidInput("student_id must not be empty".into()).into());
        }
        let row = entry.ledger.set_classes_present(&req.student_id, req.classes_present)?;
        tracing::info!(teacher = %teacher, subject = %entry.subject, student = %req.student_id, "attendance updated by teacher");
        Ok(row)
    })
    .await;
    respond("updating attendance", StatusCode::OK, result)
}

/// Percentage per mapped subject for one enrolled student.
pub async fn student_sheet(State(state): State<Arc<AppState>>, Path(student): Path<String>) -> Response {
    let result = tokio::task::spawn_blocking(move || -> Result<StudentSheet> {
        {
            let conn = db::open_or_create(&state.registry_path)?;
            if !roster::is_student(&conn, &student)? {
                return Err(AttendanceError::NotFound(format!("student {}", student)).into());
            }
        }
        let mut subjects = Vec::with_capacity(state.ledgers.len());
        for entry in state.ledgers.iter() {
            subjects.push(SubjectPercentage {
                subject: entry.subject.clone(),
                attendance_percentage: entry.ledger.read_student_percentage(&student)?,
            });
        }
        Ok(StudentSheet { student_username: student, subjects })
    })
    .await;
    respond("reading student attendance", StatusCode::OK, result)
}
