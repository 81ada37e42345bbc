use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::{self, roster};
use crate::error::AttendanceError;
use crate::models::attendance::{Student, Subject, Teacher};
use crate::AppState;

/// Map a blocking-task result onto a JSON response. Domain errors keep their
/// status; everything else is a 500.
pub(crate) fn respond<T: Serialize>(
    action: &str,
    success: StatusCode,
    result: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Response {
    match result {
        Ok(Ok(body)) => (success, Json(body)).into_response(),
        Ok(Err(e)) => {
            let status = match e.downcast_ref::<AttendanceError>() {
                Some(AttendanceError::NotFound(_)) => StatusCode::NOT_FOUND,
                Some(AttendanceError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
                Some(AttendanceError::Conflict(_)) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status.is_server_error() {
                tracing::error!("Error {}: {:#}", action, e);
            } else {
                tracing::debug!("Rejected {}: {}", action, e);
            }
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => {
            tracing::error!("Task error {}: {}", action, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Internal server error" }))).into_response()
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AttendanceError::InvalidInput(format!("{} must not be empty", field)).into());
    }
    Ok(())
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "ledgers": state.ledgers.len(),
        "capture_state": state.stats.state(),
    }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let text = state.stats.metrics_text();
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text)
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default)]
    pub department: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeacherRequest {
    pub name: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignSubjectRequest {
    pub name: String,
    pub teacher_username: String,
}

#[derive(Debug, Deserialize)]
pub struct SubjectKey {
    pub name: String,
    pub teacher: String,
}

pub async fn list_students(State(state): State<Arc<AppState>>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<Student>> {
        let conn = db::open_or_create(&path)?;
        roster::list_students(&conn)
    })
    .await;
    respond("listing students", StatusCode::OK, result)
}

pub async fn create_student(State(state): State<Arc<AppState>>, Json(req): Json<CreateStudentRequest>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        require("username", &req.username)?;
        require("name", &req.name)?;
        let conn = db::open_or_create(&path)?;
        let id = roster::add_student(&conn, &req.name, &req.username, &req.semester, &req.department)?;
        tracing::info!(username = %req.username, "student added");
        Ok(json!({ "id": id, "username": req.username }))
    })
    .await;
    respond("creating student", StatusCode::CREATED, result)
}

pub async fn delete_student(State(state): State<Arc<AppState>>, Path(username): Path<String>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let conn = db::open_or_create(&path)?;
        if !roster::delete_student(&conn, &username)? {
            return Err(AttendanceError::NotFound(format!("student {}", username)).into());
        }
        tracing::info!(username = %username, "student deleted");
        Ok(json!({ "success": true }))
    })
    .await;
    respond("deleting student", StatusCode::OK, result)
}

pub async fn list_teachers(State(state): State<Arc<AppState>>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<Teacher>> {
        let conn = db::open_or_create(&path)?;
        roster::list_teachers(&conn)
    })
    .await;
    respond("listing teachers", StatusCode::OK, result)
}

pub async fn create_teacher(State(state): State<Arc<AppState>>, Json(req): Json<CreateTeacherRequest>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        require("username", &req.username)?;
        require("name", &req.name)?;
        let conn = db::open_or_create(&path)?;
        let id = roster::add_teacher(&conn, &req.name, &req.username)?;
        tracing::info!(username = %req.username, "teacher added");
        Ok(json!({ "id": id, "username": req.username }))
    })
    .await;
    respond("creating teacher", StatusCode::CREATED, result)
}

pub async fn delete_teacher(State(state): State<Arc<AppState>>, Path(username): Path<String>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let conn = db::open_or_create(&path)?;
        if !roster::delete_teacher(&conn, &username)? {
            return Err(AttendanceError::NotFound(format!("teacher {}", username)).into());
        }
        tracing::info!(username = %username, "teacher deleted");
        Ok(json!({ "success": true }))
    })
    .await;
    respond("deleting teacher", StatusCode::OK, result)
}

pub async fn list_subjects(State(state): State<Arc<AppState>>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<Subject>> {
        let conn = db::open_or_create(&path)?;
        roster::list_subjects(&conn)
    })
    .await;
    respond("listing subjects", StatusCode::OK, result)
}

pub async fn assign_subject(State(state): State<Arc<AppState>>, Json(req): Json<AssignSubjectRequest>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        require("name", &req.name)?;
        require("teacher_username", &req.teacher_username)?;
        let conn = db::open_or_create(&path)?;
        if !roster::is_teacher(&conn, &req.teacher_username)? {
            return Err(AttendanceError::NotFound(format!("teacher {}", req.teacher_username)).into());
        }
        let created = roster::assign_subject(&conn, &req.name, &req.teacher_username)?;
        Ok(json!({ "name": req.name, "teacher_username": req.teacher_username, "created": created }))
    })
    .await;
    respond("assigning subject", StatusCode::OK, result)
}

pub async fn delete_subject(State(state): State<Arc<AppState>>, Query(key): Query<SubjectKey>) -> Response {
    let path = state.registry_path.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let conn = db::open_or_create(&path)?;
        if !roster::delete_subject(&conn, &key.name, &key.teacher)? {
            return Err(AttendanceError::NotFound(format!("subject {} of {}", key.name, key.teacher)).into());
        }
        Ok(json!({ "success": true }))
    })
    .await;
    respond("deleting subject", StatusCode::OK, result)
}
