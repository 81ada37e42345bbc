#[path = "../common/mod.rs"]
mod common;

use common::{spawn_app, test_config, test_state};
use serde_json::{json, Value};
use tempfile::TempDir;

#[tokio::test]
async fn test_student_crud() {
    let tmp = TempDir::new().unwrap();
    let app = spawn_app(test_state(test_config(&tmp, &[]))).await;

    let resp = app
        .post("/students", json!({ "name": "Alice", "username": "alice", "semester": "S6", "department": "CSE" }))
        .await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["username"], "alice");

    let resp = app.post("/students", json!({ "name": "Other", "username": "alice" })).await;
    assert_eq!(resp.status(), 409);
    let resp = app.post("/students", json!({ "name": "Nobody", "username": "" })).await;
    assert_eq!(resp.status(), 400);

    let list: Value = app.get("/students").await.json().await.unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["semester"], "S6");

    assert_eq!(app.delete("/students/alice").await.status(), 200);
    assert_eq!(app.delete("/students/alice").await.status(), 404);
}

#[tokio::test]
async fn test_teacher_crud() {
    let tmp = TempDir::new().unwrap();
    let app = spawn_app(test_state(test_config(&tmp, &[]))).await;

    assert_eq!(app.post("/teachers", json!({ "name": "Dr. One", "username": "teacher01" })).await.status(), 201);
    assert_eq!(app.post("/teachers", json!({ "name": "Dr. One", "username": "teacher01" })).await.status(), 409);

    let list: Value = app.get("/teachers").await.json().await.unwrap();
    assert_eq!(list[0]["username"], "teacher01");

    assert_eq!(app.delete("/teachers/teacher01").await.status(), 200);
    assert_eq!(app.delete("/teachers/teacher01").await.status(), 404);
}

#[tokio::test]
async fn test_subject_assignment() {
    let tmp = TempDir::new().unwrap();
    let app = spawn_app(test_state(test_config(&tmp, &[]))).await;
    app.post("/teachers", json!({ "name": "Dr. One", "username": "teacher01" })).await;
    app.post("/teachers", json!({ "name": "Dr. Two", "username": "teacher02" })).await;

    let resp = app.post("/subjects", json!({ "name": "DCC", "teacher_username": "teacher01" })).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], true);

    let resp = app.post("/subjects", json!({ "name": "DCC", "teacher_username": "teacher02" })).await;
    assert_eq!(resp.status(), 409);
    let resp = app.post("/subjects", json!({ "name": "CD", "teacher_username": "ghost" })).await;
    assert_eq!(resp.status(), 404);

    let list: Value = app.get("/subjects").await.json().await.unwrap();
    assert_eq!(list, json!([{ "name": "DCC", "teacher_username": "teacher01" }]));

    assert_eq!(app.delete("/subjects?name=DCC&teacher=teacher02").await.status(), 404);
    assert_eq!(app.delete("/subjects?name=DCC&teacher=teacher01").await.status(), 200);
    let list: Value = app.get("/subjects").await.json().await.unwrap();
    assert_eq!(list, json!([]));
}
