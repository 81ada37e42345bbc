use axum::{Router, routing::{get, delete}};
use std::sync::Arc;
use tower_http::cors::{CorsLayer, AllowOrigin};
use axum::http::Method;
use crate::AppState;
use crate::api::{handlers, handlers_attendance};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/stats", get(handlers::stats))
        .route("/students", get(handlers::list_students).post(handlers::create_student))
        .route("/students/:username", delete(handlers::delete_student))
        .route("/students/:username/attendance", get(handlers_attendance::student_sheet))
        .route("/teachers", get(handlers::list_teachers).post(handlers::create_teacher))
        .route("/teachers/:username", delete(handlers::delete_teacher))
        .route(
            "/teachers/:username/attendance",
            get(handlers_attendance::teacher_sheet).post(handlers_attendance::override_attendance),
        )
        .route(
            "/subjects",
            get(handlers::list_subjects).post(handlers::assign_subject).delete(handlers::delete_subject),
        )
        .layer(cors)
        .with_state(state)
}
