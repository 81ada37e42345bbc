pub mod handlers;
pub mod handlers_attendance;
pub mod routes;
