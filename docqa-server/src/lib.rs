//! `docqa-server` exposes the document QA pipeline over HTTP: one route to
//! upload a PDF and a handful of routes that ask questions about it.

pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{HttpSettings, ServerArgs};
pub use server::{ApiError, AppState, app_router, build_pipeline, run_server};
