pub mod adapters;
pub mod config;
pub mod error;
pub mod jobs;
pub mod web;

pub use web::{build_router, AppState};
