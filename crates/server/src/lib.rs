#[macro_use]
extern crate rocket;

pub mod app;
pub mod args;
pub mod cors;
pub mod error;
pub mod logging;
pub mod routes;
pub mod service;
pub mod state;

pub use app::{build_rocket, upload_limits};
