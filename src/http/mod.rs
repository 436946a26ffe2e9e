//! Public HTTP surface.
//!
//! Routes: `POST /request` (dispatch one), `POST /broadcast`
//! (administrative fan-out), `GET /health`, `GET /metrics`, `GET /servers`,
//! and the admin registration pair `POST /servers` / `DELETE /servers/{id}`.

pub mod handlers;
pub mod server;

pub use server::{AppState, HttpServer};
