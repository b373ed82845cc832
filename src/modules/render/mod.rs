use axum::Router;
use axum::routing::post;
use crate::state::AppState;

pub mod archive;
pub mod dto;
pub mod error;
pub mod handler;
pub mod model;
pub mod params;
pub mod sequence;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new().route("/render", post(handler::render))
}
