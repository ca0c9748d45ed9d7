//! Processor observability and control.

use super::AppState;
use crate::processor::ProcessorStatus;
use axum::{extract::State, Json};

pub async fn status(State(state): State<AppState>) -> Json<ProcessorStatus> {
    Json(state.processor.status())
}

pub async fn start(State(state): State<AppState>) -> Json<ProcessorStatus> {
    state.processor.start();
    Json(state.processor.status())
}

pub async fn stop(State(state): State<AppState>) -> Json<ProcessorStatus> {
    state.processor.stop();
    Json(state.processor.status())
}
