use axum::extract::State;
use std::sync::Arc;

use super::AppState;
use crate::error::Result;

pub async fn prometheus(State(state): State<Arc<AppState>>) -> Result<String> {
    state.metrics.render(&state.db, &state.publisher)
}
