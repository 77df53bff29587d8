//! Import history: GET /imports, GET /imports/:id

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::{
    db::import_logs::{self, RECENT_IMPORTS_LIMIT},
    error::ApiResult,
    models::ImportLog,
    AppState,
};

/// GET /imports
///
/// Most recent import logs, newest first.
pub async fn list_imports(State(state): State<AppState>) -> ApiResult<Json<Vec<ImportLog>>> {
    let logs = import_logs::recent_import_logs(&state.db, RECENT_IMPORTS_LIMIT).await?;
    Ok(Json(logs))
}

/// GET /imports/:id
pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ImportLog>> {
    let log = import_logs::load_import_log(&state.db, &id).await?;
    Ok(Json(log))
}

/// Build import history routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/imports", get(list_imports))
        .route("/imports/:id", get(get_import))
}
