use crate::ingest::commit::commit_batch;
use crate::ingest::config;
use crate::ingest::grid::load_grid;
use crate::ingest::preview::PreviewError;
use crate::ingest::{self, ImportError, ImportKind};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use chrono::{Datelike, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_PREVIEW_LIMIT: usize = 50;
const MAX_PREVIEW_LIMIT: usize = 500;

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an integer", key)))
}

fn get_opt_usize(params: &Value, key: &str, default: usize) -> Result<usize, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a non-negative integer", key))),
    }
}

fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn preview_err(e: PreviewError) -> HandlerErr {
    match e {
        PreviewError::NotStaged => HandlerErr::new("no_staged_import", e.to_string()),
        PreviewError::InvalidState(_) => HandlerErr::new("invalid_state", e.to_string()),
    }
}

fn import_err(e: ImportError, in_path: &str) -> HandlerErr {
    match e {
        ImportError::Store(store) => HandlerErr::new("db_query_failed", store.to_string()),
        other => HandlerErr::new("parse_failed", other.to_string())
            .with_details(json!({ "path": in_path })),
    }
}

fn current_year() -> i32 {
    Utc::now().year()
}

fn stage(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = get_required_str(&req.params, "sessionId")?;
    let kind_raw = get_required_str(&req.params, "kind")?;
    let Some(kind) = ImportKind::parse(&kind_raw) else {
        return Err(HandlerErr::new("bad_params", "kind must be roster or results"));
    };
    let in_path = get_required_str(&req.params, "inPath")?;
    let target_semester_id = get_required_i64(&req.params, "targetSemesterId")?;

    let conn = require_db(state)?;
    let cfg = config::load(conn);
    let grid = load_grid(Path::new(&in_path)).map_err(|e| {
        import_err(ImportError::Decode(format!("{:#}", e)), &in_path)
    })?;
    let store = SqliteStore::new(conn);
    let batch = ingest::stage(
        &store,
        &grid,
        kind,
        target_semester_id,
        &cfg.import,
        current_year(),
    )
    .map_err(|e| import_err(e, &in_path))?;

    let mut classes = BTreeMap::<&str, usize>::new();
    for row in &batch.rows {
        if let Some(c) = row.classification {
            *classes.entry(c.as_str()).or_default() += 1;
        }
    }
    let message = if batch.positional {
        format!("{} rows parsed using positional columns", batch.rows.len())
    } else {
        format!("{} rows parsed", batch.rows.len())
    };
    let result = json!({
        "status": "parsed",
        "message": message,
        "kind": kind.as_str(),
        "previewRowCount": batch.rows.len(),
        "headerRow": batch.header_row,
        "headerDetected": batch.header_detected,
        "positionalColumns": batch.positional,
        "skippedBlankRows": batch.skipped_blank,
        "classifications": classes,
        "warnings": batch.warnings,
    });
    tracing::info!(
        session = %session,
        kind = kind.as_str(),
        rows = batch.rows.len(),
        path = %in_path,
        "import staged"
    );

    let ttl = cfg.import.preview_ttl_seconds;
    state
        .preview
        .stage(&session, batch, ttl, Utc::now())
        .map_err(preview_err)?;
    Ok(result)
}

fn preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = get_required_str(&req.params, "sessionId")?;
    let offset = get_opt_usize(&req.params, "offset", 0)?;
    let limit = get_opt_usize(&req.params, "limit", DEFAULT_PREVIEW_LIMIT)?.min(MAX_PREVIEW_LIMIT);
    let staged = state.preview.get(&session, Utc::now()).map_err(preview_err)?;
    let rows = staged
        .batch
        .rows
        .iter()
        .skip(offset)
        .take(limit)
        .collect::<Vec<_>>();
    Ok(json!({
        "status": staged.state.as_str(),
        "kind": staged.batch.kind.as_str(),
        "total": staged.batch.rows.len(),
        "offset": offset,
        "limit": limit,
        "rows": rows,
        "expiresAt": staged.expires_at.to_rfc3339(),
    }))
}

fn commit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = get_required_str(&req.params, "sessionId")?;
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let batch = state
        .preview
        .begin_commit(&session, Utc::now())
        .map_err(preview_err)?;
    let cfg = config::load(conn);
    let store = SqliteStore::new(conn);

    match commit_batch(&store, &batch, &cfg, current_year()) {
        Ok(report) => {
            let status = state.preview.complete(&session);
            let mut result = serde_json::to_value(&report)
                .map_err(|e| HandlerErr::new("commit_failed", e.to_string()))?;
            result["status"] = json!(status.as_str());
            Ok(result)
        }
        Err(e) => {
            tracing::error!(session = %session, error = %e, "import commit rolled back");
            state.preview.fail(&session, e.to_string());
            Err(HandlerErr::new("commit_failed", e.to_string())
                .with_details(json!({ "rolledBack": true })))
        }
    }
}

fn discard(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = get_required_str(&req.params, "sessionId")?;
    let status = state
        .preview
        .discard(&session, Utc::now())
        .map_err(preview_err)?;
    tracing::info!(session = %session, "staged import discarded");
    Ok(json!({ "status": status.as_str() }))
}

fn status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = get_required_str(&req.params, "sessionId")?;
    let staged = state.preview.get(&session, Utc::now()).map_err(preview_err)?;
    Ok(json!({
        "status": staged.state.as_str(),
        "kind": staged.batch.kind.as_str(),
        "rowCount": staged.batch.rows.len(),
        "stagedAt": staged.staged_at.to_rfc3339(),
        "expiresAt": staged.expires_at.to_rfc3339(),
        "lastError": staged.last_error,
    }))
}

fn respond(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut AppState, &Request) -> Result<Value, HandlerErr>,
) -> Value {
    match f(state, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "imports.stage" => Some(respond(state, req, stage)),
        "imports.preview" => Some(respond(state, req, preview)),
        "imports.commit" => Some(respond(state, req, commit)),
        "imports.discard" => Some(respond(state, req, discard)),
        "imports.status" => Some(respond(state, req, status)),
        _ => None,
    }
}
