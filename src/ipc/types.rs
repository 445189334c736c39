use std::path::PathBuf;

use crate::ingest::preview::PreviewStore;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub preview: PreviewStore,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            preview: PreviewStore::new(),
        }
    }
}
