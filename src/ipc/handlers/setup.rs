use crate::db;
use crate::ingest::config::{
    CredentialsSection, ImportSection, SubjectsSection, CREDENTIALS_KEY, IMPORT_KEY, SUBJECTS_KEY,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Import,
    Credentials,
    Subjects,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "credentials" => Some(Self::Credentials),
            "subjects" => Some(Self::Subjects),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Import => IMPORT_KEY,
            Self::Credentials => CREDENTIALS_KEY,
            Self::Subjects => SUBJECTS_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> anyhow::Result<Value> {
    Ok(match section {
        SetupSection::Import => serde_json::to_value(ImportSection::default())?,
        SetupSection::Credentials => serde_json::to_value(CredentialsSection::default())?,
        SetupSection::Subjects => serde_json::to_value(SubjectsSection::default())?,
    })
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

// Typed round-trip: unknown keys and wrong types are rejected by serde,
// ranges by the section's own validation.
fn normalize<T>(value: &Value, validate: fn(&T) -> Result<(), String>) -> Result<Value, String>
where
    T: DeserializeOwned + Serialize,
{
    let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    validate(&typed)?;
    serde_json::to_value(&typed).map_err(|e| e.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        obj.insert(k.clone(), v.clone());
    }
    let normalized = match section {
        SetupSection::Import => normalize::<ImportSection>(current, ImportSection::validate)?,
        SetupSection::Credentials => normalize::<CredentialsSection>(current, CredentialsSection::validate)?,
        SetupSection::Subjects => normalize::<SubjectsSection>(current, SubjectsSection::validate)?,
    };
    *current = normalized;
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section)?;
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok() {
                current = merged;
            }
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut result = Map::new();
    for (name, section) in [
        ("import", SetupSection::Import),
        ("credentials", SetupSection::Credentials),
        ("subjects", SetupSection::Subjects),
    ] {
        match load_section(conn, section) {
            Ok(v) => {
                result.insert(name.to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(result))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section_raw, "setup section updated");
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
