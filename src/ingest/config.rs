use super::credentials::PasswordPolicy;
use crate::db;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const IMPORT_KEY: &str = "setup.import";
pub const CREDENTIALS_KEY: &str = "setup.credentials";
pub const SUBJECTS_KEY: &str = "setup.subjects";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportSection {
    pub header_scan_rows: usize,
    pub min_header_cells: usize,
    pub default_batch_span_years: i32,
    pub preview_ttl_seconds: i64,
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            header_scan_rows: 5,
            min_header_cells: 3,
            default_batch_span_years: 4,
            preview_ttl_seconds: 1800,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CredentialsSection {
    pub password_policy: PasswordPolicy,
    pub guardian_username_prefix: String,
    pub random_password_length: usize,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            password_policy: PasswordPolicy::Random,
            guardian_username_prefix: "P".to_string(),
            random_password_length: 12,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrossListedPool {
    pub stream: String,
    pub semester: i64,
    #[serde(default)]
    pub batch_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SubjectsSection {
    pub d2d_grade_threshold_semester: i64,
    pub cross_listed_pools: Vec<CrossListedPool>,
}

impl Default for SubjectsSection {
    fn default() -> Self {
        Self {
            d2d_grade_threshold_semester: 3,
            cross_listed_pools: Vec::new(),
        }
    }
}

impl ImportSection {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=50).contains(&self.header_scan_rows) {
            return Err("headerScanRows must be between 1 and 50".to_string());
        }
        if !(1..=20).contains(&self.min_header_cells) {
            return Err("minHeaderCells must be between 1 and 20".to_string());
        }
        if !(1..=8).contains(&self.default_batch_span_years) {
            return Err("defaultBatchSpanYears must be between 1 and 8".to_string());
        }
        if !(60..=86_400).contains(&self.preview_ttl_seconds) {
            return Err("previewTtlSeconds must be between 60 and 86400".to_string());
        }
        Ok(())
    }
}

impl CredentialsSection {
    pub fn validate(&self) -> Result<(), String> {
        let p = &self.guardian_username_prefix;
        if p.is_empty() || p.len() > 8 || !p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err("guardianUsernamePrefix must be 1-8 letters, digits or '_'".to_string());
        }
        if !(8..=64).contains(&self.random_password_length) {
            return Err("randomPasswordLength must be between 8 and 64".to_string());
        }
        Ok(())
    }
}

impl SubjectsSection {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=12).contains(&self.d2d_grade_threshold_semester) {
            return Err("d2dGradeThresholdSemester must be between 1 and 12".to_string());
        }
        for pool in &self.cross_listed_pools {
            if pool.stream.trim().is_empty() {
                return Err("crossListedPools[].stream must not be empty".to_string());
            }
            if !(1..=12).contains(&pool.semester) {
                return Err("crossListedPools[].semester must be between 1 and 12".to_string());
            }
        }
        Ok(())
    }

    pub fn pool_for_stream(&self, stream: Option<&str>) -> Option<&CrossListedPool> {
        let stream = stream?.trim();
        self.cross_listed_pools
            .iter()
            .find(|p| p.stream.trim().eq_ignore_ascii_case(stream))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportConfig {
    pub import: ImportSection,
    pub credentials: CredentialsSection,
    pub subjects: SubjectsSection,
}

fn load_section<T: DeserializeOwned + Default>(
    conn: &Connection,
    key: &str,
    validate: fn(&T) -> Result<(), String>,
) -> T {
    let saved = match db::settings_get_json(conn, key) {
        Ok(Some(v)) => v,
        Ok(None) => return T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "settings read failed; using defaults");
            return T::default();
        }
    };
    let section = match serde_json::from_value::<T>(saved) {
        Ok(section) => section,
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring malformed settings section");
            return T::default();
        }
    };
    match validate(&section) {
        Ok(()) => section,
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring out-of-range settings section");
            T::default()
        }
    }
}

pub fn load(conn: &Connection) -> ImportConfig {
    ImportConfig {
        import: load_section(conn, IMPORT_KEY, ImportSection::validate),
        credentials: load_section(conn, CREDENTIALS_KEY, CredentialsSection::validate),
        subjects: load_section(conn, SUBJECTS_KEY, SubjectsSection::validate),
    }
}
