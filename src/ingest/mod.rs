pub mod classify;
pub mod columns;
pub mod commit;
pub mod config;
pub mod credentials;
pub mod grid;
pub mod header;
pub mod preview;
pub mod resolver;
pub mod rows;
pub mod subjects;

use crate::store::{Entity, Filter, Repository, StoreError};
use classify::classify;
use config::ImportSection;
use grid::Grid;
use rows::NormalizedRow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Roster,
    Results,
}

impl ImportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roster" | "students" => Some(Self::Roster),
            "results" | "result" => Some(Self::Results),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Roster => "roster",
            Self::Results => "results",
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("spreadsheet could not be read: {0}")]
    Decode(String),
    #[error("spreadsheet has no rows")]
    Empty,
    #[error("no enrollment or GR number column could be identified")]
    NoIdentityColumn,
    #[error("semester {0} does not exist")]
    UnknownSemester(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row: usize,
    pub code: String,
    pub message: String,
}

impl RowIssue {
    pub fn new(row: usize, code: &str, message: impl Into<String>) -> Self {
        Self {
            row,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StagedBatch {
    pub kind: ImportKind,
    pub target_semester_id: i64,
    pub target_semester: i64,
    pub header_row: usize,
    pub header_detected: bool,
    pub positional: bool,
    pub rows: Vec<NormalizedRow>,
    pub skipped_blank: usize,
    pub warnings: Vec<RowIssue>,
}

/// Resolves the semester the import targets; unknown ids reject the import.
pub fn target_semester<R: Repository + ?Sized>(repo: &R, semester_id: i64) -> Result<i64, ImportError> {
    repo.find_one(Entity::Semester, &Filter::new().eq("id", semester_id))?
        .and_then(|r| r.get_i64("number"))
        .ok_or(ImportError::UnknownSemester(semester_id))
}

pub fn stage<R: Repository + ?Sized>(
    repo: &R,
    grid: &Grid,
    kind: ImportKind,
    target_semester_id: i64,
    cfg: &ImportSection,
    current_year: i32,
) -> Result<StagedBatch, ImportError> {
    if grid.row_count() == 0 || grid.width() == 0 {
        return Err(ImportError::Empty);
    }
    let target = target_semester(repo, target_semester_id)?;
    let header = header::locate_header(grid, cfg.header_scan_rows, cfg.min_header_cells);
    let columns = columns::map_columns(&header, grid.width(), kind)?;
    let mut parsed = rows::parse_rows(grid, header.index, &columns);
    classify_rows(repo, &mut parsed.rows, current_year)?;

    if columns.positional {
        tracing::info!(kind = kind.as_str(), "no identity headers found; using positional columns");
    }

    Ok(StagedBatch {
        kind,
        target_semester_id,
        target_semester: target,
        header_row: header.index,
        header_detected: header.detected,
        positional: columns.positional,
        rows: parsed.rows,
        skipped_blank: parsed.skipped_blank,
        warnings: parsed.warnings,
    })
}

/// Cohort start year for a row: its batch years, its batch id, the batch of
/// an already stored student with the same identity, else `current_year`.
pub fn cohort_start_year<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    current_year: i32,
) -> Result<i32, StoreError> {
    if let Some(start) = row.batch_start_year {
        return Ok(start);
    }
    let mut batch_id = row.batch_id;
    if batch_id.is_none() {
        batch_id = resolver::find_student(repo, row)?.and_then(|s| s.get_i64("batch_id"));
    }
    if let Some(id) = batch_id {
        if let Some(b) = repo.find_one(Entity::Batch, &Filter::new().eq("id", id))? {
            if let Some(start) = b.get_i64("start_year") {
                return Ok(start as i32);
            }
        }
    }
    Ok(current_year)
}

pub fn classify_rows<R: Repository + ?Sized>(
    repo: &R,
    rows: &mut [NormalizedRow],
    current_year: i32,
) -> Result<(), StoreError> {
    for row in rows.iter_mut() {
        let start = cohort_start_year(repo, row, current_year)?;
        let c = row
            .enrollment_number
            .as_deref()
            .map(|e| classify(e, start))
            .unwrap_or(classify::Classification::Unknown);
        row.classification = Some(c);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ingest::classify::Classification;
    use crate::store::SqliteStore;
    use rusqlite::Connection;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn stage_classifies_against_row_batch_or_current_year() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let store = SqliteStore::new(&conn);
        let g = grid(&[
            &[],
            &["GR No", "Name", "Enrollment No", "Batch"],
            &["1", "Riya Shah", "E23001", "2023-2027"],
            &["2", "Amit Patel", "E23002", "2022-2026"],
            &["3", "Dev Joshi", "E57003", ""],
            &["4", "Meera Rao", "E25004", ""],
        ]);
        let staged = stage(&store, &g, ImportKind::Roster, 3, &ImportSection::default(), 2025)
            .expect("stage");
        assert_eq!(staged.header_row, 2);
        assert_eq!(staged.target_semester, 3);
        let classes = staged
            .rows
            .iter()
            .map(|r| r.classification)
            .collect::<Vec<_>>();
        assert_eq!(
            classes,
            vec![
                Some(Classification::Regular),
                Some(Classification::D2d),
                Some(Classification::Unknown),
                Some(Classification::Regular),
            ]
        );
    }

    #[test]
    fn stage_rejects_unknown_semester_and_empty_grid() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let store = SqliteStore::new(&conn);
        let g = grid(&[&["GR", "Name", "Enrollment"], &["1", "A B", "E23001"]]);
        let e = stage(&store, &g, ImportKind::Roster, 99, &ImportSection::default(), 2025)
            .expect_err("unknown semester");
        assert!(matches!(e, ImportError::UnknownSemester(99)));
        let e = stage(&store, &Grid::default(), ImportKind::Roster, 1, &ImportSection::default(), 2025)
            .expect_err("empty");
        assert!(matches!(e, ImportError::Empty));
    }
}
