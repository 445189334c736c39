use super::config::ImportConfig;
use super::resolver::{self, ResolveContext, RowFailure, RowOutcome};
use super::subjects::CatalogSlice;
use super::{ImportKind, RowIssue, StagedBatch};
use crate::store::{run_in_transaction, within_savepoint, Repository, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub inserted_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowIssue>,
}

fn catalog_codes(batch: &StagedBatch) -> Vec<String> {
    batch
        .rows
        .iter()
        .flat_map(|r| r.grades.iter().map(|(code, _)| code.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// One transaction per batch, one savepoint per row. Only fatal store errors abort.
pub fn commit_batch<R: Repository + ?Sized>(
    repo: &R,
    batch: &StagedBatch,
    cfg: &ImportConfig,
    current_year: i32,
) -> Result<CommitReport, StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    run_in_transaction(repo, |repo| {
        let catalog = match batch.kind {
            ImportKind::Results => {
                let codes = catalog_codes(batch);
                let catalog = CatalogSlice::load(repo, &codes)?;
                if catalog.is_empty() && !codes.is_empty() {
                    tracing::warn!(codes = codes.len(), "no catalog subjects match this sheet");
                }
                catalog
            }
            ImportKind::Roster => CatalogSlice::default(),
        };
        let ctx = ResolveContext {
            cfg,
            target_semester_id: batch.target_semester_id,
            target_semester: batch.target_semester,
            current_year,
            catalog: &catalog,
            now: now.clone(),
        };

        let mut report = CommitReport {
            warnings: batch.warnings.clone(),
            ..CommitReport::default()
        };
        for row in &batch.rows {
            let savepoint = format!("row_{}", row.source_row);
            let applied = within_savepoint(repo, &savepoint, |repo| match batch.kind {
                ImportKind::Roster => resolver::resolve_roster_row(repo, &ctx, row),
                ImportKind::Results => resolver::resolve_result_row(repo, &ctx, row),
            });
            match applied {
                Ok(resolved) => {
                    match resolved.outcome {
                        RowOutcome::Existing { student_id } => {
                            tracing::debug!(row = row.source_row, student_id, "student already present");
                            report.skipped_count += 1;
                        }
                        RowOutcome::Created { student_id } => {
                            tracing::debug!(row = row.source_row, student_id, "student created");
                            report.inserted_count += 1;
                        }
                        RowOutcome::Recorded { student_id, grades } => {
                            tracing::debug!(row = row.source_row, student_id, grades, "result recorded");
                            report.inserted_count += 1;
                        }
                    }
                    report.warnings.extend(resolved.warnings);
                }
                Err(RowFailure::Store(e)) if e.is_fatal() => {
                    tracing::error!(row = row.source_row, error = %e, "aborting import batch");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(row = row.source_row, error = %e, "row skipped");
                    report.skipped_count += 1;
                    report.errors.push(RowError {
                        row: row.source_row,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            kind = batch.kind.as_str(),
            inserted = report.inserted_count,
            skipped = report.skipped_count,
            errors = report.errors.len(),
            "import batch committed"
        );
        Ok(report)
    })
}
