use super::classify::Classification;
use super::config::ImportConfig;
use super::credentials::issue_password;
use super::rows::NormalizedRow;
use super::subjects::{grades_suppressed, match_subject, CatalogSlice, MatchContext, MatchTier, PoolTarget};
use super::RowIssue;
use crate::store::{opt_text, text, Entity, Field, Filter, Record, Repository, StoreError};
use rusqlite::types::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowFailure {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ResolveContext<'c> {
    pub cfg: &'c ImportConfig,
    pub target_semester_id: i64,
    pub target_semester: i64,
    pub current_year: i32,
    pub catalog: &'c CatalogSlice,
    pub now: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOutcome {
    Created { student_id: i64 },
    Existing { student_id: i64 },
    Recorded { student_id: i64, grades: usize },
}

#[derive(Debug)]
pub struct Resolved {
    pub outcome: RowOutcome,
    pub warnings: Vec<RowIssue>,
}

fn int(n: i64) -> Value {
    Value::Integer(n)
}

fn opt_int(n: Option<i64>) -> Value {
    n.map(Value::Integer).unwrap_or(Value::Null)
}

/// Student with this enrollment number, else with this GR number.
pub fn find_student<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
) -> Result<Option<Record>, StoreError> {
    if let Some(e) = row.enrollment_number.as_deref() {
        if let Some(s) = repo.find_one(Entity::Student, &Filter::new().eq("enrollment_no", text(e)))? {
            return Ok(Some(s));
        }
    }
    if let Some(g) = row.gr_number.as_deref() {
        return repo.find_one(Entity::Student, &Filter::new().eq("gr_no", text(g)));
    }
    Ok(None)
}

fn ensure_account<R: Repository + ?Sized>(
    repo: &R,
    ctx: &ResolveContext<'_>,
    username: &str,
    role: &str,
    first_name: Option<&str>,
) -> Result<i64, StoreError> {
    let creds = &ctx.cfg.credentials;
    let issued = issue_password(
        creds.password_policy,
        creds.random_password_length,
        first_name,
        username,
    );
    let account = repo.insert_or_get(
        Entity::Account,
        &[("username", text(username))],
        &[
            ("password_hash", Value::Text(issued.hash)),
            ("role", text(role)),
            ("must_reset", int(issued.must_reset as i64)),
            ("created_at", text(&ctx.now)),
        ],
    )?;
    if account.created {
        tracing::debug!(username, role, "created account");
    }
    Ok(account.id)
}

pub fn resolve_batch<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    ctx: &ResolveContext<'_>,
) -> Result<i64, StoreError> {
    if let Some(id) = row.batch_id {
        if repo.find_one(Entity::Batch, &Filter::new().eq("id", id))?.is_some() {
            return Ok(id);
        }
    }
    let start = row.batch_start_year.unwrap_or(ctx.current_year);
    let end = row
        .batch_end_year
        .unwrap_or(start + ctx.cfg.import.default_batch_span_years);
    let batch = repo.insert_or_get(
        Entity::Batch,
        &[("start_year", int(start as i64)), ("end_year", int(end as i64))],
        &[],
    )?;
    Ok(batch.id)
}

fn resolve_semester<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    ctx: &ResolveContext<'_>,
    warnings: &mut Vec<RowIssue>,
) -> Result<i64, StoreError> {
    let Some(n) = row.semester else {
        return Ok(ctx.target_semester_id);
    };
    match repo.find_one(Entity::Semester, &Filter::new().eq("number", n))? {
        Some(s) => Ok(s.id),
        None => {
            warnings.push(RowIssue::new(
                row.source_row,
                "unknown_semester",
                format!("semester {} not found; using import target", n),
            ));
            Ok(ctx.target_semester_id)
        }
    }
}

fn resolve_mentor<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    warnings: &mut Vec<RowIssue>,
) -> Result<Option<i64>, StoreError> {
    let Some(code) = row.mentor_code.as_deref() else {
        return Ok(None);
    };
    let found = repo.find_one(Entity::Faculty, &Filter::new().eq("code", text(code)))?;
    if found.is_none() {
        warnings.push(RowIssue::new(
            row.source_row,
            "unmatched_mentor",
            format!("mentor code {} not found", code),
        ));
    }
    Ok(found.map(|f| f.id))
}

fn resolve_class<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    semester_id: i64,
    batch_id: i64,
    warnings: &mut Vec<RowIssue>,
) -> Result<Option<i64>, StoreError> {
    let Some(name) = row.class_name.as_deref() else {
        return Ok(None);
    };
    let mentor = resolve_mentor(repo, row, warnings)?;
    let class = repo.insert_or_get(
        Entity::ClassSection,
        &[
            ("name", text(name)),
            ("semester_id", int(semester_id)),
            ("batch_id", int(batch_id)),
            ("section", text(row.section.as_deref().unwrap_or(""))),
        ],
        &[("mentor_id", opt_int(mentor))],
    )?;
    if let (false, Some(mentor_id)) = (class.created, mentor) {
        let existing = repo.find_one(Entity::ClassSection, &Filter::new().eq("id", class.id))?;
        if existing.is_some_and(|c| c.get_i64("mentor_id").is_none()) {
            repo.update(Entity::ClassSection, class.id, &[("mentor_id", int(mentor_id))])?;
        }
    }
    Ok(Some(class.id))
}

fn has_address(row: &NormalizedRow) -> bool {
    row.address.is_some() || row.city.is_some() || row.state.is_some() || row.pincode.is_some()
}

fn upsert_address<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    account_id: i64,
) -> Result<Option<i64>, StoreError> {
    if !has_address(row) {
        return Ok(None);
    }
    let fields: Vec<Field> = vec![
        ("line", opt_text(row.address.as_deref())),
        ("city", opt_text(row.city.as_deref())),
        ("state", opt_text(row.state.as_deref())),
        ("pincode", opt_text(row.pincode.as_deref())),
    ];
    Ok(Some(repo.upsert(Entity::Address, &[("account_id", int(account_id))], &fields)?.id))
}

fn upsert_hostel<R: Repository + ?Sized>(
    repo: &R,
    row: &NormalizedRow,
    student_id: i64,
) -> Result<(), StoreError> {
    if row.hostel_building.is_none() && row.hostel_room.is_none() {
        return Ok(());
    }
    repo.upsert(
        Entity::Hostel,
        &[("student_id", int(student_id))],
        &[
            ("building", opt_text(row.hostel_building.as_deref())),
            ("room", opt_text(row.hostel_room.as_deref())),
        ],
    )?;
    Ok(())
}

pub fn resolve_roster_row<R: Repository + ?Sized>(
    repo: &R,
    ctx: &ResolveContext<'_>,
    row: &NormalizedRow,
) -> Result<Resolved, RowFailure> {
    let mut warnings = Vec::new();
    let Some(key) = row.identity_key() else {
        return Err(RowFailure::Rejected("row has no enrollment or GR number".to_string()));
    };

    if let Some(existing) = find_student(repo, row)? {
        let Some(account_id) = existing.get_i64("account_id") else {
            return Err(RowFailure::Rejected(format!("student {} has no account", existing.id)));
        };
        if let Some(address_id) = upsert_address(repo, row, account_id)? {
            if existing.get_i64("address_id").is_none() {
                repo.update(Entity::Student, existing.id, &[("address_id", int(address_id))])?;
            }
        }
        upsert_hostel(repo, row, existing.id)?;
        warnings.push(RowIssue::new(
            row.source_row,
            "already_exists",
            "student already exists, skipped create",
        ));
        return Ok(Resolved {
            outcome: RowOutcome::Existing {
                student_id: existing.id,
            },
            warnings,
        });
    }

    let Some(first_name) = row.first_name.as_deref() else {
        return Err(RowFailure::Rejected("student name is required".to_string()));
    };
    let account_id = ensure_account(repo, ctx, key, "student", Some(first_name))?;
    let guardian_username = format!("{}{}", ctx.cfg.credentials.guardian_username_prefix, key);
    let guardian_account_id = ensure_account(
        repo,
        ctx,
        &guardian_username,
        "guardian",
        row.guardian_name.as_deref(),
    )?;
    let guardian = repo.insert_or_get(
        Entity::Guardian,
        &[("student_account_id", int(account_id))],
        &[
            ("guardian_account_id", int(guardian_account_id)),
            ("name", opt_text(row.guardian_name.as_deref())),
            ("phone", opt_text(row.guardian_phone.as_deref())),
            ("email", opt_text(row.guardian_email.as_deref())),
        ],
    )?;

    let batch_id = resolve_batch(repo, row, ctx)?;
    let semester_id = resolve_semester(repo, row, ctx, &mut warnings)?;
    let class_id = resolve_class(repo, row, semester_id, batch_id, &mut warnings)?;
    let address_id = upsert_address(repo, row, account_id)?;

    let classification = row.classification.unwrap_or(Classification::Unknown);
    let student_id = repo.create(
        Entity::Student,
        &[
            ("enrollment_no", opt_text(row.enrollment_number.as_deref())),
            ("gr_no", opt_text(row.gr_number.as_deref())),
            ("first_name", text(first_name)),
            ("middle_name", opt_text(row.middle_name.as_deref())),
            ("last_name", opt_text(row.last_name.as_deref())),
            ("email", opt_text(row.email.as_deref())),
            ("phone", opt_text(row.phone.as_deref())),
            ("gender", opt_text(row.gender.as_deref())),
            ("dob", opt_text(row.dob.as_deref())),
            ("stream", opt_text(row.stream.as_deref())),
            ("classification", text(classification.as_str())),
            ("account_id", int(account_id)),
            ("guardian_id", int(guardian.id)),
            ("address_id", opt_int(address_id)),
            ("class_id", opt_int(class_id)),
            ("batch_id", int(batch_id)),
            ("semester_id", int(semester_id)),
            ("created_at", text(&ctx.now)),
        ],
    )?;
    upsert_hostel(repo, row, student_id)?;

    Ok(Resolved {
        outcome: RowOutcome::Created { student_id },
        warnings,
    })
}

pub fn resolve_result_row<R: Repository + ?Sized>(
    repo: &R,
    ctx: &ResolveContext<'_>,
    row: &NormalizedRow,
) -> Result<Resolved, RowFailure> {
    let mut warnings = Vec::new();
    let Some(student) = find_student(repo, row)? else {
        return Err(RowFailure::Rejected(format!(
            "student not found for {} ({})",
            row.identity_key().unwrap_or("row"),
            row.display_name()
        )));
    };

    if let Some(n) = row.semester.filter(|n| *n != ctx.target_semester) {
        warnings.push(RowIssue::new(
            row.source_row,
            "semester_mismatch",
            format!("row says semester {}, importing into semester {}", n, ctx.target_semester),
        ));
    }

    let has_row_batch = row.batch_id.is_some() || row.batch_start_year.is_some();
    let batch_id = match student.get_i64("batch_id") {
        Some(id) if !has_row_batch => id,
        _ => resolve_batch(repo, row, ctx)?,
    };

    let classification = row.classification.unwrap_or(Classification::Unknown);
    let threshold = ctx.cfg.subjects.d2d_grade_threshold_semester;
    let mut grades = 0usize;
    if !grades_suppressed(classification, ctx.target_semester, threshold) {
        let stream = row.stream.as_deref().or(student.get_str("stream"));
        let match_ctx = MatchContext {
            target_semester: ctx.target_semester,
            batch_id: Some(batch_id),
            pool: ctx.cfg.subjects.pool_for_stream(stream).map(PoolTarget::from),
        };
        for (code, grade) in &row.grades {
            let Some((entry, tier)) = match_subject(ctx.catalog, code, &match_ctx) else {
                warnings.push(RowIssue::new(
                    row.source_row,
                    "unmatched_subject",
                    format!("subject {} is not in the catalog", code),
                ));
                continue;
            };
            if tier == MatchTier::Fallback {
                tracing::warn!(
                    row = row.source_row,
                    subject = %code,
                    semester = entry.semester,
                    subject_type = %entry.subject_type,
                    "low-confidence subject match outside target semester"
                );
                warnings.push(RowIssue::new(
                    row.source_row,
                    "low_confidence_subject",
                    format!("subject {} matched semester {} entry", code, entry.semester),
                ));
            }
            repo.create(
                Entity::SubjectGrade,
                &[
                    ("student_id", int(student.id)),
                    ("subject_id", int(entry.id)),
                    ("grade", text(grade)),
                    ("created_at", text(&ctx.now)),
                ],
            )?;
            grades += 1;
        }
    }

    repo.upsert(
        Entity::ResultSemester,
        &[
            ("student_id", int(student.id)),
            ("semester_id", int(ctx.target_semester_id)),
            ("batch_id", int(batch_id)),
        ],
        &[
            ("backlogs", opt_int(row.backlogs)),
            ("sgpa", row.sgpa.map(Value::Real).unwrap_or(Value::Null)),
            ("cgpa", row.cgpa.map(Value::Real).unwrap_or(Value::Null)),
            ("result", opt_text(row.result.as_deref())),
            ("updated_at", text(&ctx.now)),
        ],
    )?;

    Ok(Resolved {
        outcome: RowOutcome::Recorded {
            student_id: student.id,
            grades,
        },
        warnings,
    })
}
