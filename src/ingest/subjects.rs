use super::classify::Classification;
use super::config::CrossListedPool;
use crate::store::{Entity, Filter, Repository, StoreError};
use rusqlite::types::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub id: i64,
    pub subject_code: String,
    pub semester: i64,
    pub batch_id: i64,
    pub subject_type: String,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogSlice {
    by_code: HashMap<String, Vec<CatalogEntry>>,
}

impl CatalogSlice {
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut by_code: HashMap<String, Vec<CatalogEntry>> = HashMap::new();
        for e in entries {
            by_code.entry(e.subject_code.clone()).or_default().push(e);
        }
        Self { by_code }
    }

    /// One bulk query for every code the batch mentions.
    pub fn load<R: Repository + ?Sized>(repo: &R, codes: &[String]) -> Result<Self, StoreError> {
        let semesters = repo
            .find_all(Entity::Semester, &Filter::new())?
            .into_iter()
            .filter_map(|r| Some((r.id, r.get_i64("number")?)))
            .collect::<HashMap<_, _>>();
        let wanted = codes
            .iter()
            .map(|c| Value::Text(c.clone()))
            .collect::<Vec<_>>();
        let rows = repo.find_all(Entity::Subject, &Filter::new().any_of("subject_code", wanted))?;
        let entries = rows.into_iter().filter_map(|r| {
            Some(CatalogEntry {
                id: r.id,
                subject_code: r.get_str("subject_code")?.to_string(),
                semester: *semesters.get(&r.get_i64("semester_id")?)?,
                batch_id: r.get_i64("batch_id")?,
                subject_type: r.get_str("subject_type").unwrap_or("CORE").to_string(),
            })
        });
        Ok(Self::from_entries(entries))
    }

    pub fn entries(&self, code: &str) -> &[CatalogEntry] {
        self.by_code.get(code).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolTarget {
    pub semester: i64,
    pub batch_id: Option<i64>,
}

impl From<&CrossListedPool> for PoolTarget {
    fn from(p: &CrossListedPool) -> Self {
        Self {
            semester: p.semester,
            batch_id: p.batch_id,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MatchContext {
    pub target_semester: i64,
    pub batch_id: Option<i64>,
    pub pool: Option<PoolTarget>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchTier {
    StreamPool,
    ExactSemester,
    Fallback,
}

pub type Strategy = for<'a> fn(&'a [CatalogEntry], &MatchContext) -> Option<&'a CatalogEntry>;

pub const STRATEGIES: &[(MatchTier, Strategy)] = &[
    (MatchTier::StreamPool, stream_pool),
    (MatchTier::ExactSemester, exact_semester),
    (MatchTier::Fallback, any_semester),
];

// Same batch first, then lowest semester, then lowest id: independent of
// the order rows were loaded in.
fn pick<'a>(
    candidates: impl Iterator<Item = &'a CatalogEntry>,
    ctx: &MatchContext,
) -> Option<&'a CatalogEntry> {
    candidates.min_by_key(|e| (Some(e.batch_id) != ctx.batch_id, e.semester, e.id))
}

pub fn stream_pool<'a>(entries: &'a [CatalogEntry], ctx: &MatchContext) -> Option<&'a CatalogEntry> {
    let pool = ctx.pool?;
    pick(
        entries.iter().filter(|e| {
            e.semester == pool.semester && pool.batch_id.map_or(true, |b| e.batch_id == b)
        }),
        ctx,
    )
}

pub fn exact_semester<'a>(entries: &'a [CatalogEntry], ctx: &MatchContext) -> Option<&'a CatalogEntry> {
    pick(entries.iter().filter(|e| e.semester == ctx.target_semester), ctx)
}

pub fn any_semester<'a>(entries: &'a [CatalogEntry], ctx: &MatchContext) -> Option<&'a CatalogEntry> {
    pick(entries.iter(), ctx)
}

pub fn match_subject<'a>(
    slice: &'a CatalogSlice,
    code: &str,
    ctx: &MatchContext,
) -> Option<(&'a CatalogEntry, MatchTier)> {
    let entries = slice.entries(code);
    if entries.is_empty() {
        return None;
    }
    STRATEGIES
        .iter()
        .find_map(|(tier, strategy)| strategy(entries, ctx).map(|e| (e, *tier)))
}

/// D2D students have no subject-level grades below the threshold semester;
/// only the semester aggregate is recorded for them.
pub fn grades_suppressed(classification: Classification, target_semester: i64, threshold: i64) -> bool {
    classification == Classification::D2d && target_semester < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::{text, SqliteStore};
    use rusqlite::Connection;

    fn entry(id: i64, code: &str, semester: i64, batch_id: i64) -> CatalogEntry {
        CatalogEntry {
            id,
            subject_code: code.to_string(),
            semester,
            batch_id,
            subject_type: "CORE".to_string(),
        }
    }

    fn ctx(target: i64, batch: Option<i64>, pool: Option<PoolTarget>) -> MatchContext {
        MatchContext {
            target_semester: target,
            batch_id: batch,
            pool,
        }
    }

    const POOL: PoolTarget = PoolTarget {
        semester: 5,
        batch_id: Some(9),
    };

    #[test]
    fn pool_entry_wins_for_eligible_stream_in_either_insertion_order() {
        let exact = entry(1, "DBMS101", 3, 1);
        let pooled = entry(2, "DBMS101", 5, 9);
        for entries in [
            vec![exact.clone(), pooled.clone()],
            vec![pooled.clone(), exact.clone()],
        ] {
            let slice = CatalogSlice::from_entries(entries);
            let (hit, tier) = match_subject(&slice, "DBMS101", &ctx(3, Some(1), Some(POOL))).expect("match");
            assert_eq!(hit.id, 2);
            assert_eq!(tier, MatchTier::StreamPool);
        }
    }

    #[test]
    fn exact_semester_wins_without_pool_eligibility_in_either_order() {
        let exact = entry(1, "DBMS101", 3, 1);
        let pooled = entry(2, "DBMS101", 5, 9);
        for entries in [
            vec![exact.clone(), pooled.clone()],
            vec![pooled.clone(), exact.clone()],
        ] {
            let slice = CatalogSlice::from_entries(entries);
            let (hit, tier) = match_subject(&slice, "DBMS101", &ctx(3, Some(1), None)).expect("match");
            assert_eq!(hit.id, 1);
            assert_eq!(tier, MatchTier::ExactSemester);
        }
    }

    #[test]
    fn eligible_student_falls_through_to_exact_when_pool_lacks_the_code() {
        let slice = CatalogSlice::from_entries(vec![entry(1, "OS102", 3, 1)]);
        let (hit, tier) = match_subject(&slice, "OS102", &ctx(3, Some(1), Some(POOL))).expect("match");
        assert_eq!(hit.id, 1);
        assert_eq!(tier, MatchTier::ExactSemester);
    }

    #[test]
    fn fallback_takes_lowest_semester_when_nothing_else_matches() {
        let slice = CatalogSlice::from_entries(vec![entry(7, "CN103", 6, 1), entry(4, "CN103", 4, 1)]);
        let (hit, tier) = match_subject(&slice, "CN103", &ctx(3, Some(1), None)).expect("match");
        assert_eq!(hit.id, 4);
        assert_eq!(tier, MatchTier::Fallback);
    }

    #[test]
    fn same_batch_is_preferred_within_a_tier() {
        let slice = CatalogSlice::from_entries(vec![entry(1, "DBMS101", 3, 1), entry(2, "DBMS101", 3, 2)]);
        let (hit, _) = match_subject(&slice, "DBMS101", &ctx(3, Some(2), None)).expect("match");
        assert_eq!(hit.id, 2);
        let (hit, _) = match_subject(&slice, "DBMS101", &ctx(3, None, None)).expect("match");
        assert_eq!(hit.id, 1);
    }

    #[test]
    fn unknown_codes_do_not_match() {
        let slice = CatalogSlice::from_entries(vec![entry(1, "DBMS101", 3, 1)]);
        assert!(match_subject(&slice, "AI999", &ctx(3, None, None)).is_none());
    }

    #[test]
    fn d2d_suppression_only_below_threshold() {
        assert!(grades_suppressed(Classification::D2d, 2, 3));
        assert!(!grades_suppressed(Classification::D2d, 3, 3));
        assert!(!grades_suppressed(Classification::Regular, 1, 3));
        assert!(!grades_suppressed(Classification::Unknown, 2, 3));
    }

    #[test]
    fn load_groups_catalog_rows_by_code() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let store = SqliteStore::new(&conn);
        let batch = store
            .create(Entity::Batch, &[("start_year", 2023_i64.into()), ("end_year", 2027_i64.into())])
            .expect("batch");
        for (code, sem) in [("DBMS101", 3_i64), ("DBMS101", 5), ("OS102", 3), ("AI999", 3)] {
            store
                .create(
                    Entity::Subject,
                    &[
                        ("subject_code", text(code)),
                        ("semester_id", sem.into()),
                        ("batch_id", batch.into()),
                    ],
                )
                .expect("subject");
        }
        let slice = CatalogSlice::load(&store, &["DBMS101".to_string(), "OS102".to_string()]).expect("load");
        assert_eq!(slice.entries("DBMS101").len(), 2);
        assert_eq!(slice.entries("OS102").len(), 1);
        assert!(slice.entries("AI999").is_empty());
        assert_eq!(slice.entries("DBMS101")[1].semester, 5);
    }
}
