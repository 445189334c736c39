use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    Account,
    Guardian,
    Address,
    Batch,
    Semester,
    Faculty,
    ClassSection,
    Student,
    Hostel,
    Subject,
    SubjectGrade,
    ResultSemester,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Self::Account => "accounts",
            Self::Guardian => "guardians",
            Self::Address => "addresses",
            Self::Batch => "batches",
            Self::Semester => "semesters",
            Self::Faculty => "faculty",
            Self::ClassSection => "class_sections",
            Self::Student => "students",
            Self::Hostel => "hostel_allocations",
            Self::Subject => "subjects",
            Self::SubjectGrade => "subject_grades",
            Self::ResultSemester => "result_semesters",
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Account => &["id", "username", "password_hash", "role", "must_reset", "created_at"],
            Self::Guardian => &[
                "id",
                "student_account_id",
                "guardian_account_id",
                "name",
                "phone",
                "email",
            ],
            Self::Address => &["id", "account_id", "line", "city", "state", "pincode"],
            Self::Batch => &["id", "start_year", "end_year"],
            Self::Semester => &["id", "number"],
            Self::Faculty => &["id", "code", "name"],
            Self::ClassSection => &["id", "name", "semester_id", "batch_id", "section", "mentor_id"],
            Self::Student => &[
                "id",
                "enrollment_no",
                "gr_no",
                "first_name",
                "middle_name",
                "last_name",
                "email",
                "phone",
                "gender",
                "dob",
                "stream",
                "classification",
                "account_id",
                "guardian_id",
                "address_id",
                "class_id",
                "batch_id",
                "semester_id",
                "created_at",
            ],
            Self::Hostel => &["id", "student_id", "building", "room"],
            Self::Subject => &["id", "subject_code", "name", "semester_id", "batch_id", "subject_type"],
            Self::SubjectGrade => &["id", "student_id", "subject_id", "grade", "created_at"],
            Self::ResultSemester => &[
                "id",
                "student_id",
                "semester_id",
                "batch_id",
                "backlogs",
                "sgpa",
                "cgpa",
                "result",
                "updated_at",
            ],
        }
    }

    fn check_column(self, column: &str) -> Result<(), StoreError> {
        if self.columns().contains(&column) {
            Ok(())
        } else {
            Err(StoreError::Schema(format!(
                "unknown column {}.{}",
                self.table(),
                column
            )))
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("constraint violated on {entity}: {message}")]
    Constraint { entity: &'static str, message: String },
    #[error("{entity} record {id} not found")]
    Missing { entity: &'static str, id: i64 },
    #[error("schema mismatch: {0}")]
    Schema(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Fatal errors abort the whole batch; the rest only fail the current row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Schema(_))
    }
}

fn map_sqlite(entity: Option<Entity>, e: rusqlite::Error) -> StoreError {
    let table = entity.map(Entity::table).unwrap_or("transaction");
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            StoreError::Constraint {
                entity: table,
                message: e.to_string(),
            }
        }
        _ => StoreError::Unavailable(format!("{}: {}", table, e)),
    }
}

pub type Field = (&'static str, Value);

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

#[derive(Clone, Debug, Default)]
pub struct Record {
    pub id: i64,
    values: HashMap<String, Value>,
}

impl Record {
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.values.get(column) {
            Some(Value::Integer(n)) => Some(*n),
            Some(Value::Real(f)) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.values.get(column) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn get_f64(&self, column: &str) -> Option<f64> {
        match self.values.get(column) {
            Some(Value::Real(f)) => Some(*f),
            Some(Value::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
enum Cond {
    Eq(&'static str, Value),
    AnyOf(&'static str, Vec<Value>),
}

#[derive(Clone, Debug, Default)]
pub struct Filter {
    conds: Vec<Cond>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::Eq(column, value.into()));
        self
    }

    pub fn any_of(mut self, column: &'static str, values: Vec<Value>) -> Self {
        self.conds.push(Cond::AnyOf(column, values));
        self
    }

    fn to_sql(&self, entity: Entity) -> Result<(String, Vec<Value>), StoreError> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for c in &self.conds {
            match c {
                Cond::Eq(col, Value::Null) => {
                    entity.check_column(col)?;
                    clauses.push(format!("{} IS NULL", col));
                }
                Cond::Eq(col, v) => {
                    entity.check_column(col)?;
                    clauses.push(format!("{} = ?", col));
                    params.push(v.clone());
                }
                Cond::AnyOf(col, vs) => {
                    entity.check_column(col)?;
                    if vs.is_empty() {
                        clauses.push("0".to_string());
                    } else {
                        let marks = vec!["?"; vs.len()].join(", ");
                        clauses.push(format!("{} IN ({})", col, marks));
                        params.extend(vs.iter().cloned());
                    }
                }
            }
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub created: bool,
}

pub trait Repository {
    fn find_one(&self, entity: Entity, filter: &Filter) -> Result<Option<Record>, StoreError>;
    fn find_all(&self, entity: Entity, filter: &Filter) -> Result<Vec<Record>, StoreError>;
    fn create(&self, entity: Entity, fields: &[Field]) -> Result<i64, StoreError>;
    fn update(&self, entity: Entity, id: i64, fields: &[Field]) -> Result<(), StoreError>;
    /// Inserts unless a row with the same unique `key` exists; never overwrites.
    fn insert_or_get(
        &self,
        entity: Entity,
        key: &[Field],
        fields: &[Field],
    ) -> Result<Upserted, StoreError>;
    /// Inserts, or overwrites `fields` on the row owning the unique `key`.
    fn upsert(&self, entity: Entity, key: &[Field], fields: &[Field])
        -> Result<Upserted, StoreError>;

    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    fn rollback(&self) -> Result<(), StoreError>;
    fn savepoint(&self, name: &str) -> Result<(), StoreError>;
    fn release_savepoint(&self, name: &str) -> Result<(), StoreError>;
    fn rollback_to_savepoint(&self, name: &str) -> Result<(), StoreError>;
}

pub fn run_in_transaction<R, T, E, F>(repo: &R, f: F) -> Result<T, E>
where
    R: Repository + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&R) -> Result<T, E>,
{
    repo.begin()?;
    match f(repo) {
        Ok(v) => {
            if let Err(e) = repo.commit() {
                let _ = repo.rollback();
                return Err(e.into());
            }
            Ok(v)
        }
        Err(e) => {
            if let Err(rb) = repo.rollback() {
                tracing::error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Runs `f` inside a named savepoint; on `Err` its writes are discarded and
/// the enclosing transaction stays usable.
pub fn within_savepoint<R, T, E, F>(repo: &R, name: &str, f: F) -> Result<T, E>
where
    R: Repository + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&R) -> Result<T, E>,
{
    repo.savepoint(name)?;
    match f(repo) {
        Ok(v) => {
            repo.release_savepoint(name)?;
            Ok(v)
        }
        Err(e) => {
            // Best-effort when the store itself is gone; the outer rollback covers it.
            let _ = repo
                .rollback_to_savepoint(name)
                .and_then(|_| repo.release_savepoint(name));
            Err(e)
        }
    }
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn check_fields(entity: Entity, fields: &[Field]) -> Result<(), StoreError> {
        for (col, _) in fields {
            entity.check_column(col)?;
        }
        Ok(())
    }

    fn select(
        &self,
        entity: Entity,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, StoreError> {
        let (where_sql, params) = filter.to_sql(entity)?;
        let mut sql = format!("SELECT * FROM {}{} ORDER BY id", entity.table(), where_sql);
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| map_sqlite(Some(entity), e))?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut rec = Record::default();
                for (i, name) in names.iter().enumerate() {
                    let v: Value = row.get(i)?;
                    if name == "id" {
                        if let Value::Integer(n) = v {
                            rec.id = n;
                        }
                    }
                    rec.values.insert(name.clone(), v);
                }
                Ok(rec)
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| map_sqlite(Some(entity), e))?;
        Ok(rows)
    }

    fn id_by_key(&self, entity: Entity, key: &[Field]) -> Result<i64, StoreError> {
        let filter = key
            .iter()
            .fold(Filter::new(), |f, (col, v)| f.eq(col, v.clone()));
        self.select(entity, &filter, Some(1))?
            .first()
            .map(|r| r.id)
            .ok_or_else(|| StoreError::Constraint {
                entity: entity.table(),
                message: "row vanished after conflicting insert".to_string(),
            })
    }

    fn exec_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| map_sqlite(None, e))
    }
}

fn savepoint_ident(name: &str) -> Result<String, StoreError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name.to_string())
    } else {
        Err(StoreError::Schema(format!("invalid savepoint name: {}", name)))
    }
}

impl Repository for SqliteStore<'_> {
    fn find_one(&self, entity: Entity, filter: &Filter) -> Result<Option<Record>, StoreError> {
        Ok(self.select(entity, filter, Some(1))?.into_iter().next())
    }

    fn find_all(&self, entity: Entity, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.select(entity, filter, None)
    }

    fn create(&self, entity: Entity, fields: &[Field]) -> Result<i64, StoreError> {
        Self::check_fields(entity, fields)?;
        let cols = fields.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let marks = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            entity.table(),
            cols.join(", "),
            marks
        );
        self.conn
            .execute(&sql, params_from_iter(fields.iter().map(|(_, v)| v)))
            .map_err(|e| map_sqlite(Some(entity), e))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, entity: Entity, id: i64, fields: &[Field]) -> Result<(), StoreError> {
        Self::check_fields(entity, fields)?;
        if fields.is_empty() {
            return Ok(());
        }
        let sets = fields
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {} WHERE id = ?", entity.table(), sets);
        let mut params = fields.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();
        params.push(Value::Integer(id));
        let changed = self
            .conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(|e| map_sqlite(Some(entity), e))?;
        if changed == 0 {
            return Err(StoreError::Missing {
                entity: entity.table(),
                id,
            });
        }
        Ok(())
    }

    fn insert_or_get(
        &self,
        entity: Entity,
        key: &[Field],
        fields: &[Field],
    ) -> Result<Upserted, StoreError> {
        Self::check_fields(entity, key)?;
        Self::check_fields(entity, fields)?;
        let all = key.iter().chain(fields.iter()).collect::<Vec<_>>();
        let cols = all.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let marks = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({}) ON CONFLICT DO NOTHING",
            entity.table(),
            cols.join(", "),
            marks
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(all.iter().map(|(_, v)| v)))
            .map_err(|e| map_sqlite(Some(entity), e))?;
        if changed == 1 {
            return Ok(Upserted {
                id: self.conn.last_insert_rowid(),
                created: true,
            });
        }
        Ok(Upserted {
            id: self.id_by_key(entity, key)?,
            created: false,
        })
    }

    fn upsert(
        &self,
        entity: Entity,
        key: &[Field],
        fields: &[Field],
    ) -> Result<Upserted, StoreError> {
        Self::check_fields(entity, key)?;
        Self::check_fields(entity, fields)?;
        let existed = {
            let filter = key
                .iter()
                .fold(Filter::new(), |f, (col, v)| f.eq(col, v.clone()));
            self.find_one(entity, &filter)?.is_some()
        };
        let all = key.iter().chain(fields.iter()).collect::<Vec<_>>();
        let cols = all.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let marks = vec!["?"; cols.len()].join(", ");
        let key_cols = key.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
        let conflict_action = if fields.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let sets = fields
                .iter()
                .map(|(c, _)| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("DO UPDATE SET {}", sets)
        };
        let sql = format!(
            "INSERT INTO {}({}) VALUES({}) ON CONFLICT({}) {}",
            entity.table(),
            cols.join(", "),
            marks,
            key_cols,
            conflict_action
        );
        self.conn
            .execute(&sql, params_from_iter(all.iter().map(|(_, v)| v)))
            .map_err(|e| map_sqlite(Some(entity), e))?;
        Ok(Upserted {
            id: self.id_by_key(entity, key)?,
            created: !existed,
        })
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.exec_batch("BEGIN")
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.exec_batch("COMMIT")
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.exec_batch("ROLLBACK")
    }

    fn savepoint(&self, name: &str) -> Result<(), StoreError> {
        self.exec_batch(&format!("SAVEPOINT {}", savepoint_ident(name)?))
    }

    fn release_savepoint(&self, name: &str) -> Result<(), StoreError> {
        self.exec_batch(&format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?))
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<(), StoreError> {
        self.exec_batch(&format!("ROLLBACK TO SAVEPOINT {}", savepoint_ident(name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn insert_or_get_does_not_duplicate() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let key = [("start_year", Value::Integer(2023)), ("end_year", Value::Integer(2027))];
        let a = store.insert_or_get(Entity::Batch, &key, &[]).expect("first");
        let b = store.insert_or_get(Entity::Batch, &key, &[]).expect("second");
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.id, b.id);
        let all = store.find_all(Entity::Batch, &Filter::new()).expect("all");
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn upsert_overwrites_fields_on_existing_key() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let account = store
            .create(
                Entity::Account,
                &[
                    ("username", text("E23001")),
                    ("password_hash", text("x")),
                    ("role", text("student")),
                ],
            )
            .expect("account");
        let key = [("account_id", Value::Integer(account))];
        let first = store
            .upsert(Entity::Address, &key, &[("city", text("Surat"))])
            .expect("insert");
        let second = store
            .upsert(Entity::Address, &key, &[("city", text("Vadodara"))])
            .expect("update");
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        let rec = store
            .find_one(Entity::Address, &Filter::new().eq("account_id", account))
            .expect("find")
            .expect("some");
        assert_eq!(rec.get_str("city"), Some("Vadodara"));
    }

    #[test]
    fn unknown_column_is_a_schema_error() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let e = store
            .find_one(Entity::Batch, &Filter::new().eq("nope", 1))
            .expect_err("should fail");
        assert!(e.is_fatal());
    }

    #[test]
    fn savepoint_rollback_discards_only_inner_writes() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let r: Result<(), StoreError> = run_in_transaction(&store, |s| {
            s.create(Entity::Faculty, &[("code", text("F1")), ("name", text("A"))])?;
            let inner: Result<(), StoreError> = within_savepoint(s, "row_1", |s| {
                s.create(Entity::Faculty, &[("code", text("F2")), ("name", text("B"))])?;
                s.create(Entity::Faculty, &[("code", text("F1")), ("name", text("dup"))])?;
                Ok(())
            });
            assert!(matches!(inner, Err(StoreError::Constraint { .. })));
            Ok(())
        });
        r.expect("tx");
        let codes = store
            .find_all(Entity::Faculty, &Filter::new())
            .expect("all")
            .iter()
            .filter_map(|r| r.get_str("code").map(|s| s.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(codes, vec!["F1".to_string()]);
    }

    #[test]
    fn failed_transaction_rolls_everything_back() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let r: Result<(), StoreError> = run_in_transaction(&store, |s| {
            s.create(Entity::Faculty, &[("code", text("F1")), ("name", text("A"))])?;
            Err(StoreError::Unavailable("simulated".to_string()))
        });
        assert!(r.is_err());
        let all = store.find_all(Entity::Faculty, &Filter::new()).expect("all");
        assert!(all.is_empty());
    }

    #[test]
    fn any_of_with_empty_list_matches_nothing() {
        let conn = mem();
        let store = SqliteStore::new(&conn);
        let rows = store
            .find_all(Entity::Semester, &Filter::new().any_of("number", Vec::new()))
            .expect("query");
        assert!(rows.is_empty());
        let rows = store
            .find_all(
                Entity::Semester,
                &Filter::new().any_of("number", vec![Value::Integer(2), Value::Integer(3)]),
            )
            .expect("query");
        assert_eq!(rows.len(), 2);
    }
}
