use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "roster.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            must_reset INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guardians(
            id INTEGER PRIMARY KEY,
            student_account_id INTEGER NOT NULL UNIQUE,
            guardian_account_id INTEGER NOT NULL,
            name TEXT,
            phone TEXT,
            email TEXT,
            FOREIGN KEY(student_account_id) REFERENCES accounts(id),
            FOREIGN KEY(guardian_account_id) REFERENCES accounts(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS addresses(
            id INTEGER PRIMARY KEY,
            account_id INTEGER NOT NULL UNIQUE,
            line TEXT,
            city TEXT,
            state TEXT,
            pincode TEXT,
            FOREIGN KEY(account_id) REFERENCES accounts(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id INTEGER PRIMARY KEY,
            start_year INTEGER NOT NULL,
            end_year INTEGER NOT NULL,
            UNIQUE(start_year, end_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id INTEGER PRIMARY KEY,
            number INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;
    seed_semesters(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    // section is '' rather than NULL so the unique key holds for unlettered classes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sections(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            semester_id INTEGER NOT NULL,
            batch_id INTEGER NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            mentor_id INTEGER,
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(mentor_id) REFERENCES faculty(id),
            UNIQUE(name, semester_id, batch_id, section)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            enrollment_no TEXT UNIQUE,
            gr_no TEXT UNIQUE,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT,
            email TEXT,
            phone TEXT,
            gender TEXT,
            dob TEXT,
            stream TEXT,
            classification TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            guardian_id INTEGER,
            address_id INTEGER,
            class_id INTEGER,
            batch_id INTEGER,
            semester_id INTEGER,
            created_at TEXT,
            FOREIGN KEY(account_id) REFERENCES accounts(id),
            FOREIGN KEY(guardian_id) REFERENCES guardians(id),
            FOREIGN KEY(address_id) REFERENCES addresses(id),
            FOREIGN KEY(class_id) REFERENCES class_sections(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hostel_allocations(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL UNIQUE,
            building TEXT,
            room TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY,
            subject_code TEXT NOT NULL,
            name TEXT,
            semester_id INTEGER NOT NULL,
            batch_id INTEGER NOT NULL,
            subject_type TEXT NOT NULL DEFAULT 'CORE',
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(subject_code, semester_id, batch_id, subject_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_code ON subjects(subject_code)",
        [],
    )?;

    // Append-only: re-running an import appends grades again.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_grades(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            grade TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_grades_student ON subject_grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_semesters(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            semester_id INTEGER NOT NULL,
            batch_id INTEGER NOT NULL,
            backlogs INTEGER,
            sgpa REAL,
            cgpa REAL,
            result TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(student_id, semester_id, batch_id)
        )",
        [],
    )?;

    Ok(())
}

fn seed_semesters(conn: &Connection) -> anyhow::Result<()> {
    for n in 1..=8_i64 {
        conn.execute(
            "INSERT INTO semesters(id, number) VALUES(?, ?) ON CONFLICT DO NOTHING",
            (n, n),
        )?;
    }
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(serde_json::from_str(&s).ok()),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent_and_seeds_semesters() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM semesters", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 8);
        let mut stmt = conn.prepare("PRAGMA table_info(students)").expect("pragma");
        let columns = stmt
            .query_map([], |r| r.get::<_, String>(1))
            .expect("columns")
            .collect::<Result<Vec<_>, _>>()
            .expect("names");
        assert!(columns.iter().any(|c| c == "stream"));
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "setup.import").expect("get").is_none());
        settings_set_json(&conn, "setup.import", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "setup.import", &serde_json::json!({ "a": 2 })).expect("set");
        let v = settings_get_json(&conn, "setup.import").expect("get").expect("some");
        assert_eq!(v["a"], 2);
    }
}
