use super::classify::Classification;
use super::columns::{ColumnMap, Field};
use super::grid::Grid;
use super::RowIssue;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRow {
    pub source_row: usize,
    pub gr_number: Option<String>,
    pub enrollment_number: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub semester: Option<i64>,
    pub batch_id: Option<i64>,
    pub batch_start_year: Option<i32>,
    pub batch_end_year: Option<i32>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub dob: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub guardian_email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub mentor_code: Option<String>,
    pub hostel_building: Option<String>,
    pub hostel_room: Option<String>,
    pub stream: Option<String>,
    pub grades: Vec<(String, String)>,
    pub backlogs: Option<i64>,
    pub sgpa: Option<f64>,
    pub cgpa: Option<f64>,
    pub result: Option<String>,
    pub classification: Option<Classification>,
}

impl NormalizedRow {
    /// Login name for the student's account: enrollment number, else GR number.
    pub fn identity_key(&self) -> Option<&str> {
        self.enrollment_number
            .as_deref()
            .or(self.gr_number.as_deref())
    }

    pub fn display_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name]
            .iter()
            .filter_map(|p| p.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
pub struct ParsedRows {
    pub rows: Vec<NormalizedRow>,
    pub skipped_blank: usize,
    pub warnings: Vec<RowIssue>,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn code(s: &str) -> Option<String> {
    non_empty(s).map(|v| v.to_ascii_uppercase())
}

/// Accepts `3`, `03`, `Sem 3`, `III`, `3rd`.
pub fn parse_semester(s: &str) -> Option<i64> {
    let t = s.trim().to_ascii_lowercase();
    let t = t.trim_start_matches("semester").trim_start_matches("sem").trim();
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).collect::<String>();
    if !digits.is_empty() {
        return digits.parse().ok().filter(|n| (1..=12).contains(n));
    }
    let roman = match t {
        "i" => 1,
        "ii" => 2,
        "iii" => 3,
        "iv" => 4,
        "v" => 5,
        "vi" => 6,
        "vii" => 7,
        "viii" => 8,
        _ => return None,
    };
    Some(roman)
}

/// `2023-2027`, `2023-27`, `2023/27` or a bare `2023`.
pub fn parse_batch_years(s: &str) -> Option<(i32, Option<i32>)> {
    let t = s.trim();
    let mut parts = t.split(|c: char| c == '-' || c == '/' || c == '–').map(str::trim);
    let start = parts.next()?.parse::<i32>().ok().filter(|y| (1900..=2999).contains(y))?;
    let end = match parts.next() {
        None => None,
        Some(e) if e.len() == 2 => {
            let yy = e.parse::<i32>().ok()?;
            let century = start - start.rem_euclid(100);
            let mut end = century + yy;
            if end < start {
                end += 100;
            }
            Some(end)
        }
        Some(e) => Some(e.parse::<i32>().ok()?),
    };
    Some((start, end))
}

fn split_full_name(full: &str) -> (Option<String>, Option<String>, Option<String>) {
    let parts = full.split_whitespace().collect::<Vec<_>>();
    match parts.len() {
        0 => (None, None, None),
        1 => (Some(parts[0].to_string()), None, None),
        2 => (Some(parts[0].to_string()), None, Some(parts[1].to_string())),
        n => (
            Some(parts[0].to_string()),
            Some(parts[1..n - 1].join(" ")),
            Some(parts[n - 1].to_string()),
        ),
    }
}

pub fn parse_rows(grid: &Grid, header_index: usize, columns: &ColumnMap) -> ParsedRows {
    let mut out = ParsedRows::default();
    for r in (header_index + 1)..=grid.row_count() {
        let get = |f: Field| columns.col(f).map(|c| grid.cell(r, c)).unwrap_or("");
        let gr_number = code(get(Field::GrNumber));
        let enrollment_number = code(get(Field::EnrollmentNumber));
        if gr_number.is_none() && enrollment_number.is_none() {
            out.skipped_blank += 1;
            continue;
        }

        let mut row = NormalizedRow {
            source_row: r,
            gr_number,
            enrollment_number,
            first_name: non_empty(get(Field::FirstName)),
            middle_name: non_empty(get(Field::MiddleName)),
            last_name: non_empty(get(Field::LastName)),
            email: non_empty(get(Field::Email)).map(|e| e.to_ascii_lowercase()),
            phone: non_empty(get(Field::Phone)),
            gender: code(get(Field::Gender)),
            dob: non_empty(get(Field::Dob)),
            guardian_name: non_empty(get(Field::GuardianName)),
            guardian_phone: non_empty(get(Field::GuardianPhone)),
            guardian_email: non_empty(get(Field::GuardianEmail)).map(|e| e.to_ascii_lowercase()),
            address: non_empty(get(Field::Address)),
            city: non_empty(get(Field::City)),
            state: non_empty(get(Field::State)),
            pincode: non_empty(get(Field::Pincode)),
            class_name: code(get(Field::ClassName)),
            section: code(get(Field::Section)),
            mentor_code: code(get(Field::MentorCode)),
            hostel_building: non_empty(get(Field::HostelBuilding)),
            hostel_room: code(get(Field::HostelRoom)),
            stream: code(get(Field::Stream)),
            result: code(get(Field::Result)),
            ..Default::default()
        };

        if row.first_name.is_none() && row.last_name.is_none() {
            let (first, middle, last) = split_full_name(get(Field::FullName));
            row.first_name = first;
            row.middle_name = row.middle_name.or(middle);
            row.last_name = last;
        }

        let sem_raw = get(Field::Semester);
        row.semester = parse_semester(sem_raw);
        if row.semester.is_none() && !sem_raw.is_empty() {
            out.warnings
                .push(RowIssue::new(r, "bad_semester", format!("unrecognized semester '{}'", sem_raw)));
        }

        let batch_id_raw = get(Field::BatchId);
        row.batch_id = batch_id_raw.parse::<i64>().ok();
        if row.batch_id.is_none() && !batch_id_raw.is_empty() {
            out.warnings
                .push(RowIssue::new(r, "bad_batch", format!("unrecognized batch id '{}'", batch_id_raw)));
        }
        let batch_raw = get(Field::Batch);
        match parse_batch_years(batch_raw) {
            Some((start, end)) => {
                row.batch_start_year = Some(start);
                row.batch_end_year = end;
            }
            None if !batch_raw.is_empty() => out.warnings.push(RowIssue::new(
                r,
                "bad_batch",
                format!("unrecognized batch '{}'", batch_raw),
            )),
            None => {}
        }

        let backlog_raw = get(Field::Backlogs);
        row.backlogs = backlog_raw.parse::<i64>().ok();
        let sgpa_raw = get(Field::Sgpa);
        row.sgpa = sgpa_raw.parse::<f64>().ok();
        if row.sgpa.is_none() && !sgpa_raw.is_empty() && !sgpa_raw.eq_ignore_ascii_case("-") {
            out.warnings
                .push(RowIssue::new(r, "bad_sgpa", format!("unrecognized SGPA '{}'", sgpa_raw)));
        }
        row.cgpa = get(Field::Cgpa).parse::<f64>().ok();

        row.grades = columns
            .subjects
            .iter()
            .filter_map(|(c, subject)| code(grid.cell(r, *c)).map(|g| (subject.clone(), g)))
            .collect();

        out.rows.push(row);
    }
    out
}
