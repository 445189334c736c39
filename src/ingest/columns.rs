use super::header::HeaderRow;
use super::{ImportError, ImportKind};
use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    GrNumber,
    EnrollmentNumber,
    FullName,
    FirstName,
    MiddleName,
    LastName,
    Semester,
    BatchId,
    Batch,
    Email,
    Phone,
    Gender,
    Dob,
    GuardianName,
    GuardianPhone,
    GuardianEmail,
    Address,
    City,
    State,
    Pincode,
    ClassName,
    Section,
    MentorCode,
    HostelBuilding,
    HostelRoom,
    Stream,
    Backlogs,
    Sgpa,
    Cgpa,
    Result,
}

pub struct ColumnRule {
    pub field: Field,
    pub synonyms: &'static [&'static str],
}

pub const COLUMN_RULES: &[ColumnRule] = &[
    ColumnRule {
        field: Field::GrNumber,
        synonyms: &["gr_no", "gr no", "gr number", "gr_number", "grno", "gr"],
    },
    ColumnRule {
        field: Field::EnrollmentNumber,
        synonyms: &[
            "enrollment_no",
            "enrollment no",
            "enrolment_no",
            "enrolment no",
            "enrollment number",
            "enrolment number",
            "enrollment_number",
            "enrollment",
            "enrolment",
            "enroll no",
        ],
    },
    ColumnRule {
        field: Field::FirstName,
        synonyms: &["first_name", "first name", "fname"],
    },
    ColumnRule {
        field: Field::MiddleName,
        synonyms: &["middle_name", "middle name", "mname", "father name"],
    },
    ColumnRule {
        field: Field::LastName,
        synonyms: &["last_name", "last name", "surname", "lname"],
    },
    ColumnRule {
        field: Field::FullName,
        synonyms: &["name", "student name", "student_name", "full name", "name of student"],
    },
    ColumnRule {
        field: Field::Semester,
        synonyms: &["semester", "sem", "current semester"],
    },
    ColumnRule {
        field: Field::BatchId,
        synonyms: &["batch_id", "batch id"],
    },
    ColumnRule {
        field: Field::Batch,
        synonyms: &["batch", "academic year", "batch year", "admission year"],
    },
    ColumnRule {
        field: Field::Email,
        synonyms: &["email", "email id", "student email", "e-mail"],
    },
    ColumnRule {
        field: Field::Phone,
        synonyms: &["phone", "mobile", "mobile no", "contact", "contact no", "student mobile"],
    },
    ColumnRule {
        field: Field::Gender,
        synonyms: &["gender", "sex"],
    },
    ColumnRule {
        field: Field::Dob,
        synonyms: &["dob", "date of birth", "birth date", "birth_date"],
    },
    ColumnRule {
        field: Field::GuardianName,
        synonyms: &["guardian name", "guardian_name", "parent name", "parent_name", "guardian"],
    },
    ColumnRule {
        field: Field::GuardianPhone,
        synonyms: &[
            "guardian phone",
            "guardian mobile",
            "parent phone",
            "parent mobile",
            "parent contact",
        ],
    },
    ColumnRule {
        field: Field::GuardianEmail,
        synonyms: &["guardian email", "parent email"],
    },
    ColumnRule {
        field: Field::Address,
        synonyms: &["address", "address line", "residential address"],
    },
    ColumnRule {
        field: Field::City,
        synonyms: &["city", "town"],
    },
    ColumnRule {
        field: Field::State,
        synonyms: &["state"],
    },
    ColumnRule {
        field: Field::Pincode,
        synonyms: &["pincode", "pin code", "pin", "zip"],
    },
    ColumnRule {
        field: Field::ClassName,
        synonyms: &["class", "class name", "class_name", "division", "div"],
    },
    ColumnRule {
        field: Field::Section,
        synonyms: &["section", "sec"],
    },
    ColumnRule {
        field: Field::MentorCode,
        synonyms: &["mentor", "mentor code", "mentor_code", "faculty code"],
    },
    ColumnRule {
        field: Field::HostelBuilding,
        synonyms: &["hostel", "hostel building", "building"],
    },
    ColumnRule {
        field: Field::HostelRoom,
        synonyms: &["room", "room no", "hostel room"],
    },
    ColumnRule {
        field: Field::Stream,
        synonyms: &["stream", "program", "programme", "course"],
    },
    ColumnRule {
        field: Field::Backlogs,
        synonyms: &["backlog", "backlogs", "no of backlogs", "current backlog"],
    },
    ColumnRule {
        field: Field::Sgpa,
        synonyms: &["sgpa", "spi", "gpa"],
    },
    ColumnRule {
        field: Field::Cgpa,
        synonyms: &["cgpa", "cpi"],
    },
    ColumnRule {
        field: Field::Result,
        synonyms: &["result", "status", "pass/fail", "remarks"],
    },
];

/// Known templates keep GR, name, enrollment and semester in columns 1..4.
pub struct PositionalFallback {
    pub columns: &'static [(Field, usize)],
}

pub const POSITIONAL_FALLBACK: PositionalFallback = PositionalFallback {
    columns: &[
        (Field::GrNumber, 1),
        (Field::FullName, 2),
        (Field::EnrollmentNumber, 3),
        (Field::Semester, 4),
    ],
};

/// Headers on results sheets that are never subject codes.
const IGNORED_LABELS: &[&str] = &[
    // serial and seat numbers
    "sr", "sr no", "srno", "s no", "no", "#", "seat no", "roll no",
    // totals and aggregates
    "total", "total marks", "grand total", "marks", "max marks", "out of", "percentage",
    "percent", "%", "spi", "cpi", "credits", "total credits", "grade", "remarks", "remark",
    "status", "attendance",
    // personal and placement details
    "gender", "sex", "dob", "date of birth", "email", "phone", "mobile", "division", "class",
    "section", "department", "branch", "program", "year",
];

fn fields_for(kind: ImportKind) -> &'static [Field] {
    match kind {
        ImportKind::Roster => &[
            Field::GrNumber,
            Field::EnrollmentNumber,
            Field::FirstName,
            Field::MiddleName,
            Field::LastName,
            Field::FullName,
            Field::Semester,
            Field::BatchId,
            Field::Batch,
            Field::Email,
            Field::Phone,
            Field::Gender,
            Field::Dob,
            Field::GuardianName,
            Field::GuardianPhone,
            Field::GuardianEmail,
            Field::Address,
            Field::City,
            Field::State,
            Field::Pincode,
            Field::ClassName,
            Field::Section,
            Field::MentorCode,
            Field::HostelBuilding,
            Field::HostelRoom,
            Field::Stream,
        ],
        ImportKind::Results => &[
            Field::GrNumber,
            Field::EnrollmentNumber,
            Field::FullName,
            Field::Semester,
            Field::BatchId,
            Field::Batch,
            Field::Stream,
            Field::Backlogs,
            Field::Sgpa,
            Field::Cgpa,
            Field::Result,
        ],
    }
}

pub fn normalize_label(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_subject_code(s: &str) -> String {
    s.split_whitespace()
        .collect::<String>()
        .to_ascii_uppercase()
}

#[derive(Clone, Debug, Default)]
pub struct ColumnMap {
    pub fields: BTreeMap<Field, usize>,
    pub subjects: Vec<(usize, String)>,
    pub positional: bool,
}

impl ColumnMap {
    pub fn col(&self, field: Field) -> Option<usize> {
        self.fields.get(&field).copied()
    }

    pub fn has_identity(&self) -> bool {
        self.col(Field::GrNumber).is_some() || self.col(Field::EnrollmentNumber).is_some()
    }
}

pub fn map_columns(
    header: &HeaderRow,
    width: usize,
    kind: ImportKind,
) -> Result<ColumnMap, ImportError> {
    let labels = header
        .labels
        .iter()
        .map(|(c, l)| (*c, normalize_label(l)))
        .collect::<Vec<_>>();
    let wanted = fields_for(kind);
    let mut map = ColumnMap::default();
    let mut claimed = HashSet::<usize>::new();

    for rule in COLUMN_RULES.iter().filter(|r| wanted.contains(&r.field)) {
        let hit = rule.synonyms.iter().find_map(|syn| {
            labels
                .iter()
                .find(|(c, l)| l == syn && !claimed.contains(c))
                .map(|(c, _)| *c)
        });
        if let Some(col) = hit {
            claimed.insert(col);
            map.fields.insert(rule.field, col);
        }
    }

    if !map.has_identity() {
        map.positional = true;
        for (field, col) in POSITIONAL_FALLBACK.columns {
            if *col > width {
                continue;
            }
            // Positional columns win over any named mapping that landed on them.
            map.fields.retain(|_, c| *c != *col);
            map.fields.insert(*field, *col);
            claimed.insert(*col);
        }
        if !map.has_identity() {
            return Err(ImportError::NoIdentityColumn);
        }
    }

    if kind == ImportKind::Results {
        map.subjects = labels
            .iter()
            .filter(|(c, l)| !claimed.contains(c) && !IGNORED_LABELS.contains(&l.as_str()))
            .filter_map(|(c, _)| {
                let code = normalize_subject_code(header.labels.get(c)?);
                (!code.is_empty()).then_some((*c, code))
            })
            .collect();
    }

    Ok(map)
}
