use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Regular,
    D2d,
    Unknown,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::D2d => "D2D",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Enrollment numbers carry the admission year in characters 2..=3
/// (`E23xxxx`). Matching the cohort start year means a regular intake;
/// matching the following year means a direct-second-year (D2D) entry.
pub fn classify(enrollment_number: &str, cohort_start_year: i32) -> Classification {
    let code = enrollment_number.trim().chars().skip(1).take(2).collect::<String>();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Classification::Unknown;
    }
    let Ok(code) = code.parse::<i32>() else {
        return Classification::Unknown;
    };
    let last_two = cohort_start_year.rem_euclid(100);
    let next_two = (last_two + 1) % 100;
    if code == last_two {
        Classification::Regular
    } else if code == next_two {
        Classification::D2d
    } else {
        Classification::Unknown
    }
}
