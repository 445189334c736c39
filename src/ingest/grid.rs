use anyhow::{anyhow, Context};
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct Grid {
    rows: Vec<Vec<String>>,
    width: usize,
}

impl Grid {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        Self { rows, width }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Empty string for anything outside the populated area.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        if row == 0 || col == 0 {
            return "";
        }
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn non_empty_count(&self, row: usize) -> usize {
        (1..=self.width)
            .filter(|&c| !self.cell(row, c).is_empty())
            .count()
    }
}

pub fn load_grid(path: &Path) -> anyhow::Result<Grid> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
            Ok(parse_csv_grid(&text))
        }
        "xlsx" | "xlsm" | "xls" | "ods" => read_first_sheet(path),
        _ => Err(anyhow!(
            "unsupported spreadsheet format: {}",
            path.to_string_lossy()
        )),
    }
}

fn read_first_sheet(path: &Path) -> anyhow::Result<Grid> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Ok(Grid::default());
    };
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("failed to read worksheet {}", sheet))?;

    // calamine ranges start at the first used cell; pad so row/col 1 stay aligned.
    let (start_row, start_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    let mut rows = vec![Vec::new(); start_row];
    for r in range.rows() {
        let mut out = vec![String::new(); start_col];
        out.extend(r.iter().map(cell_to_string));
        rows.push(out);
    }
    Ok(Grid::from_rows(rows))
}

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => d.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Empty | Data::Error(_) => String::new(),
    }
}

fn parse_csv_grid(text: &str) -> Grid {
    let rows = text
        .lines()
        .map(parse_csv_record)
        .collect::<Vec<_>>();
    Grid::from_rows(rows)
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_one_indexed_and_trimmed() {
        let g = parse_csv_grid("a, b ,c\n\n1,2\n");
        assert_eq!(g.row_count(), 3);
        assert_eq!(g.width(), 3);
        assert_eq!(g.cell(1, 2), "b");
        assert_eq!(g.cell(2, 1), "");
        assert_eq!(g.cell(3, 3), "");
        assert_eq!(g.cell(0, 1), "");
        assert_eq!(g.non_empty_count(1), 3);
    }

    #[test]
    fn csv_quotes_keep_commas_and_escaped_quotes() {
        let rec = parse_csv_record(r#"E23001,"Shah, Riya","say ""hi""""#);
        assert_eq!(rec, vec!["E23001", "Shah, Riya", "say \"hi\""]);
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(230001.0)), "230001");
        assert_eq!(cell_to_string(&Data::Float(8.25)), "8.25");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_grid(Path::new("/tmp/roster.txt")).expect_err("reject");
        assert!(err.to_string().contains("unsupported"));
    }
}
