use super::grid::Grid;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct HeaderRow {
    pub index: usize,
    pub labels: BTreeMap<usize, String>,
    pub detected: bool,
}

pub fn locate_header(grid: &Grid, scan_rows: usize, min_cells: usize) -> HeaderRow {
    let limit = scan_rows.min(grid.row_count());
    let found = (1..=limit).find(|&r| grid.non_empty_count(r) >= min_cells);
    let index = found.unwrap_or(1);
    let labels = (1..=grid.width())
        .filter_map(|c| {
            let label = grid.cell(index, c);
            (!label.is_empty()).then(|| (c, label.to_string()))
        })
        .collect();
    HeaderRow {
        index,
        labels,
        detected: found.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn blank_first_row_puts_header_on_row_two() {
        let g = grid(&[
            &["", "", ""],
            &["GR No", "Name", "Enrollment No"],
            &["1001", "Riya Shah", "E23001"],
        ]);
        let h = locate_header(&g, 5, 3);
        assert_eq!(h.index, 2);
        assert!(h.detected);
        assert_eq!(h.labels.get(&3).map(|s| s.as_str()), Some("Enrollment No"));
    }

    #[test]
    fn title_rows_above_the_header_are_skipped() {
        let g = grid(&[
            &["Semester 3 Results", "", ""],
            &["Branch: CE", "", ""],
            &["enrollment_no", "name", "sgpa", "DBMS101"],
        ]);
        assert_eq!(locate_header(&g, 5, 3).index, 3);
    }

    #[test]
    fn falls_back_to_row_one_when_nothing_qualifies() {
        let g = grid(&[&["a", ""], &["b", "c"]]);
        let h = locate_header(&g, 5, 3);
        assert_eq!(h.index, 1);
        assert!(!h.detected);
    }

    #[test]
    fn only_the_first_scan_rows_are_considered() {
        let filler: &[&str] = &["x"];
        let header: &[&str] = &["GR", "Name", "Enrollment"];
        let mut rows = vec![filler; 5];
        rows.push(header);
        let g = grid(&rows);
        assert_eq!(locate_header(&g, 5, 3).index, 1);
        assert_eq!(locate_header(&g, 6, 3).index, 6);
    }
}
