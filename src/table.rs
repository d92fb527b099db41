//! Paged plain-text listing of stored candidates.

use crate::candidate::StoredCandidate;

pub const COLUMNS: [&str; 5] = ["name", "surname", "seniority", "years", "availability"];

/// One page of candidates. `page_index` is zero-based; `total` counts every stored candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<StoredCandidate>,
    pub page_index: usize,
    pub page_size: usize,
    pub total: usize,
}

impl Page {
    /// Range label of the page, one-based and inclusive.
    pub fn label(&self) -> String {
        if self.items.is_empty() {
            return format!("0 of {}", self.total);
        }
        let first = self.page_index * self.page_size + 1;
        let last = first + self.items.len() - 1;
        format!("{first} – {last} of {}", self.total)
    }
}

/// Cuts page `page_index` out of `items`. A page size of 0 counts as 1.
pub fn paginate(items: Vec<StoredCandidate>, page_index: usize, page_size: usize) -> Page {
    let page_size = page_size.max(1);
    let total = items.len();
    let items = items
        .into_iter()
        .skip(page_index.saturating_mul(page_size))
        .take(page_size)
        .collect();
    Page {
        items,
        page_index,
        page_size,
        total,
    }
}

fn cells(candidate: &StoredCandidate) -> [String; 5] {
    let record = &candidate.record;
    [
        record.name.to_owned(),
        record.surname.to_owned(),
        record.seniority.to_owned(),
        record.years.to_string(),
        record.availability.to_string(),
    ]
}

/// Renders the page as left-aligned columns followed by its range label.
pub fn render(page: &Page) -> String {
    let rows: Vec<[String; 5]> = page.items.iter().map(cells).collect();
    let mut widths = COLUMNS.map(|column| column.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    output.push_str(&line(COLUMNS.iter().copied(), &widths));
    for row in &rows {
        output.push_str(&line(row.iter().map(String::as_str), &widths));
    }
    output.push_str(&page.label());
    output.push('\n');
    output
}

fn line<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line = values
        .zip(widths.iter().copied())
        .map(|(value, width)| format!("{value:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateRecord;

    fn candidates(count: u64) -> Vec<StoredCandidate> {
        (1..=count)
            .map(|id| StoredCandidate {
                id,
                record: CandidateRecord {
                    name: format!("Name{id}"),
                    surname: "Doe".to_owned(),
                    seniority: "junior".to_owned(),
                    years: id as i64,
                    availability: id % 2 == 0,
                },
            })
            .collect()
    }

    #[test]
    fn paginates_zero_based() {
        let page = paginate(candidates(12), 1, 5);
        let ids: Vec<u64> = page.items.iter().map(|it| it.id).collect();
        assert_eq!(ids, vec![6, 7, 8, 9, 10]);
        assert_eq!(page.total, 12);
        assert_eq!(page.label(), "6 – 10 of 12");

        let last = paginate(candidates(12), 2, 5);
        assert_eq!(last.items.len(), 2);
        assert_eq!(last.label(), "11 – 12 of 12");
    }

    #[test]
    fn out_of_range_page_is_empty_but_keeps_total() {
        let page = paginate(candidates(3), 4, 10);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.label(), "0 of 3");
        assert!(paginate(candidates(3), usize::MAX, 10).items.is_empty());
    }

    #[test]
    fn zero_page_size_counts_as_one() {
        let page = paginate(candidates(3), 0, 0);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn empty_store_renders_header_and_label() {
        let output = render(&paginate(Vec::new(), 0, 10));
        assert_eq!(output, "name  surname  seniority  years  availability\n0 of 0\n");
    }

    #[test]
    fn renders_aligned_columns() {
        let output = render(&paginate(candidates(2), 0, 10));
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, vec![
            "name   surname  seniority  years  availability",
            "Name1  Doe      junior     1      false",
            "Name2  Doe      junior     2      true",
            "1 – 2 of 2",
        ]);
    }
}
