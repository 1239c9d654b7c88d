//! Pending work discovery
//!
//! A cell needs work when its raw value is present and its output column
//! (`field` + suffix) is still empty. Re-running over finished output
//! therefore finds nothing to do.

use crate::checkpoint::ProgressDescriptor;
use crate::records::{RecordTable, WorkUnit};

/// Where an interrupted run left off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub field: String,
    pub processed_rows: usize,
}

impl From<&ProgressDescriptor> for ResumePoint {
    fn from(progress: &ProgressDescriptor) -> Self {
        Self {
            field: progress.current_field.clone(),
            processed_rows: progress.processed_rows,
        }
    }
}

/// One field to visit, with the rows below `skip_below` already accounted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPass {
    pub field: String,
    pub skip_below: usize,
}

#[derive(Debug, Clone)]
pub struct WorkUnitEnumerator {
    output_suffix: String,
}

impl WorkUnitEnumerator {
    pub fn new(output_suffix: impl Into<String>) -> Self {
        Self {
            output_suffix: output_suffix.into(),
        }
    }

    /// Name of the column holding the transformed value of `field`
    pub fn output_column(&self, field: &str) -> String {
        format!("{field}{}", self.output_suffix)
    }

    /// Fields to visit, in request order.
    ///
    /// Every requested field gets a pass; fields finished before the
    /// checkpoint simply have nothing pending. Only the checkpoint's own field
    /// skips the rows it had already processed.
    pub fn passes(&self, fields: &[String], resume: Option<&ResumePoint>) -> Vec<FieldPass> {
        fields
            .iter()
            .map(|field| FieldPass {
                field: field.clone(),
                skip_below: resume
                    .filter(|r| r.field == *field)
                    .map_or(0, |r| r.processed_rows),
            })
            .collect()
    }

    /// Pending units of one pass, in ascending row order
    pub fn pending(&self, table: &RecordTable, pass: &FieldPass) -> Vec<WorkUnit> {
        let Some(raw_col) = table.column_index(&pass.field) else {
            return Vec::new();
        };
        let out_col = table.column_index(&self.output_column(&pass.field));

        (pass.skip_below..table.len())
            .filter_map(|row| {
                let raw = table.get(row, raw_col)?;
                if raw.trim().is_empty() {
                    return None;
                }
                if out_col.is_some_and(|col| table.get(row, col).is_some()) {
                    return None;
                }
                Some(WorkUnit::pending(row, pass.field.clone(), raw))
            })
            .collect()
    }

    /// Pending units across all `fields` from a fresh start
    pub fn pending_count(&self, table: &RecordTable, fields: &[String]) -> usize {
        self.passes(fields, None)
            .iter()
            .map(|pass| self.pending(table, pass).len())
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> RecordTable {
        RecordTable::from_reader(
            "id,title,text,text_ko\n\
             0,t0,hello,\n\
             1,t1,,\n\
             2,t2,world,세계\n\
             3,t3,   ,\n\
             4,t4,again,\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_pending_skips_empty_and_done() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let units = enumerator.pending(
            &table(),
            &FieldPass {
                field: "text".into(),
                skip_below: 0,
            },
        );

        let rows: Vec<usize> = units.iter().map(|u| u.row).collect();
        assert_eq!(rows, vec![0, 4]);
        assert_eq!(units[1].raw_value, "again");
    }

    #[test]
    fn test_missing_output_column_means_everything_pending() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let units = enumerator.pending(
            &table(),
            &FieldPass {
                field: "title".into(),
                skip_below: 0,
            },
        );
        assert_eq!(units.len(), 5);
    }

    #[test]
    fn test_resume_skips_rows_below_processed_count() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let units = enumerator.pending(
            &table(),
            &FieldPass {
                field: "title".into(),
                skip_below: 3,
            },
        );
        let rows: Vec<usize> = units.iter().map(|u| u.row).collect();
        assert_eq!(rows, vec![3, 4]);
    }

    #[test]
    fn test_passes_skip_rows_only_for_resume_field() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let resume = ResumePoint {
            field: "text".into(),
            processed_rows: 2,
        };

        let passes = enumerator.passes(&fields(&["title", "text", "summary"]), Some(&resume));

        let skips: Vec<(&str, usize)> = passes.iter().map(|p| (p.field.as_str(), p.skip_below)).collect();
        assert_eq!(skips, vec![("title", 0), ("text", 2), ("summary", 0)]);
    }

    #[test]
    fn test_finished_field_before_resume_field_has_nothing_pending() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let table = RecordTable::from_reader("id,title,title_ko,text\n0,a,A,x\n1,b,B,y\n".as_bytes()).unwrap();
        let resume = ResumePoint {
            field: "text".into(),
            processed_rows: 1,
        };

        let passes = enumerator.passes(&fields(&["title", "text"]), Some(&resume));

        assert!(enumerator.pending(&table, &passes[0]).is_empty());
        let rows: Vec<usize> = enumerator.pending(&table, &passes[1]).iter().map(|u| u.row).collect();
        assert_eq!(rows, vec![1]);
    }

    #[test]
    fn test_unknown_resume_field_visits_everything() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        let resume = ResumePoint {
            field: "gone".into(),
            processed_rows: 9,
        };
        let passes = enumerator.passes(&fields(&["title", "text"]), Some(&resume));
        assert_eq!(passes.len(), 2);
        assert!(passes.iter().all(|p| p.skip_below == 0));
    }

    #[test]
    fn test_pending_count_sums_fields() {
        let enumerator = WorkUnitEnumerator::new("_ko");
        assert_eq!(enumerator.pending_count(&table(), &fields(&["title", "text"])), 7);
    }
}
