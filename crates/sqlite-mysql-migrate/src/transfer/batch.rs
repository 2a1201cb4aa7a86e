//! Per-table row pipeline: duplicate filtering, then coercion.
//!
//! The live transfer and the SQL export both push every batch through a
//! [`RowPipeline`], so the two paths keep and skip exactly the same rows.

use tracing::warn;

use crate::config::MigrationOptions;
use crate::core::{Batch, Row};
use crate::dedup::{DuplicateResolver, PrimaryKeyGuard};
use crate::plan::TablePlan;
use crate::typemap::TargetColumnSpec;

use super::coerce::coerce_row;

/// Row-level messages kept per table; later ones are only counted.
pub const MAX_ROW_MESSAGES: usize = 20;

/// Skipped-row bookkeeping for one table.
#[derive(Debug, Default)]
pub struct SkipLog {
    table: String,
    skipped: u64,
    messages: Vec<String>,
}

impl SkipLog {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Count a skipped row and keep its reason while under the cap.
    pub fn record(&mut self, row_number: u64, reason: impl std::fmt::Display) {
        self.skipped += 1;
        if self.messages.len() < MAX_ROW_MESSAGES {
            let message = format!("{}: skipped row {}: {}", self.table, row_number, reason);
            warn!("{}", message);
            self.messages.push(message);
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Messages for the job log, with a tail line when some were dropped.
    pub fn messages(&self) -> Vec<String> {
        let mut out = self.messages.clone();
        let hidden = self.skipped.saturating_sub(self.messages.len() as u64);
        if hidden > 0 {
            out.push(format!(
                "{}: {} more skipped rows not listed",
                self.table, hidden
            ));
        }
        out
    }
}

/// Turns raw source batches into rows ready for the target.
#[derive(Debug)]
pub struct RowPipeline {
    columns: Vec<TargetColumnSpec>,
    resolver: Option<DuplicateResolver>,
    key_guard: Option<PrimaryKeyGuard>,
    skips: SkipLog,
}

impl RowPipeline {
    pub fn new(plan: &TablePlan, options: &MigrationOptions) -> Self {
        Self {
            columns: plan.columns.clone(),
            resolver: DuplicateResolver::for_table(&plan.source, options),
            key_guard: PrimaryKeyGuard::for_table(&plan.source),
            skips: SkipLog::new(&plan.name),
        }
    }

    /// Filter duplicates, then coerce. Rows that fail coercion or whose
    /// converted primary key repeats are dropped and recorded. Each kept row
    /// carries its 1-based source position.
    pub fn process(&mut self, batch: Batch) -> Vec<(u64, Row)> {
        let offset = batch.offset;
        let numbered: Vec<(u64, Row)> = batch
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| (offset + i as u64 + 1, row))
            .collect();

        let numbered = match self.resolver.as_mut() {
            Some(resolver) => {
                let (numbers, rows): (Vec<u64>, Vec<Row>) = numbered.into_iter().unzip();
                let kept = resolver.filter_with_index(rows);
                kept.into_iter().map(|(i, row)| (numbers[i], row)).collect()
            }
            None => numbered,
        };

        let mut out = Vec::with_capacity(numbered.len());
        for (number, row) in numbered {
            match coerce_row(&self.columns, row) {
                Ok(row) => {
                    if self.key_guard.as_mut().is_some_and(|g| !g.admit(&row)) {
                        self.skips.record(number, "duplicate primary key after conversion");
                        continue;
                    }
                    out.push((number, row))
                }
                Err(e) => self.skips.record(number, e),
            }
        }
        out
    }

    pub fn skip_log(&mut self) -> &mut SkipLog {
        &mut self.skips
    }

    pub fn rows_skipped(&self) -> u64 {
        self.skips.skipped()
    }

    pub fn duplicates_removed(&self) -> u64 {
        self.resolver.as_ref().map_or(0, |r| r.removed())
    }

    pub fn messages(&self) -> Vec<String> {
        self.skips.messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::plan::plan_table;
    use crate::source::{ColumnDescriptor, TableDescriptor};

    fn column(name: &str, declared: &str, pos: usize) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            declared_type: declared.into(),
            nullable: true,
            is_primary_key: false,
            pk_position: 0,
            ordinal_position: pos,
            default_value: None,
        }
    }

    fn keyless_plan() -> TablePlan {
        plan_table(&TableDescriptor {
            name: "tag".into(),
            columns: vec![column("key", "TEXT", 0), column("weight", "INTEGER", 1)],
            record_count: 4,
            indexes: vec![],
            foreign_keys: vec![],
        })
        .unwrap()
    }

    fn row(key: &str, weight: SqlValue) -> Row {
        vec![key.into(), weight]
    }

    #[test]
    fn test_dedup_then_coerce() {
        let plan = keyless_plan();
        let mut pipeline = RowPipeline::new(&plan, &MigrationOptions::default());
        let rows = pipeline.process(Batch::new(
            vec![
                row("a", SqlValue::Int(1)),
                row("a", SqlValue::Int(1)),
                row("b", "heavy".into()),
                row("c", "3".into()),
            ],
            10,
        ));

        assert_eq!(
            rows,
            vec![(11, row("a", SqlValue::Int(1))), (14, row("c", SqlValue::Int(3)))]
        );
        assert_eq!(pipeline.duplicates_removed(), 1);
        assert_eq!(pipeline.rows_skipped(), 1);
        let messages = pipeline.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("tag: skipped row 13:"), "{}", messages[0]);
    }

    #[test]
    fn test_converted_key_collision_is_skipped() {
        let mut id = column("code", "INT", 0);
        id.is_primary_key = true;
        id.pk_position = 1;
        id.nullable = false;
        let plan = plan_table(&TableDescriptor {
            name: "reading".into(),
            columns: vec![id, column("v", "TEXT", 1)],
            record_count: 3,
            indexes: vec![],
            foreign_keys: vec![],
        })
        .unwrap();
        let mut pipeline = RowPipeline::new(&plan, &MigrationOptions::default());
        let rows = pipeline.process(Batch::new(
            vec![
                vec![SqlValue::Float(1.2), "a".into()],
                vec![SqlValue::Float(1.4), "b".into()],
                vec![SqlValue::Int(2), "c".into()],
            ],
            0,
        ));

        let numbers: Vec<u64> = rows.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(pipeline.rows_skipped(), 1);
        assert!(pipeline.messages()[0].starts_with("reading: skipped row 2: duplicate primary key"));
    }

    #[test]
    fn test_dedup_disabled() {
        let plan = keyless_plan();
        let options = MigrationOptions {
            resolve_duplicates: false,
            ..Default::default()
        };
        let mut pipeline = RowPipeline::new(&plan, &options);
        let rows = pipeline.process(Batch::new(
            vec![row("a", SqlValue::Int(1)), row("a", SqlValue::Int(1))],
            0,
        ));
        assert_eq!(rows.len(), 2);
        assert_eq!(pipeline.duplicates_removed(), 0);
    }

    #[test]
    fn test_skip_log_caps_messages() {
        let mut log = SkipLog::new("t");
        for i in 0..(MAX_ROW_MESSAGES as u64 + 5) {
            log.record(i, "bad");
        }
        let messages = log.messages();
        assert_eq!(messages.len(), MAX_ROW_MESSAGES + 1);
        assert_eq!(messages.last().unwrap(), "t: 5 more skipped rows not listed");
        assert_eq!(log.skipped(), MAX_ROW_MESSAGES as u64 + 5);
    }
}
