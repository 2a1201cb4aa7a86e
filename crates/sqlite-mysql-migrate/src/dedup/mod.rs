//! Duplicate row detection and removal.
//!
//! Rows are compared under per-table equality keys:
//!
//! - single-column primary key: no structural key (the target enforces it)
//! - composite primary key: the key columns
//! - no primary key: the full row
//!
//! plus any configured unique-key hints. The first occurrence of a key wins.
//! Only key digests are kept, so memory grows with distinct keys rather than
//! row width.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{DuplicateStrategy, MigrationOptions};
use crate::core::{Row, SqlValue};
use crate::source::TableDescriptor;

type KeyDigest = [u8; 32];

/// A set of columns whose combined values must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityKey {
    /// Column positions within the row.
    pub columns: Vec<usize>,

    /// Rows with a NULL in the key never collide (unique index semantics).
    pub nulls_distinct: bool,
}

/// Well-known unique columns of Grafana's SQLite database, which enforces
/// fewer unique constraints than its MySQL schema does.
pub fn grafana_unique_hints() -> HashMap<String, Vec<Vec<String>>> {
    fn set(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    let mut hints = HashMap::new();
    hints.insert("user".to_string(), vec![set(&["login"]), set(&["email"])]);
    hints.insert(
        "dashboard".to_string(),
        vec![set(&["uid"]), set(&["slug", "org_id"])],
    );
    hints.insert("org".to_string(), vec![set(&["name"])]);
    hints.insert(
        "data_source".to_string(),
        vec![set(&["uid", "org_id"]), set(&["name", "org_id"])],
    );
    hints.insert("team".to_string(), vec![set(&["name", "org_id"])]);
    hints.insert(
        "folder".to_string(),
        vec![set(&["uid"]), set(&["title", "org_id"])],
    );
    hints
}

/// Equality keys for a table. Hints naming unknown columns are ignored.
pub fn equality_keys(table: &TableDescriptor, hints: Option<&Vec<Vec<String>>>) -> Vec<EqualityKey> {
    let mut keys = Vec::new();
    let pk = table.primary_key();

    if pk.is_empty() {
        keys.push(EqualityKey {
            columns: (0..table.columns.len()).collect(),
            nulls_distinct: false,
        });
    } else if pk.len() > 1 {
        keys.push(EqualityKey {
            columns: pk.iter().filter_map(|c| table.column_index(&c.name)).collect(),
            nulls_distinct: false,
        });
    }

    for set in hints.into_iter().flatten() {
        let columns: Option<Vec<usize>> = set.iter().map(|c| table.column_index(c)).collect();
        match columns {
            Some(columns) if !columns.is_empty() => {
                if !keys.iter().any(|k| k.columns == columns) {
                    keys.push(EqualityKey {
                        columns,
                        nulls_distinct: true,
                    });
                }
            }
            _ => debug!("{}: ignoring unique hint {:?}", table.name, set),
        }
    }
    keys
}

/// Stateful keep-first filter for one table's rows across batches.
#[derive(Debug)]
pub struct DuplicateResolver {
    table: String,
    strategy: DuplicateStrategy,
    keys: Vec<EqualityKey>,
    seen: Vec<HashSet<KeyDigest>>,
    removed: u64,
}

impl DuplicateResolver {
    pub fn new(table: impl Into<String>, keys: Vec<EqualityKey>, strategy: DuplicateStrategy) -> Self {
        let seen = keys.iter().map(|_| HashSet::new()).collect();
        Self {
            table: table.into(),
            strategy,
            keys,
            seen,
            removed: 0,
        }
    }

    /// Resolver for a table, or `None` when resolution is off or the table
    /// has nothing to compare.
    pub fn for_table(table: &TableDescriptor, options: &MigrationOptions) -> Option<Self> {
        if !options.resolve_duplicates {
            return None;
        }
        let keys = equality_keys(table, options.unique_key_hints.get(&table.name));
        if keys.is_empty() {
            return None;
        }
        Some(Self::new(&table.name, keys, options.duplicate_strategy))
    }

    /// Both accepted strategies keep the first occurrence.
    pub fn strategy(&self) -> DuplicateStrategy {
        self.strategy
    }

    pub fn keys(&self) -> &[EqualityKey] {
        &self.keys
    }

    /// Total rows dropped so far.
    pub fn removed(&self) -> u64 {
        self.removed
    }

    /// Drop rows whose key was already seen, preserving order.
    pub fn filter(&mut self, rows: Vec<Row>) -> Vec<Row> {
        self.filter_with_index(rows)
            .into_iter()
            .map(|(_, row)| row)
            .collect()
    }

    /// Like [`filter`](Self::filter), pairing each kept row with its index
    /// in the input.
    pub fn filter_with_index(&mut self, rows: Vec<Row>) -> Vec<(usize, Row)> {
        let before = self.removed;
        let mut kept = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let digests: Vec<Option<KeyDigest>> =
                self.keys.iter().map(|k| key_digest(k, &row)).collect();
            let duplicate = digests
                .iter()
                .zip(&self.seen)
                .any(|(d, seen)| d.is_some_and(|d| seen.contains(&d)));

            if duplicate {
                self.removed += 1;
                continue;
            }
            for (d, seen) in digests.into_iter().zip(self.seen.iter_mut()) {
                if let Some(d) = d {
                    seen.insert(d);
                }
            }
            kept.push((index, row));
        }

        if self.removed > before {
            debug!(
                "{}: dropped {} duplicate rows in batch",
                self.table,
                self.removed - before
            );
        }
        kept
    }
}

/// Drops rows whose converted primary key repeats an earlier row's. Type
/// conversion can fold distinct source keys together (1.2 and 1.4 in an
/// integer key both become 1), and the target would refuse the second row.
#[derive(Debug)]
pub struct PrimaryKeyGuard {
    key: EqualityKey,
    seen: HashSet<KeyDigest>,
}

impl PrimaryKeyGuard {
    /// Guard for a table, or `None` when its key cannot collide: no primary
    /// key, or a rowid alias (`INTEGER PRIMARY KEY`) whose values are
    /// already distinct integers.
    pub fn for_table(table: &TableDescriptor) -> Option<Self> {
        let pk = table.primary_key();
        match pk.as_slice() {
            [] => return None,
            [only] if only.declared_type.trim().eq_ignore_ascii_case("INTEGER") => return None,
            _ => {}
        }
        let columns = pk.iter().filter_map(|c| table.column_index(&c.name)).collect();
        Some(Self {
            key: EqualityKey {
                columns,
                nulls_distinct: false,
            },
            seen: HashSet::new(),
        })
    }

    /// Whether `row` (already converted) has a key not seen before.
    pub fn admit(&mut self, row: &Row) -> bool {
        match key_digest(&self.key, row) {
            Some(digest) => self.seen.insert(digest),
            None => true,
        }
    }
}

/// One-shot resolution over a complete row set using the table's
/// structural keys. Returns the kept rows and the number removed.
pub fn find_duplicates(
    table: &TableDescriptor,
    rows: Vec<Row>,
    strategy: DuplicateStrategy,
) -> (Vec<Row>, u64) {
    let mut resolver = DuplicateResolver::new(&table.name, equality_keys(table, None), strategy);
    let kept = resolver.filter(rows);
    (kept, resolver.removed())
}

fn key_digest(key: &EqualityKey, row: &Row) -> Option<KeyDigest> {
    let mut hasher = Sha256::new();
    for &i in &key.columns {
        let value = row.get(i).unwrap_or(&SqlValue::Null);
        if key.nulls_distinct && value.is_null() {
            return None;
        }
        hash_value(&mut hasher, value);
    }
    Some(hasher.finalize().into())
}

fn hash_value(hasher: &mut Sha256, value: &SqlValue) {
    fn tagged(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
        hasher.update([tag]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    match value {
        SqlValue::Null => hasher.update([0u8]),
        SqlValue::Int(i) => tagged(hasher, 1, &i.to_le_bytes()),
        SqlValue::Float(f) => tagged(hasher, 2, &f.to_bits().to_le_bytes()),
        SqlValue::Text(s) => tagged(hasher, 3, s.as_bytes()),
        SqlValue::Bytes(b) => tagged(hasher, 4, b),
        SqlValue::Decimal(d) => tagged(hasher, 5, d.to_string().as_bytes()),
        SqlValue::Date(d) => tagged(hasher, 6, d.to_string().as_bytes()),
        SqlValue::DateTime(dt) => tagged(hasher, 7, dt.to_string().as_bytes()),
        SqlValue::Time(t) => tagged(hasher, 8, t.to_string().as_bytes()),
    }
}
