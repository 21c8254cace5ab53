//! In-memory implementation of Driver for testing and development

use crate::core::driver::{Driver, FindManyArgs, TransactionFn};
use crate::core::entity::Entity;
use crate::core::error::DriverError;
use crate::core::field::RelationKind;
use crate::core::query::{Condition, FilterOp, SortOrder, Where};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type Record = Map<String, Value>;
type Tables = HashMap<String, Vec<Record>>;

/// In-memory driver implementation
///
/// Records live in per-entity tables keyed by entity name. Uses RwLock for
/// thread-safe access; clones share the same tables.
///
/// Transactions run one at a time against a private copy of the tables.
/// On success only the records the transaction touched are written back,
/// so writes made outside it in the meantime are kept.
#[derive(Clone, Default)]
pub struct InMemoryDriver {
    tables: Arc<RwLock<Tables>>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    enforce_foreign_keys: bool,
}

impl InMemoryDriver {
    /// Create a new in-memory driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject belongsTo keys that do not reference an existing record
    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, DriverError> {
        self.tables
            .read()
            .map_err(|e| DriverError::Backend(anyhow!("Failed to acquire read lock: {}", e)))
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, DriverError> {
        self.tables
            .write()
            .map_err(|e| DriverError::Backend(anyhow!("Failed to acquire write lock: {}", e)))
    }

    fn check_unique(
        entity: &Entity,
        table: &[Record],
        record: &Record,
        skip_index: Option<usize>,
    ) -> Result<(), DriverError> {
        let unique = std::iter::once("id").chain(entity.unique_fields());
        for field in unique {
            let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = table
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip_index && other.get(field) == Some(value));
            if taken {
                return Err(DriverError::UniqueViolation {
                    entity: entity.name.clone(),
                    fields: vec![field.to_string()],
                });
            }
        }
        Ok(())
    }

    fn check_foreign_keys(
        &self,
        entity: &Entity,
        tables: &Tables,
        record: &Record,
    ) -> Result<(), DriverError> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        for def in entity.config.fields.values() {
            let Some(rel) = def.relation.as_ref().filter(|r| r.kind == RelationKind::BelongsTo)
            else {
                continue;
            };
            let Some(value) = record.get(&rel.foreign_key).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = tables.get(&rel.target_name).is_some_and(|rows| {
                rows.iter()
                    .any(|row| row.get(&rel.references).is_some_and(|v| loose_eq(v, value)))
            });
            if !exists {
                return Err(DriverError::ForeignKeyViolation {
                    entity: entity.name.clone(),
                    field: rel.foreign_key.clone(),
                });
            }
        }
        Ok(())
    }

    fn embed_relations(entity: &Entity, tables: &Tables, record: &Record, include: &[String]) -> Value {
        let mut out = record.clone();
        for name in include {
            let Some(rel) = entity.field(name).and_then(|def| def.relation.as_ref()) else {
                continue;
            };
            let rows = tables.get(&rel.target_name).map(Vec::as_slice).unwrap_or_default();
            let embedded = match rel.kind {
                RelationKind::BelongsTo => record
                    .get(&rel.foreign_key)
                    .and_then(|key| {
                        rows.iter()
                            .find(|row| row.get(&rel.references).is_some_and(|v| loose_eq(v, key)))
                    })
                    .map(|row| Value::Object(row.clone()))
                    .unwrap_or(Value::Null),
                RelationKind::HasMany | RelationKind::HasOne => {
                    let own_key = record.get(&rel.references).cloned().unwrap_or(Value::Null);
                    let mut related = rows
                        .iter()
                        .filter(|row| row.get(&rel.foreign_key).is_some_and(|v| loose_eq(v, &own_key)))
                        .map(|row| Value::Object(row.clone()));
                    if rel.kind == RelationKind::HasMany {
                        Value::Array(related.collect())
                    } else {
                        related.next().unwrap_or(Value::Null)
                    }
                }
            };
            out.insert(name.clone(), embedded);
        }
        Value::Object(out)
    }
}

/// Equality that treats numbers and their string forms as the same id
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            *s == n.to_string()
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn op_matches(op: FilterOp, actual: &Value, expected: &Value) -> bool {
    match op {
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte if actual.is_null() => false,
        FilterOp::Equals => loose_eq(actual, expected),
        FilterOp::Not => !loose_eq(actual, expected),
        FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
            let (Some(haystack), Some(needle)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            match op {
                FilterOp::Contains => haystack.contains(needle),
                FilterOp::StartsWith => haystack.starts_with(needle),
                _ => haystack.ends_with(needle),
            }
        }
        FilterOp::In => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| loose_eq(actual, item))),
        FilterOp::NotIn => expected
            .as_array()
            .is_none_or(|items| !items.iter().any(|item| loose_eq(actual, item))),
    }
}

fn matches_where(record: &Record, filter: &Where) -> bool {
    filter.iter().all(|(field, condition)| {
        let actual = record.get(field).unwrap_or(&Value::Null);
        match condition {
            Condition::Literal(expected) => loose_eq(actual, expected),
            Condition::Ops(ops) => ops
                .iter()
                .all(|(op, expected)| op_matches(*op, actual, expected)),
        }
    })
}

fn sort_records(records: &mut [&Record], order_by: &IndexMap<String, SortOrder>) {
    if order_by.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for (field, order) in order_by {
            let left = a.get(field).unwrap_or(&Value::Null);
            let right = b.get(field).unwrap_or(&Value::Null);
            let ordering = compare(left, right).unwrap_or(Ordering::Equal);
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn find_one(&self, entity: &Entity, filter: &Where) -> Result<Option<Value>, DriverError> {
        self.find_one_with(entity, filter, &[]).await
    }

    async fn find_one_with(
        &self,
        entity: &Entity,
        filter: &Where,
        include: &[String],
    ) -> Result<Option<Value>, DriverError> {
        let tables = self.read_tables()?;
        Ok(tables
            .get(&entity.name)
            .and_then(|rows| rows.iter().find(|row| matches_where(row, filter)))
            .map(|row| Self::embed_relations(entity, &tables, row, include)))
    }

    async fn find_many(
        &self,
        entity: &Entity,
        args: &FindManyArgs,
    ) -> Result<Vec<Value>, DriverError> {
        let tables = self.read_tables()?;
        let Some(rows) = tables.get(&entity.name) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Record> = rows.iter().filter(|row| matches_where(row, &args.filter)).collect();
        sort_records(&mut matched, &args.order_by);

        Ok(matched
            .into_iter()
            .skip(args.skip.unwrap_or(0))
            .take(args.take.unwrap_or(usize::MAX))
            .map(|row| Self::embed_relations(entity, &tables, row, &args.include))
            .collect())
    }

    async fn create(&self, entity: &Entity, data: Map<String, Value>) -> Result<Value, DriverError> {
        let mut tables = self.write_tables()?;

        let mut record = data;
        for (name, def) in &entity.config.fields {
            if let Some(default) = &def.default
                && !record.contains_key(name)
            {
                record.insert(name.clone(), default.clone());
            }
        }
        record
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        if entity.config.timestamps {
            let now = Value::String(Utc::now().to_rfc3339());
            record.insert("createdAt".to_string(), now.clone());
            record.insert("updatedAt".to_string(), now);
        }

        self.check_foreign_keys(entity, &tables, &record)?;
        let table = tables.entry(entity.name.clone()).or_default();
        Self::check_unique(entity, table, &record, None)?;

        table.push(record.clone());
        tracing::debug!(entity = %entity.name, "record created");
        Ok(Value::Object(record))
    }

    async fn update(
        &self,
        entity: &Entity,
        filter: &Where,
        data: Map<String, Value>,
    ) -> Result<Value, DriverError> {
        let mut tables = self.write_tables()?;
        let not_found = || DriverError::RecordNotFound {
            entity: entity.name.clone(),
        };

        let index = tables
            .get(&entity.name)
            .and_then(|rows| rows.iter().position(|row| matches_where(row, filter)))
            .ok_or_else(not_found)?;

        let mut record = tables
            .get(&entity.name)
            .and_then(|rows| rows.get(index))
            .cloned()
            .ok_or_else(not_found)?;
        record.extend(data);
        if entity.config.timestamps {
            record.insert(
                "updatedAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        self.check_foreign_keys(entity, &tables, &record)?;
        let table = tables.entry(entity.name.clone()).or_default();
        Self::check_unique(entity, table, &record, Some(index))?;

        table[index] = record.clone();
        Ok(Value::Object(record))
    }

    async fn delete(&self, entity: &Entity, filter: &Where) -> Result<(), DriverError> {
        let mut tables = self.write_tables()?;
        let table = tables.entry(entity.name.clone()).or_default();
        let index = table
            .iter()
            .position(|row| matches_where(row, filter))
            .ok_or_else(|| DriverError::RecordNotFound {
                entity: entity.name.clone(),
            })?;
        table.remove(index);
        Ok(())
    }

    async fn count(&self, entity: &Entity, filter: Option<&Where>) -> Result<usize, DriverError> {
        let tables = self.read_tables()?;
        Ok(tables.get(&entity.name).map_or(0, |rows| match filter {
            Some(filter) => rows.iter().filter(|row| matches_where(row, filter)).count(),
            None => rows.len(),
        }))
    }

    /// Runs `work` against a private copy of the tables and commits its changes if it succeeds
    async fn transaction(&self, work: TransactionFn) -> Result<Value, DriverError> {
        let _serial = self.tx_lock.lock().await;

        let base = self.read_tables()?.clone();
        let scoped = InMemoryDriver {
            tables: Arc::new(RwLock::new(base.clone())),
            tx_lock: Arc::default(),
            enforce_foreign_keys: self.enforce_foreign_keys,
        };
        let private = scoped.tables.clone();

        match work(Arc::new(scoped)).await {
            Ok(value) => {
                let changed = private
                    .read()
                    .map_err(|e| DriverError::Backend(anyhow!("Failed to acquire read lock: {}", e)))?
                    .clone();
                commit_changes(&mut *self.write_tables()?, &base, changed);
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

fn record_key(record: &Record) -> Option<String> {
    record.get("id").map(Value::to_string)
}

/// Apply the difference between `base` and `changed` to `live`, record by id
fn commit_changes(live: &mut Tables, base: &Tables, changed: Tables) {
    for (name, rows) in changed {
        let before: HashMap<String, &Record> = base
            .get(&name)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| record_key(row).map(|key| (key, row)))
                    .collect()
            })
            .unwrap_or_default();
        let kept: std::collections::HashSet<String> =
            rows.iter().filter_map(record_key).collect();
        let table = live.entry(name).or_default();

        table.retain(|row| {
            record_key(row).is_none_or(|key| !before.contains_key(&key) || kept.contains(&key))
        });

        for row in rows {
            let Some(key) = record_key(&row) else {
                continue;
            };
            if before.get(&key).is_some_and(|old| **old == row) {
                continue;
            }
            match table
                .iter()
                .position(|existing| record_key(existing).as_deref() == Some(key.as_str()))
            {
                Some(index) => table[index] = row,
                None => table.push(row),
            }
        }
    }
}
