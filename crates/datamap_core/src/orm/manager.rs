//! Mapper-level entity API with eager loading and cascading deletes.
//!
//! # Responsibility
//! - Resolve `with` relations through one batched read per relation.
//! - Apply mapper field whitelists to writes.
//! - Run dependent deletes and the owner delete inside one unit of work.
//!
//! # Invariants
//! - Eager loading never issues per-row queries; `has_and_belongs_to_many`
//!   issues exactly two (join table, then targets), every other kind one.
//! - Related rows keep the order the target read returned them in.
//! - Cascades either remove the owner and every dependent row or nothing.
//! - `has_and_belongs_to_many` cascades only touch the join table.

use crate::model::row::{ResultSet, Row};
use crate::model::value::Value;
use crate::orm::mapper::{Mapper, MapperRegistry};
use crate::orm::relation::{RelationDescriptor, RelationKind};
use crate::orm::unit_of_work::UnitOfWork;
use crate::orm::{OrmError, OrmResult};
use crate::query::plan::QueryPlan;
use crate::query::query_object::QueryObject;
use crate::source::DataSource;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Entry point combining one data source with an explicit mapper registry.
pub struct EntityManager<D: DataSource> {
    source: D,
    mappers: MapperRegistry,
}

impl<D: DataSource> EntityManager<D> {
    pub fn new(source: D, mappers: MapperRegistry) -> Self {
        Self { source, mappers }
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }

    pub fn mappers(&self) -> &MapperRegistry {
        &self.mappers
    }

    pub fn into_source(self) -> D {
        self.source
    }

    /// Returns a handle bound to one mapper.
    pub fn repository(&mut self, mapper: &str) -> OrmResult<Repository<'_, D>> {
        self.mappers.get(mapper)?;
        Ok(Repository {
            manager: self,
            mapper: mapper.to_string(),
        })
    }

    /// First row matching `query`, with requested relations attached.
    ///
    /// A query without `limit` is restricted to one row.
    pub fn get(&self, mapper: &str, query: &QueryObject) -> OrmResult<Option<Row>> {
        let mut query = query.clone();
        if query.limit().is_none() {
            query.set_limit(1);
        }
        Ok(self.get_all(mapper, &query)?.into_rows().into_iter().next())
    }

    pub fn get_by(&self, mapper: &str, criteria: Row, options: Row) -> OrmResult<Option<Row>> {
        self.get(mapper, &QueryObject::from_parts(criteria, options))
    }

    /// Reads every matching row and resolves the relations named in `with`.
    ///
    /// # Errors
    /// - `OrmError::UnknownRelation` when `with` names an undeclared relation.
    /// - `OrmError::Source` for malformed queries and backend failures.
    pub fn get_all(&self, mapper: &str, query: &QueryObject) -> OrmResult<ResultSet> {
        let mapper = self.mappers.get(mapper)?;
        let plan = QueryPlan::from_query(mapper.table(), query)?;

        let mut relations = Vec::with_capacity(plan.with.len());
        for name in &plan.with {
            let descriptor = mapper.relation_named(name).ok_or_else(|| {
                OrmError::UnknownRelation {
                    mapper: mapper.name().to_string(),
                    relation: name.clone(),
                }
            })?;
            self.mappers.get(&descriptor.target_mapper)?;
            if descriptor.kind == RelationKind::HasAndBelongsToMany {
                link_columns(mapper, name, descriptor)?;
            }
            let key = match descriptor.kind {
                RelationKind::BelongsTo => descriptor.foreign_key.as_str(),
                _ => mapper.primary_key(),
            };
            if !projects_field(&plan.fields, mapper.table(), key) {
                return Err(OrmError::MissingRelationKey {
                    mapper: mapper.name().to_string(),
                    relation: name.clone(),
                    field: key.to_string(),
                });
            }
            relations.push((name.as_str(), descriptor));
        }

        let mut rows = self.source.read(mapper.table(), query)?.into_rows();
        for (name, descriptor) in relations {
            self.load_relation(mapper, name, descriptor, &mut rows)?;
        }
        Ok(ResultSet::new(rows))
    }

    pub fn count(&self, mapper: &str, query: &QueryObject) -> OrmResult<u64> {
        let mapper = self.mappers.get(mapper)?;
        Ok(self.source.count(mapper.table(), query)?)
    }

    /// Inserts the whitelisted part of `data` and returns the new key.
    pub fn create(&mut self, mapper: &str, data: &Row) -> OrmResult<Value> {
        let mapper = self.mappers.get(mapper)?;
        let data = mapper.filter_fields(data);
        Ok(self.source.create(mapper.table(), &data)?)
    }

    /// Updates matching rows with the whitelisted part of `data`.
    pub fn update(&mut self, mapper: &str, query: &QueryObject, data: &Row) -> OrmResult<u64> {
        let mapper = self.mappers.get(mapper)?;
        let data = mapper.filter_fields(data);
        Ok(self.source.update(mapper.table(), query, &data)?)
    }

    /// Deletes `entity` and its dependent relations in one transaction.
    ///
    /// Returns `false` when no row with the entity's key exists. Only the
    /// owner row counts; dependents removed along the way do not.
    ///
    /// # Errors
    /// - `OrmError::MissingPrimaryKey` when `entity` has no key value.
    /// - Backend failures after rollback of the whole cascade.
    pub fn delete(&mut self, mapper: &str, entity: &Row) -> OrmResult<bool> {
        let mapper = self.mappers.get(mapper)?;
        let key = entity
            .get(mapper.primary_key())
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| OrmError::MissingPrimaryKey {
                mapper: mapper.name().to_string(),
            })?;
        validate_cascade(&self.mappers, mapper, &mut HashSet::new())?;

        let mut uow = UnitOfWork::begin(&mut self.source)?;
        let deleted = delete_entity(
            &self.mappers,
            uow.source(),
            mapper,
            &key,
            &mut HashSet::new(),
        )?;
        uow.commit()?;

        debug!(
            "event=entity_delete module=orm status=ok mapper={} deleted={}",
            mapper.name(),
            deleted
        );
        Ok(deleted > 0)
    }

    fn load_relation(
        &self,
        owner: &Mapper,
        name: &str,
        descriptor: &RelationDescriptor,
        rows: &mut [Row],
    ) -> OrmResult<()> {
        let target = self.mappers.get(&descriptor.target_mapper)?;

        match descriptor.kind {
            RelationKind::BelongsTo => {
                let keys = distinct_values(rows.iter(), &descriptor.foreign_key);
                let key_count = keys.len();
                let related = self.read_by_keys(target.table(), target.primary_key(), keys)?;
                let by_key = group_by_key(&related, target.primary_key());

                for row in rows.iter_mut() {
                    let value = key_of(row, &descriptor.foreign_key)
                        .and_then(|key| by_key.get(&key))
                        .and_then(|matches| matches.first())
                        .map(|related| Value::Map((*related).clone()))
                        .unwrap_or(Value::Null);
                    row.insert(name, value);
                }
                log_batch(owner, name, key_count, related.len());
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let keys = distinct_values(rows.iter(), owner.primary_key());
                let key_count = keys.len();
                let related = self.read_by_keys(target.table(), &descriptor.foreign_key, keys)?;
                let by_owner = group_by_key(&related, &descriptor.foreign_key);

                for row in rows.iter_mut() {
                    let matches = key_of(row, owner.primary_key())
                        .and_then(|key| by_owner.get(&key))
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let value = if descriptor.kind == RelationKind::HasOne {
                        matches
                            .first()
                            .map(|related| Value::Map((*related).clone()))
                            .unwrap_or(Value::Null)
                    } else {
                        Value::List(
                            matches
                                .iter()
                                .map(|related| Value::Map((*related).clone()))
                                .collect(),
                        )
                    };
                    row.insert(name, value);
                }
                log_batch(owner, name, key_count, related.len());
            }
            RelationKind::HasAndBelongsToMany => {
                let (join_table, owner_column, target_column) =
                    link_columns(owner, name, descriptor)?;

                let owner_keys = distinct_values(rows.iter(), owner.primary_key());
                let key_count = owner_keys.len();
                let links = self.read_by_keys(join_table, owner_column, owner_keys)?;

                let mut linked: HashMap<String, HashSet<String>> = HashMap::new();
                for link in &links {
                    if let (Some(owner_key), Some(target_key)) =
                        (key_of(link, owner_column), key_of(link, target_column))
                    {
                        linked.entry(owner_key).or_default().insert(target_key);
                    }
                }

                let target_keys = distinct_values(links.iter(), target_column);
                let related = self.read_by_keys(target.table(), target.primary_key(), target_keys)?;

                for row in rows.iter_mut() {
                    let targets = key_of(row, owner.primary_key())
                        .and_then(|key| linked.get(&key))
                        .map(|keys| {
                            related
                                .iter()
                                .filter(|candidate| {
                                    key_of(candidate, target.primary_key())
                                        .is_some_and(|key| keys.contains(&key))
                                })
                                .map(|candidate| Value::Map(candidate.clone()))
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    row.insert(name, Value::List(targets));
                }
                log_batch(owner, name, key_count, related.len());
            }
        }
        Ok(())
    }

    fn read_by_keys(&self, table: &str, field: &str, keys: Vec<Value>) -> OrmResult<Vec<Row>> {
        let query = in_query(field, keys);
        Ok(self.source.read(table, &query)?.into_rows())
    }
}

/// Mapper-bound view over an `EntityManager`.
pub struct Repository<'m, D: DataSource> {
    manager: &'m mut EntityManager<D>,
    mapper: String,
}

impl<D: DataSource> Repository<'_, D> {
    pub fn mapper_name(&self) -> &str {
        &self.mapper
    }

    pub fn get(&self, query: &QueryObject) -> OrmResult<Option<Row>> {
        self.manager.get(&self.mapper, query)
    }

    pub fn get_by(&self, criteria: Row, options: Row) -> OrmResult<Option<Row>> {
        self.manager.get_by(&self.mapper, criteria, options)
    }

    pub fn get_all(&self, query: &QueryObject) -> OrmResult<ResultSet> {
        self.manager.get_all(&self.mapper, query)
    }

    pub fn count(&self, query: &QueryObject) -> OrmResult<u64> {
        self.manager.count(&self.mapper, query)
    }

    pub fn create(&mut self, data: &Row) -> OrmResult<Value> {
        self.manager.create(&self.mapper, data)
    }

    pub fn update(&mut self, query: &QueryObject, data: &Row) -> OrmResult<u64> {
        self.manager.update(&self.mapper, query, data)
    }

    pub fn delete(&mut self, entity: &Row) -> OrmResult<bool> {
        self.manager.delete(&self.mapper, entity)
    }
}

fn delete_entity<S: DataSource + ?Sized>(
    registry: &MapperRegistry,
    source: &mut S,
    mapper: &Mapper,
    key: &Value,
    visited: &mut HashSet<(String, String)>,
) -> OrmResult<u64> {
    let Some(index_key) = key.index_key() else {
        return Ok(0);
    };
    if !visited.insert((mapper.table().to_string(), index_key)) {
        return Ok(0);
    }

    let scope = equals_query(mapper.primary_key(), key.clone());
    let Some(owner) = source.read(mapper.table(), &scope)?.into_rows().into_iter().next() else {
        return Ok(0);
    };

    // The owner holds the key of a belongs_to target, so those go last.
    let (after, before): (Vec<_>, Vec<_>) = mapper
        .relations()
        .filter(|(_, descriptor)| descriptor.dependent)
        .partition(|(_, descriptor)| descriptor.kind == RelationKind::BelongsTo);

    for (name, descriptor) in before {
        delete_dependents(registry, source, mapper, name, descriptor, &owner, visited)?;
    }
    let deleted = source.delete(mapper.table(), &scope)?;
    for (name, descriptor) in after {
        delete_dependents(registry, source, mapper, name, descriptor, &owner, visited)?;
    }
    Ok(deleted)
}

fn delete_dependents<S: DataSource + ?Sized>(
    registry: &MapperRegistry,
    source: &mut S,
    owner_mapper: &Mapper,
    name: &str,
    descriptor: &RelationDescriptor,
    owner: &Row,
    visited: &mut HashSet<(String, String)>,
) -> OrmResult<()> {
    let target = registry.get(&descriptor.target_mapper)?;

    match descriptor.kind {
        RelationKind::BelongsTo => {
            if let Some(key) = owner.get(&descriptor.foreign_key).filter(|value| !value.is_null()) {
                let removed = delete_entity(registry, source, target, key, visited)?;
                log_cascade(owner_mapper, name, removed);
            }
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let Some(owner_key) = owner.get(owner_mapper.primary_key()).cloned() else {
                return Ok(());
            };
            let scope = equals_query(&descriptor.foreign_key, owner_key);

            let removed = if target.has_dependents() {
                let children = source.read(target.table(), &scope)?;
                let mut removed = 0;
                for child in children.iter() {
                    if let Some(child_key) = child.get(target.primary_key()) {
                        removed += delete_entity(registry, source, target, child_key, visited)?;
                    }
                }
                removed
            } else {
                source.delete(target.table(), &scope)?
            };
            log_cascade(owner_mapper, name, removed);
        }
        RelationKind::HasAndBelongsToMany => {
            let (join_table, owner_column, _) = link_columns(owner_mapper, name, descriptor)?;
            let Some(owner_key) = owner.get(owner_mapper.primary_key()).cloned() else {
                return Ok(());
            };
            let removed = source.delete(join_table, &equals_query(owner_column, owner_key))?;
            log_cascade(owner_mapper, name, removed);
        }
    }
    Ok(())
}

/// Checks every mapper a cascade can reach before the transaction opens.
fn validate_cascade<'r>(
    registry: &'r MapperRegistry,
    mapper: &'r Mapper,
    seen: &mut HashSet<&'r str>,
) -> OrmResult<()> {
    if !seen.insert(mapper.name()) {
        return Ok(());
    }
    for (name, descriptor) in mapper.relations() {
        if !descriptor.dependent {
            continue;
        }
        let target = registry.get(&descriptor.target_mapper)?;
        if descriptor.kind == RelationKind::HasAndBelongsToMany {
            link_columns(mapper, name, descriptor)?;
        } else {
            validate_cascade(registry, target, seen)?;
        }
    }
    Ok(())
}

/// Join table, owner column and target column of a habtm relation.
fn link_columns<'d>(
    mapper: &Mapper,
    name: &str,
    descriptor: &'d RelationDescriptor,
) -> OrmResult<(&'d str, &'d str, &'d str)> {
    let invalid = |message: &str| OrmError::InvalidRelation {
        mapper: mapper.name().to_string(),
        relation: name.to_string(),
        message: message.to_string(),
    };
    let join_table = descriptor
        .join_table
        .as_deref()
        .ok_or_else(|| invalid("join table is required"))?;
    let target_column = descriptor
        .local_key
        .as_deref()
        .ok_or_else(|| invalid("local key is required"))?;
    Ok((join_table, descriptor.foreign_key.as_str(), target_column))
}

/// Whether a read projected through `fields` yields `field` at the top level.
fn projects_field(fields: &[String], table: &str, field: &str) -> bool {
    if fields.is_empty() {
        return true;
    }
    let qualified = format!("{table}.{field}");
    let table_wildcard = format!("{table}.*");
    fields.iter().any(|entry| {
        let entry = entry.trim();
        let output = entry
            .rsplit_once(" AS ")
            .or_else(|| entry.rsplit_once(" as "))
            .map_or(entry, |(_, alias)| alias.trim());
        entry == "*" || entry == table_wildcard || output == field || output == qualified
    })
}

fn key_of(row: &Row, field: &str) -> Option<String> {
    row.lookup(field).and_then(Value::index_key)
}

fn distinct_values<'a>(rows: impl Iterator<Item = &'a Row>, field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for row in rows {
        if let Some(value) = row.lookup(field) {
            if let Some(key) = value.index_key() {
                if seen.insert(key) {
                    values.push(value.clone());
                }
            }
        }
    }
    values
}

fn group_by_key<'a>(rows: &'a [Row], field: &str) -> HashMap<String, Vec<&'a Row>> {
    let mut grouped: HashMap<String, Vec<&'a Row>> = HashMap::new();
    for row in rows {
        if let Some(key) = key_of(row, field) {
            grouped.entry(key).or_default().push(row);
        }
    }
    grouped
}

fn in_query(field: &str, keys: Vec<Value>) -> QueryObject {
    let mut criteria = Row::new();
    criteria.insert(format!("{field} IN"), Value::List(keys));
    QueryObject::with_criteria(criteria)
}

fn equals_query(field: &str, value: Value) -> QueryObject {
    let mut criteria = Row::new();
    criteria.insert(field, value);
    QueryObject::with_criteria(criteria)
}

fn log_batch(owner: &Mapper, relation: &str, keys: usize, rows: usize) {
    debug!(
        "event=eager_load module=orm status=ok mapper={} relation={} keys={} rows={}",
        owner.name(),
        relation,
        keys,
        rows
    );
}

fn log_cascade(owner: &Mapper, relation: &str, removed: u64) {
    debug!(
        "event=cascade_delete module=orm status=ok mapper={} relation={} removed={}",
        owner.name(),
        relation,
        removed
    );
}
