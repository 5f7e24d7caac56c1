//! Mapper definitions and the registry that holds them.
//!
//! # Responsibility
//! - Bind a logical entity name to its table, key field and whitelist.
//! - Hold named relations in declaration order.
//!
//! # Invariants
//! - Mapper names are unique within a registry.
//! - The primary key always passes the field whitelist.

use crate::model::row::Row;
use crate::orm::relation::RelationDescriptor;
use crate::orm::{OrmError, OrmResult};
use std::collections::BTreeMap;

const DEFAULT_PRIMARY_KEY: &str = "id";

/// Table mapping plus declared relations for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapper {
    name: String,
    table: String,
    primary_key: String,
    fields: Vec<String>,
    relations: Vec<(String, RelationDescriptor)>,
}

impl Mapper {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Restricts writes to `fields`; an empty whitelist accepts everything.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares (or replaces) the relation `name`.
    pub fn relation(mut self, name: impl Into<String>, descriptor: RelationDescriptor) -> Self {
        let name = name.into();
        match self.relations.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = descriptor,
            None => self.relations.push((name, descriptor)),
        }
        self
    }

    pub fn belongs_to(
        self,
        name: impl Into<String>,
        target_mapper: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, RelationDescriptor::belongs_to(target_mapper, foreign_key))
    }

    pub fn has_one(
        self,
        name: impl Into<String>,
        target_mapper: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, RelationDescriptor::has_one(target_mapper, foreign_key))
    }

    pub fn has_many(
        self,
        name: impl Into<String>,
        target_mapper: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, RelationDescriptor::has_many(target_mapper, foreign_key))
    }

    pub fn has_and_belongs_to_many(
        self,
        name: impl Into<String>,
        target_mapper: impl Into<String>,
        join_table: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        self.relation(
            name,
            RelationDescriptor::has_and_belongs_to_many(
                target_mapper,
                join_table,
                foreign_key,
                local_key,
            ),
        )
    }

    /// Marks the most recently declared relation as dependent.
    pub fn dependent(mut self) -> Self {
        if let Some((_, descriptor)) = self.relations.last_mut() {
            descriptor.dependent = true;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn relation_named(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDescriptor)> {
        self.relations
            .iter()
            .map(|(name, descriptor)| (name.as_str(), descriptor))
    }

    pub fn has_dependents(&self) -> bool {
        self.relations.iter().any(|(_, descriptor)| descriptor.dependent)
    }

    /// Drops every field outside the whitelist, keeping the primary key.
    pub fn filter_fields(&self, data: &Row) -> Row {
        if self.fields.is_empty() {
            return data.clone();
        }
        data.iter()
            .filter(|(field, _)| {
                *field == self.primary_key
                    || self.fields.iter().any(|allowed| allowed.as_str() == *field)
            })
            .map(|(field, value)| (field, value.clone()))
            .collect()
    }
}

/// Explicit set of mappers handed to an `EntityManager`.
#[derive(Debug, Clone, Default)]
pub struct MapperRegistry {
    mappers: BTreeMap<String, Mapper>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `mapper`, rejecting a second mapper with the same name.
    pub fn register(&mut self, mapper: Mapper) -> OrmResult<()> {
        if self.mappers.contains_key(mapper.name()) {
            return Err(OrmError::DuplicateMapper(mapper.name().to_string()));
        }
        self.mappers.insert(mapper.name().to_string(), mapper);
        Ok(())
    }

    /// Builder form of [`MapperRegistry::register`].
    pub fn with(mut self, mapper: Mapper) -> OrmResult<Self> {
        self.register(mapper)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> OrmResult<&Mapper> {
        self.mappers
            .get(name)
            .ok_or_else(|| OrmError::UnknownMapper(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mappers.keys().map(String::as_str)
    }
}
