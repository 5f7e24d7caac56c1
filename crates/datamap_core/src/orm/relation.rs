//! Relation descriptors declared on mappers.

use std::fmt::{Display, Formatter};

/// Cardinality and key placement of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Owner row holds `foreign_key` pointing at the target's primary key.
    BelongsTo,
    /// Target rows hold `foreign_key` pointing at the owner; at most one.
    HasOne,
    /// Target rows hold `foreign_key` pointing at the owner.
    HasMany,
    /// A join table links owner and target keys.
    HasAndBelongsToMany,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }

    /// Returns whether the relation resolves to a list instead of one row.
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::HasAndBelongsToMany)
    }
}

impl Display for RelationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared association from an owner mapper to a target mapper.
///
/// For `HasAndBelongsToMany`, `join_table` holds the link rows:
/// `foreign_key` is the join-table column referencing the owner and
/// `local_key` is the join-table column referencing the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub target_mapper: String,
    pub foreign_key: String,
    pub local_key: Option<String>,
    pub join_table: Option<String>,
    pub dependent: bool,
}

impl RelationDescriptor {
    pub fn belongs_to(target_mapper: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::simple(RelationKind::BelongsTo, target_mapper, foreign_key)
    }

    pub fn has_one(target_mapper: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::simple(RelationKind::HasOne, target_mapper, foreign_key)
    }

    pub fn has_many(target_mapper: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::simple(RelationKind::HasMany, target_mapper, foreign_key)
    }

    pub fn has_and_belongs_to_many(
        target_mapper: impl Into<String>,
        join_table: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::HasAndBelongsToMany,
            target_mapper: target_mapper.into(),
            foreign_key: foreign_key.into(),
            local_key: Some(local_key.into()),
            join_table: Some(join_table.into()),
            dependent: false,
        }
    }

    /// Marks related rows for deletion together with their owner.
    pub fn dependent(mut self) -> Self {
        self.dependent = true;
        self
    }

    fn simple(
        kind: RelationKind,
        target_mapper: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target_mapper: target_mapper.into(),
            foreign_key: foreign_key.into(),
            local_key: None,
            join_table: None,
            dependent: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RelationDescriptor, RelationKind};

    #[test]
    fn habtm_carries_join_table_and_both_keys() {
        let relation =
            RelationDescriptor::has_and_belongs_to_many("tags", "posts_tags", "post_id", "tag_id")
                .dependent();

        assert_eq!(relation.kind, RelationKind::HasAndBelongsToMany);
        assert_eq!(relation.join_table.as_deref(), Some("posts_tags"));
        assert_eq!(relation.local_key.as_deref(), Some("tag_id"));
        assert!(relation.dependent);
        assert!(relation.kind.is_collection());
    }

    #[test]
    fn belongs_to_is_single_valued() {
        let relation = RelationDescriptor::belongs_to("users", "author_id");
        assert!(!relation.kind.is_collection());
        assert!(!relation.dependent);
        assert_eq!(relation.join_table, None);
    }
}
