use datamap_core::{
    open_db_in_memory, row, DataSource, DataSourceError, DataSourceResult, EntityManager, Mapper,
    MapperRegistry, MemoryDataSource, OrmError, QueryObject, ResultSet, Row, SqlDataSource, Value,
};

/// Fails every delete against one table and records the tables deleted from.
struct FailingDeletes<D> {
    inner: D,
    fail_table: Option<&'static str>,
    deletes: Vec<String>,
}

impl<D> FailingDeletes<D> {
    fn new(inner: D) -> Self {
        Self {
            inner,
            fail_table: None,
            deletes: Vec::new(),
        }
    }

    fn failing_on(inner: D, table: &'static str) -> Self {
        Self {
            fail_table: Some(table),
            ..Self::new(inner)
        }
    }
}

impl<D: DataSource> DataSource for FailingDeletes<D> {
    fn create(&mut self, table: &str, data: &Row) -> DataSourceResult<Value> {
        self.inner.create(table, data)
    }

    fn last_insert_id(&self) -> Option<Value> {
        self.inner.last_insert_id()
    }

    fn read(&self, table: &str, query: &QueryObject) -> DataSourceResult<ResultSet> {
        self.inner.read(table, query)
    }

    fn update(&mut self, table: &str, query: &QueryObject, data: &Row) -> DataSourceResult<u64> {
        self.inner.update(table, query, data)
    }

    fn delete(&mut self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        self.deletes.push(table.to_string());
        if self.fail_table.is_some_and(|fail| fail == table) {
            return Err(DataSourceError::Unsupported(format!("delete from {table} refused")));
        }
        self.inner.delete(table, query)
    }

    fn count(&self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        self.inner.count(table, query)
    }

    fn begin(&mut self) -> DataSourceResult<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> DataSourceResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> DataSourceResult<()> {
        self.inner.rollback()
    }
}

fn registry() -> MapperRegistry {
    MapperRegistry::new()
        .with(
            Mapper::new("user", "users")
                .has_many("posts", "post", "author_id")
                .dependent()
                .has_one("profile", "profile", "user_id")
                .dependent(),
        )
        .and_then(|registry| {
            registry.with(
                Mapper::new("post", "posts")
                    .has_many("comments", "comment", "post_id")
                    .dependent()
                    .has_and_belongs_to_many("tags", "tag", "post_tags", "post_id", "tag_id")
                    .dependent(),
            )
        })
        .and_then(|registry| registry.with(Mapper::new("comment", "comments")))
        .and_then(|registry| registry.with(Mapper::new("profile", "profiles")))
        .and_then(|registry| registry.with(Mapper::new("tag", "tags")))
        .unwrap()
}

fn seed(source: &mut impl DataSource) {
    for name in ["ada", "grace"] {
        source.create("users", &row! { "name" => name }).unwrap();
    }
    for user_id in [1, 2] {
        source
            .create("profiles", &row! { "user_id" => user_id, "bio" => "hi" })
            .unwrap();
    }
    for (title, author_id) in [("p1", 1), ("p2", 1), ("p3", 2), ("p4", 1)] {
        source
            .create("posts", &row! { "title" => title, "author_id" => author_id })
            .unwrap();
    }
    for (body, post_id) in [("c1", 1), ("c2", 2), ("c3", 3), ("c4", 4), ("c5", 1)] {
        source
            .create("comments", &row! { "body" => body, "post_id" => post_id })
            .unwrap();
    }
    for label in ["rust", "sql"] {
        source.create("tags", &row! { "label" => label }).unwrap();
    }
    for (post_id, tag_id) in [(1, 1), (1, 2), (3, 1)] {
        source
            .create("post_tags", &row! { "post_id" => post_id, "tag_id" => tag_id })
            .unwrap();
    }
}

fn seeded_memory() -> MemoryDataSource {
    let mut source = MemoryDataSource::new();
    seed(&mut source);
    source
}

fn count(source: &impl DataSource, table: &str) -> u64 {
    source.count(table, &QueryObject::new()).unwrap()
}

fn count_where(source: &impl DataSource, table: &str, criteria: Row) -> u64 {
    source
        .count(table, &QueryObject::with_criteria(criteria))
        .unwrap()
}

#[test]
fn deleting_owner_removes_every_dependent_row() {
    let mut manager = EntityManager::new(seeded_memory(), registry());

    assert!(manager.delete("user", &row! { "id" => 1 }).unwrap());

    let source = manager.source();
    assert_eq!(count_where(source, "users", row! { "id" => 1 }), 0);
    assert_eq!(count_where(source, "posts", row! { "author_id" => 1 }), 0);
    assert_eq!(count_where(source, "profiles", row! { "user_id" => 1 }), 0);
    assert_eq!(count(source, "comments"), 1);
    assert_eq!(count(source, "post_tags"), 1);

    assert_eq!(count(source, "users"), 1);
    assert_eq!(count(source, "posts"), 1);
    assert_eq!(count(source, "profiles"), 1);
    assert_eq!(count(source, "tags"), 2);
    assert!(!source.in_transaction());
}

#[test]
fn many_to_many_cascade_only_unlinks() {
    let mut manager = EntityManager::new(seeded_memory(), registry());

    assert!(manager.delete("post", &row! { "id" => 1 }).unwrap());

    let source = manager.source();
    assert_eq!(count_where(source, "post_tags", row! { "post_id" => 1 }), 0);
    assert_eq!(count(source, "post_tags"), 1);
    assert_eq!(count(source, "tags"), 2);
    assert_eq!(count_where(source, "comments", row! { "post_id" => 1 }), 0);
}

#[test]
fn dependents_go_first_and_belongs_to_targets_last() {
    let registry = MapperRegistry::new()
        .with(Mapper::new("user", "users"))
        .and_then(|registry| {
            registry.with(
                Mapper::new("post", "posts")
                    .belongs_to("author", "user", "author_id")
                    .dependent()
                    .has_many("comments", "comment", "post_id")
                    .dependent(),
            )
        })
        .and_then(|registry| registry.with(Mapper::new("comment", "comments")))
        .unwrap();
    let mut manager = EntityManager::new(FailingDeletes::new(seeded_memory()), registry);

    assert!(manager.delete("post", &row! { "id" => 3 }).unwrap());
    assert_eq!(manager.source().deletes, vec!["comments", "posts", "users"]);
    assert_eq!(count_where(manager.source(), "users", row! { "id" => 2 }), 0);
}

#[test]
fn cyclic_dependents_are_deleted_once() {
    let registry = MapperRegistry::new()
        .with(
            Mapper::new("user", "users")
                .has_many("posts", "post", "author_id")
                .dependent(),
        )
        .and_then(|registry| {
            registry.with(
                Mapper::new("post", "posts")
                    .belongs_to("author", "user", "author_id")
                    .dependent(),
            )
        })
        .unwrap();
    let mut manager = EntityManager::new(seeded_memory(), registry);

    assert!(manager.delete("post", &row! { "id" => 2 }).unwrap());

    let source = manager.source();
    assert_eq!(count_where(source, "users", row! { "name" => "ada" }), 0);
    assert_eq!(count_where(source, "posts", row! { "author_id" => 1 }), 0);
    assert_eq!(count(source, "posts"), 1);
    assert_eq!(count(source, "users"), 1);
}

#[test]
fn failure_midway_rolls_back_memory_cascade() {
    let source = FailingDeletes::failing_on(seeded_memory(), "profiles");
    let mut manager = EntityManager::new(source, registry());

    let err = manager.delete("user", &row! { "id" => 1 }).unwrap_err();
    assert!(matches!(err, OrmError::Source(DataSourceError::Unsupported(_))));

    let source = manager.source();
    assert!(source.deletes.contains(&"comments".to_string()));
    assert!(!source.inner.in_transaction());
    assert_eq!(count(source, "users"), 2);
    assert_eq!(count(source, "posts"), 4);
    assert_eq!(count(source, "comments"), 5);
    assert_eq!(count(source, "post_tags"), 3);
}

#[test]
fn failing_owner_delete_rolls_back_sql_cascade() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, bio TEXT);
         CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL, author_id INTEGER);
         CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT NOT NULL, post_id INTEGER NOT NULL);
         CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
         CREATE TABLE post_tags (id INTEGER PRIMARY KEY, post_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
         CREATE TRIGGER users_keep_ada BEFORE DELETE ON users
         WHEN OLD.name = 'ada'
         BEGIN
             SELECT RAISE(ABORT, 'ada is protected');
         END;",
    )
    .unwrap();
    let mut source = SqlDataSource::new(&conn);
    seed(&mut source);
    let mut manager = EntityManager::new(source, registry());

    let err = manager.delete("user", &row! { "id" => 1 }).unwrap_err();
    match err {
        OrmError::Source(DataSourceError::Execution { sql, source }) => {
            assert!(sql.starts_with("DELETE FROM \"users\""), "sql: {sql}");
            assert!(source.to_string().contains("ada is protected"));
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    let source = manager.source();
    assert_eq!(count(source, "users"), 2);
    assert_eq!(count(source, "posts"), 4);
    assert_eq!(count(source, "comments"), 5);
    assert_eq!(count(source, "profiles"), 2);
    assert_eq!(count(source, "post_tags"), 3);
    assert!(conn.is_autocommit());

    assert!(manager.delete("user", &row! { "id" => 2 }).unwrap());
    assert_eq!(count(manager.source(), "posts"), 3);
}

#[test]
fn missing_entity_deletes_nothing() {
    let mut manager = EntityManager::new(seeded_memory(), registry());

    assert!(!manager.delete("user", &row! { "id" => 99 }).unwrap());
    assert_eq!(count(manager.source(), "users"), 2);
    assert!(!manager.source().in_transaction());
}

#[test]
fn unresolvable_cascade_is_rejected_before_any_write() {
    let registry = MapperRegistry::new()
        .with(
            Mapper::new("user", "users")
                .has_many("posts", "post", "author_id")
                .dependent(),
        )
        .unwrap();
    let mut manager = EntityManager::new(FailingDeletes::new(seeded_memory()), registry);

    let err = manager.delete("user", &row! { "id" => 1 }).unwrap_err();
    assert!(matches!(err, OrmError::UnknownMapper(name) if name == "post"));
    assert!(manager.source().deletes.is_empty());
    assert!(!manager.source().inner.in_transaction());
}
