use datamap_core::{
    open_db_in_memory, row, DataSource, DataSourceError, JoinSpec, MemoryDataSource, QueryError,
    QueryObject, Row, SortDirection, SqlDataSource, Value,
};
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE posts (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    author_id INTEGER,
    score INTEGER NOT NULL
);
";

fn seed(source: &mut impl DataSource) {
    for name in ["ada", "grace", "barbara"] {
        source.create("users", &row! { "name" => name }).unwrap();
    }
    let posts = [
        ("Intro to sets", Value::Integer(1), 5),
        ("Compilers", Value::Integer(2), 9),
        ("Set theory", Value::Integer(1), 2),
        ("Untitled", Value::Null, 0),
        ("Abstract data", Value::Integer(3), 7),
        ("Notes", Value::Integer(4), 4),
    ];
    for (title, author_id, score) in posts {
        source
            .create(
                "posts",
                &row! { "title" => title, "author_id" => author_id, "score" => score },
            )
            .unwrap();
    }
}

struct Backends {
    conn: Connection,
    memory: MemoryDataSource,
}

impl Backends {
    fn new() -> Self {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        seed(&mut SqlDataSource::new(&conn));

        let mut memory = MemoryDataSource::new();
        seed(&mut memory);
        Self { conn, memory }
    }

    fn assert_same_read(&self, table: &str, query: &QueryObject) {
        let sql = SqlDataSource::new(&self.conn).read(table, query).unwrap();
        let memory = self.memory.read(table, query).unwrap();
        assert_eq!(sql, memory, "query: {query:?}");
    }

    fn assert_same_count(&self, table: &str, query: &QueryObject) -> u64 {
        let sql = SqlDataSource::new(&self.conn).count(table, query).unwrap();
        let memory = self.memory.count(table, query).unwrap();
        assert_eq!(sql, memory, "query: {query:?}");
        sql
    }
}

fn ordered(criteria: Row) -> QueryObject {
    let mut query = QueryObject::with_criteria(criteria);
    query.add_order("id", SortDirection::Asc);
    query
}

#[test]
fn criteria_operators_agree() {
    let backends = Backends::new();
    let cases = vec![
        row! {},
        row! { "score >" => 4 },
        row! { "score <=" => 4, "score >=" => 2 },
        row! { "author_id" => 1 },
        row! { "author_id !=" => 1 },
        row! { "author_id" => Value::Null },
        row! { "author_id !=" => Value::Null },
        row! { "author_id IN" => Value::list([1, 3]) },
        row! { "author_id NOT IN" => Value::list([1, 3]) },
        row! { "author_id IN" => Value::List(Vec::new()) },
        row! { "author_id NOT IN" => Value::List(Vec::new()) },
        row! { "score BETWEEN" => Value::list([2, 5]) },
        row! { "author_id NOT BETWEEN" => Value::list([2, 3]) },
        row! { "title LIKE" => "%set%" },
        row! { "title NOT LIKE" => "%SET%" },
        row! { "title LIKE" => "_otes" },
    ];

    for criteria in cases {
        let query = ordered(criteria);
        backends.assert_same_read("posts", &query);
        backends.assert_same_count("posts", &query);
    }
}

#[test]
fn ordering_and_windows_agree() {
    let backends = Backends::new();

    let mut query = QueryObject::new();
    query
        .add_order("score", SortDirection::Desc)
        .set_limit(3)
        .set_offset(1);
    backends.assert_same_read("posts", &query);

    let mut offset_only = QueryObject::with_criteria(row! { "score >" => 0 });
    offset_only.add_order("title", SortDirection::Asc).set_offset(2);
    backends.assert_same_read("posts", &offset_only);

    let mut past_end = QueryObject::new();
    past_end.set_limit(10).set_offset(50);
    backends.assert_same_read("posts", &past_end);
}

#[test]
fn joins_agree() {
    let backends = Backends::new();

    let mut inner = ordered(row! { "author.name LIKE" => "%a%" });
    inner.add_join(JoinSpec::inner("users").alias("author").on("author_id", "id"));
    backends.assert_same_read("posts", &inner);

    let mut left = ordered(row! {});
    left.set_fields(["title", "author.name"])
        .add_join(JoinSpec::left("users").alias("author").on("author_id", "id"));
    backends.assert_same_read("posts", &left);

    let mut unaliased = ordered(row! { "users.id <" => 3 });
    unaliased
        .set_fields(["posts.*", "users.name"])
        .add_join(JoinSpec::inner("users").on("author_id", "id"));
    backends.assert_same_read("posts", &unaliased);
}

#[test]
fn grouping_agrees() {
    let backends = Backends::new();

    let mut query = QueryObject::new();
    query
        .set_fields(["author_id"])
        .set_group(["author_id"])
        .set_having(row! { "author_id !=" => 3 })
        .add_order("author_id", SortDirection::Asc);
    backends.assert_same_read("posts", &query);
    assert_eq!(backends.assert_same_count("posts", &query), 4);
}

#[test]
fn having_without_group_is_rejected_by_both() {
    let backends = Backends::new();
    let mut query = QueryObject::new();
    query.set_having(row! { "score >" => 2 });

    let sql = SqlDataSource::new(&backends.conn);
    let results = [
        sql.read("posts", &query).map(|_| ()),
        sql.count("posts", &query).map(|_| ()),
        backends.memory.read("posts", &query).map(|_| ()),
        backends.memory.count("posts", &query).map(|_| ()),
    ];
    for result in results {
        assert!(matches!(
            result,
            Err(DataSourceError::Query(QueryError::InvalidOption { key: "having", .. }))
        ));
    }
}

#[test]
fn left_join_against_empty_table_yields_nulls() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    let mut sql = SqlDataSource::new(&conn);
    let mut memory = MemoryDataSource::new();
    for title in ["a", "b", "c"] {
        let data = row! { "title" => title, "author_id" => 1, "score" => 1 };
        sql.create("posts", &data).unwrap();
        memory.create("posts", &data).unwrap();
    }

    let mut query = ordered(row! { "author.name" => Value::Null });
    query
        .set_fields(["title", "author.name"])
        .add_join(JoinSpec::left("users").alias("author").on("author_id", "id"));

    let expected = sql.read("posts", &query).unwrap();
    assert_eq!(expected.len(), 3);
    assert_eq!(memory.read("posts", &query).unwrap(), expected);
    assert_eq!(sql.count("posts", &query).unwrap(), 3);
    assert_eq!(memory.count("posts", &query).unwrap(), 3);
    assert_eq!(
        expected.first().and_then(|row| row.lookup("author.name")),
        Some(&Value::Null)
    );
}

#[test]
fn supplied_text_key_is_reported_by_both() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE tags (slug TEXT PRIMARY KEY, label TEXT NOT NULL);")
        .unwrap();
    let mut sql = SqlDataSource::new(&conn).with_primary_key("tags", "slug");
    let mut memory = MemoryDataSource::new().with_primary_key("tags", "slug");

    let data = row! { "slug" => "rust", "label" => "Rust" };
    let expected = Value::from("rust");
    assert_eq!(sql.create("tags", &data).unwrap(), expected);
    assert_eq!(memory.create("tags", &data).unwrap(), expected);
    assert_eq!(sql.last_insert_id(), Some(expected.clone()));
    assert_eq!(memory.last_insert_id(), Some(expected));

    let all = QueryObject::new();
    assert_eq!(
        sql.read("tags", &all).unwrap(),
        memory.read("tags", &all).unwrap()
    );
}

#[test]
fn mutations_leave_identical_tables() {
    let mut backends = Backends::new();
    let everything = ordered(row! {});

    let mut window = ordered(row! { "score >" => 1 });
    window.set_limit(2).set_offset(1);
    let data = row! { "title" => "rewritten" };

    let mut sql = SqlDataSource::new(&backends.conn);
    assert_eq!(
        sql.update("posts", &window, &data).unwrap(),
        backends.memory.update("posts", &window, &data).unwrap()
    );
    backends.assert_same_read("posts", &everything);

    let mut sql = SqlDataSource::new(&backends.conn);
    let mut trailing = QueryObject::new();
    trailing.add_order("score", SortDirection::Asc).set_limit(2);
    assert_eq!(
        sql.delete("posts", &trailing).unwrap(),
        backends.memory.delete("posts", &trailing).unwrap()
    );
    backends.assert_same_read("posts", &everything);

    let mut sql = SqlDataSource::new(&backends.conn);
    let mut joined = QueryObject::with_criteria(row! { "author.name" => "ada" });
    joined.add_join(JoinSpec::inner("users").alias("author").on("author_id", "id"));
    assert_eq!(
        sql.delete("posts", &joined).unwrap(),
        backends.memory.delete("posts", &joined).unwrap()
    );
    backends.assert_same_read("posts", &everything);
}
