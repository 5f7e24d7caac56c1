//! Criteria parsing and in-memory predicate evaluation.
//!
//! # Responsibility
//! - Parse `"field[ operator]" -> value` entries into typed `Predicate`s.
//! - Validate value shapes per operator once, at parse time.
//! - Evaluate predicates against a `Row` with implicit AND.
//!
//! # Invariants
//! - Every predicate has a non-empty field and exactly one operator.
//! - `IN`/`NOT IN` hold a list; `BETWEEN`/`NOT BETWEEN` hold a two-element list.
//! - Negated operators are exact complements of their positive forms,
//!   including for `null` row values.
//! - Evaluation fails when the row lacks a referenced field.

use crate::model::row::Row;
use crate::model::value::Value;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CriteriaResult<T> = Result<T, CriteriaError>;

/// Malformed criteria or missing fields during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    /// Criteria key has no field name.
    EmptyField,
    /// Trailing token of a criteria key is not a known operator.
    UnknownOperator { expression: String },
    /// Value shape is not accepted by the operator.
    InvalidValue {
        field: String,
        operator: Operator,
        expected: &'static str,
    },
    /// Row passed to evaluation lacks a referenced field.
    MissingField(String),
}

impl Display for CriteriaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField => write!(f, "no key provided in criteria"),
            Self::UnknownOperator { expression } => {
                write!(f, "unknown operator in criteria expression `{expression}`")
            }
            Self::InvalidValue {
                field,
                operator,
                expected,
            } => write!(
                f,
                "criteria `{field} {operator}` expects {expected}"
            ),
            Self::MissingField(field) => write!(f, "missing key `{field}` in row"),
        }
    }
}

impl Error for CriteriaError {}

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    NotBetween,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parses an operator keyword as written in a criteria key.
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized = token
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        match normalized.as_str() {
            "=" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Neq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            "IN" => Some(Self::In),
            "NOT IN" => Some(Self::NotIn),
            "BETWEEN" => Some(Self::Between),
            "NOT BETWEEN" => Some(Self::NotBetween),
            "LIKE" => Some(Self::Like),
            "NOT LIKE" => Some(Self::NotLike),
            _ => None,
        }
    }

    /// SQL keyword for this operator.
    pub fn sql_token(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT BETWEEN",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Returns whether this operator is the negation of another one.
    pub fn is_negated(self) -> bool {
        matches!(
            self,
            Self::Neq | Self::NotIn | Self::NotBetween | Self::NotLike | Self::IsNotNull
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_token())
    }
}

/// One validated field/operator/value condition.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: String,
    operator: Operator,
    value: Value,
    pattern: Option<Regex>,
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.operator == other.operator && self.value == other.value
    }
}

impl Predicate {
    /// Parses one criteria entry such as `("id >", 1000)`.
    pub fn parse(key: &str, value: &Value) -> CriteriaResult<Self> {
        let (field, operator) = split_key(key)?;
        Self::new(field, operator.unwrap_or(Operator::Eq), value.clone())
    }

    /// Builds a predicate from parts, applying the same validation and
    /// `null`/list sugar as [`Predicate::parse`].
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> CriteriaResult<Self> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(CriteriaError::EmptyField);
        }
        let (operator, value) = normalize(&field, operator, value.into())?;
        let pattern = match operator {
            Operator::Like | Operator::NotLike => Some(compile_like(&field, operator, &value)?),
            _ => None,
        };

        Ok(Self {
            field,
            operator,
            value,
            pattern,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns a copy bound to a different field name.
    pub fn with_field(&self, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..self.clone()
        }
    }

    /// Number of parameters this predicate binds when rendered as SQL.
    pub fn bound_value_count(&self) -> usize {
        match self.operator {
            Operator::IsNull | Operator::IsNotNull => 0,
            Operator::In | Operator::NotIn | Operator::Between | Operator::NotBetween => {
                self.value.as_list().map_or(0, <[Value]>::len)
            }
            _ => 1,
        }
    }

    /// Evaluates this predicate against `row`.
    pub fn matches(&self, row: &Row) -> CriteriaResult<bool> {
        let actual = row
            .lookup(&self.field)
            .ok_or_else(|| CriteriaError::MissingField(self.field.clone()))?;
        Ok(self.evaluate(actual))
    }

    fn evaluate(&self, actual: &Value) -> bool {
        match self.operator {
            Operator::Eq => actual.sql_eq(&self.value),
            Operator::Neq => !actual.sql_eq(&self.value),
            Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => self.in_list(actual),
            Operator::NotIn => !self.in_list(actual),
            Operator::Between => self.in_range(actual),
            Operator::NotBetween => !self.in_range(actual),
            Operator::Like => self.like(actual),
            Operator::NotLike => !self.like(actual),
            Operator::IsNull => actual.is_null(),
            Operator::IsNotNull => !actual.is_null(),
        }
    }

    fn in_list(&self, actual: &Value) -> bool {
        self.value
            .as_list()
            .is_some_and(|items| items.iter().any(|item| actual.sql_eq(item)))
    }

    fn in_range(&self, actual: &Value) -> bool {
        match self.value.as_list() {
            Some([low, high]) => {
                matches!(
                    compare(actual, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            _ => false,
        }
    }

    fn like(&self, actual: &Value) -> bool {
        match (&self.pattern, actual.to_match_text()) {
            (Some(pattern), Some(text)) => pattern.is_match(&text),
            _ => false,
        }
    }
}

/// Parses a criteria map into predicates, preserving entry order.
pub fn parse(conditions: &Row) -> CriteriaResult<Vec<Predicate>> {
    conditions
        .iter()
        .map(|(key, value)| Predicate::parse(key, value))
        .collect()
}

/// Evaluates all predicates against `row` with implicit AND.
///
/// Every referenced field must be present, even when an earlier predicate
/// already failed.
pub fn matches(predicates: &[Predicate], row: &Row) -> CriteriaResult<bool> {
    if let Some(missing) = predicates
        .iter()
        .find(|predicate| row.lookup(predicate.field()).is_none())
    {
        return Err(CriteriaError::MissingField(missing.field.clone()));
    }

    for predicate in predicates {
        if !predicate.matches(row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if actual.is_null() || expected.is_null() {
        return None;
    }
    Some(actual.sql_cmp(expected))
}

fn split_key(key: &str) -> CriteriaResult<(String, Option<Operator>)> {
    let tokens = key.split_whitespace().collect::<Vec<_>>();
    let count = tokens.len();
    if count == 0 {
        return Err(CriteriaError::EmptyField);
    }

    if count >= 2 {
        let pair = format!("{} {}", tokens[count - 2], tokens[count - 1]);
        if let Some(operator) = Operator::from_token(&pair) {
            if count == 2 {
                return Err(CriteriaError::EmptyField);
            }
            return Ok((tokens[..count - 2].join(" "), Some(operator)));
        }
    }

    if let Some(operator) = Operator::from_token(tokens[count - 1]) {
        if count == 1 {
            // A lone word such as `in` or `like` names a column.
            if tokens[0].chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Ok((tokens[0].to_string(), None));
            }
            return Err(CriteriaError::EmptyField);
        }
        return Ok((tokens[..count - 1].join(" "), Some(operator)));
    }

    // Function calls such as `COALESCE(a, b)` may contain spaces.
    if count == 1 || key.trim_end().ends_with(')') {
        return Ok((tokens.join(" "), None));
    }

    Err(CriteriaError::UnknownOperator {
        expression: key.to_string(),
    })
}

fn normalize(field: &str, operator: Operator, value: Value) -> CriteriaResult<(Operator, Value)> {
    let invalid = |expected: &'static str| CriteriaError::InvalidValue {
        field: field.to_string(),
        operator,
        expected,
    };

    match operator {
        Operator::Eq | Operator::Neq => match value {
            Value::Null if operator == Operator::Eq => Ok((Operator::IsNull, Value::Null)),
            Value::Null => Ok((Operator::IsNotNull, Value::Null)),
            Value::List(items) => {
                if items.len() != 1 || items[0].is_composite() {
                    return Err(invalid("a scalar, null or single-element list value"));
                }
                let list_operator = if operator == Operator::Eq {
                    Operator::In
                } else {
                    Operator::NotIn
                };
                Ok((list_operator, Value::List(items)))
            }
            Value::Map(_) => Err(invalid("a scalar, null or list value")),
            scalar => Ok((operator, scalar)),
        },
        Operator::In | Operator::NotIn => match value {
            Value::List(items) => {
                ensure_scalars(&items).map_err(|_| invalid("a list of scalar values"))?;
                Ok((operator, Value::List(items)))
            }
            _ => Err(invalid("a list value")),
        },
        Operator::Between | Operator::NotBetween => match value {
            Value::List(items) if items.len() == 2 => {
                ensure_scalars(&items).map_err(|_| invalid("a list of exactly two values"))?;
                Ok((operator, Value::List(items)))
            }
            _ => Err(invalid("a list of exactly two values")),
        },
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if value.is_composite() {
                return Err(invalid("a scalar value"));
            }
            Ok((operator, value))
        }
        Operator::Like | Operator::NotLike => {
            if value.is_composite() || value.is_null() {
                return Err(invalid("a text pattern"));
            }
            Ok((operator, value))
        }
        Operator::IsNull | Operator::IsNotNull => Ok((operator, Value::Null)),
    }
}

fn ensure_scalars(items: &[Value]) -> Result<(), ()> {
    if items.iter().any(Value::is_composite) {
        return Err(());
    }
    Ok(())
}

/// Translates SQL wildcards into an anchored, case-insensitive regex.
fn compile_like(field: &str, operator: Operator, pattern: &Value) -> CriteriaResult<Regex> {
    let invalid = || CriteriaError::InvalidValue {
        field: field.to_string(),
        operator,
        expected: "a text pattern",
    };
    let text = pattern.to_match_text().ok_or_else(invalid)?;

    let mut expression = String::with_capacity(text.len() + 8);
    expression.push('^');
    for ch in text.chars() {
        match ch {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');

    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::{parse, split_key, CriteriaError, Operator, Predicate};
    use crate::model::value::Value;
    use crate::row;

    #[test]
    fn split_key_recognizes_single_and_double_word_operators() {
        assert_eq!(
            split_key("id >=").unwrap(),
            ("id".to_string(), Some(Operator::Gte))
        );
        assert_eq!(
            split_key("status  not   in").unwrap(),
            ("status".to_string(), Some(Operator::NotIn))
        );
        assert_eq!(split_key("title").unwrap(), ("title".to_string(), None));
        assert_eq!(
            split_key("COUNT(*) >").unwrap(),
            ("COUNT(*)".to_string(), Some(Operator::Gt))
        );
    }

    #[test]
    fn split_key_rejects_unknown_operator_and_empty_field() {
        assert_eq!(
            split_key("id ~=").unwrap_err(),
            CriteriaError::UnknownOperator {
                expression: "id ~=".to_string()
            }
        );
        assert_eq!(split_key("   ").unwrap_err(), CriteriaError::EmptyField);
        assert_eq!(split_key(">").unwrap_err(), CriteriaError::EmptyField);
    }

    #[test]
    fn lone_operator_word_is_a_field_name() {
        assert_eq!(split_key("like").unwrap(), ("like".to_string(), None));
        assert_eq!(split_key("between").unwrap(), ("between".to_string(), None));

        let predicate = Predicate::parse("in", &Value::from("stock")).unwrap();
        assert_eq!(predicate.field(), "in");
        assert_eq!(predicate.operator(), Operator::Eq);
        assert!(predicate.matches(&row! { "in" => "stock" }).unwrap());
    }

    #[test]
    fn null_and_list_sugar_for_equality() {
        let is_null = Predicate::parse("deleted_at", &Value::Null).unwrap();
        assert_eq!(is_null.operator(), Operator::IsNull);

        let not_null = Predicate::parse("deleted_at !=", &Value::Null).unwrap();
        assert_eq!(not_null.operator(), Operator::IsNotNull);

        let in_list = Predicate::parse("id", &Value::list([3])).unwrap();
        assert_eq!(in_list.operator(), Operator::In);

        let not_in = Predicate::parse("id <>", &Value::list([3])).unwrap();
        assert_eq!(not_in.operator(), Operator::NotIn);
    }

    #[test]
    fn like_pattern_is_anchored_and_translates_wildcards() {
        let predicate = Predicate::parse("name LIKE", &Value::from("a_c%")).unwrap();
        assert!(predicate.evaluate(&Value::from("abcdef")));
        assert!(predicate.evaluate(&Value::from("ABC")));
        assert!(!predicate.evaluate(&Value::from("xabc")));
        assert!(!predicate.evaluate(&Value::from("ac")));
    }

    #[test]
    fn like_escapes_regex_metacharacters() {
        let predicate = Predicate::parse("path LIKE", &Value::from("a.b%")).unwrap();
        assert!(predicate.evaluate(&Value::from("a.bc")));
        assert!(!predicate.evaluate(&Value::from("axbc")));
    }

    #[test]
    fn parse_preserves_entry_order() {
        let predicates = parse(&row! { "b" => 1, "a >" => 2 }).unwrap();
        let fields = predicates.iter().map(Predicate::field).collect::<Vec<_>>();
        assert_eq!(fields, vec!["b", "a"]);
    }

    #[test]
    fn bound_value_count_follows_operator_shape() {
        let between = Predicate::parse("age BETWEEN", &Value::list([1, 9])).unwrap();
        let in_list = Predicate::parse("id IN", &Value::list([1, 2, 3])).unwrap();
        let is_null = Predicate::parse("id", &Value::Null).unwrap();

        assert_eq!(between.bound_value_count(), 2);
        assert_eq!(in_list.bound_value_count(), 3);
        assert_eq!(is_null.bound_value_count(), 0);
    }
}
