//! Composable queries over a snapshot of records.
//!
//! Builders only describe the query; terminals evaluate it in the fixed
//! order filter -> sort -> offset -> limit -> project.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use plangraph_schema::Record;
use serde_json::Value;

type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct SortKey {
    field: String,
    descending: bool,
}

/// Query over an immutable snapshot.
///
/// ```
/// # use std::sync::Arc;
/// # use plangraph::Query;
/// # use plangraph_schema::Record;
/// # use serde_json::json;
/// let records = vec![
///     Arc::new(Record::from_value(json!({"id": "2", "name": "b", "score": 2})).unwrap()),
///     Arc::new(Record::from_value(json!({"id": "1", "name": "a", "score": 1})).unwrap()),
/// ];
/// let names: Vec<_> = Query::new(records)
///     .sort_by("name")
///     .execute()
///     .iter()
///     .map(|r| r.get_str("name").unwrap().to_string())
///     .collect();
/// assert_eq!(names, ["a", "b"]);
/// ```
#[derive(Clone)]
pub struct Query {
    records: Arc<Vec<Arc<Record>>>,
    filters: Vec<Predicate>,
    sort: Vec<SortKey>,
    offset: usize,
    limit: Option<usize>,
    select: Option<Vec<String>>,
}

static NULL: Value = Value::Null;

fn field_value<'a>(record: &'a Record, field: &str) -> &'a Value {
    record.get(field).unwrap_or(&NULL)
}

impl Query {
    pub fn new(records: Vec<Arc<Record>>) -> Self {
        Self {
            records: Arc::new(records),
            filters: Vec::new(),
            sort: Vec::new(),
            offset: 0,
            limit: None,
            select: None,
        }
    }

    // ── Filters ─────────────────────────────────────────────────────────

    /// Keep records matching an arbitrary predicate.
    pub fn where_fn<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(predicate));
        self
    }

    /// `field == value`. A missing field compares as `null`.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        self.where_fn(move |r| values_equal(field_value(r, &field), &value))
    }

    pub fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        self.where_fn(move |r| !values_equal(field_value(r, &field), &value))
    }

    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let field = field.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_fn(move |r| {
            let v = field_value(r, &field);
            values.iter().any(|candidate| values_equal(v, candidate))
        })
    }

    pub fn where_not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let field = field.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_fn(move |r| {
            let v = field_value(r, &field);
            !values.iter().any(|candidate| values_equal(v, candidate))
        })
    }

    /// Case-insensitive substring match on strings; on arrays, a
    /// case-insensitive match against any string element.
    pub fn where_contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        let field = field.into();
        let needle = needle.into().to_lowercase();
        self.where_fn(move |r| match field_value(r, &field) {
            Value::String(s) => s.to_lowercase().contains(&needle),
            Value::Array(items) => items.iter().any(|item| match item {
                Value::String(s) => s.to_lowercase() == needle,
                other => other.to_string() == needle,
            }),
            _ => false,
        })
    }

    /// Field is present and not `null`.
    pub fn where_exists(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.where_fn(move |r| !field_value(r, &field).is_null())
    }

    // ── Ordering & paging ───────────────────────────────────────────────

    /// Sort ascending by `field`, replacing any previous ordering.
    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort = vec![SortKey {
            field: field.into(),
            descending: false,
        }];
        self
    }

    pub fn sort_by_desc(mut self, field: impl Into<String>) -> Self {
        self.sort = vec![SortKey {
            field: field.into(),
            descending: true,
        }];
        self
    }

    /// Secondary ascending key, applied where earlier keys tie.
    pub fn then_by(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn then_by_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Project onto `fields`. `id` is always kept.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    // ── Terminals ───────────────────────────────────────────────────────

    /// Records matching the query, after filtering, sorting and paging,
    /// without projection.
    fn matching(&self) -> Vec<Arc<Record>> {
        let mut rows: Vec<Arc<Record>> = self
            .records
            .iter()
            .filter(|r| self.filters.iter().all(|f| f(r)))
            .cloned()
            .collect();

        if !self.sort.is_empty() {
            rows.sort_by(|a, b| {
                for key in &self.sort {
                    let ord = compare_values(field_value(a, &key.field), field_value(b, &key.field));
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        rows.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn execute(&self) -> Vec<Arc<Record>> {
        let rows = self.matching();
        match &self.select {
            Some(fields) => rows
                .into_iter()
                .map(|r| Arc::new(r.project(fields)))
                .collect(),
            None => rows,
        }
    }

    pub fn first(&self) -> Option<Arc<Record>> {
        self.clone().limit(self.limit.unwrap_or(1).min(1)).execute().into_iter().next()
    }

    /// Number of records `execute` would return.
    pub fn count(&self) -> usize {
        self.matching().len()
    }

    pub fn exists(&self) -> bool {
        self.count() > 0
    }

    /// Group the results by `field`, in first-occurrence order.
    ///
    /// Records without the field are grouped under `null`.
    pub fn group_by(&self, field: &str) -> Vec<(Value, Vec<Arc<Record>>)> {
        let mut groups: Vec<(Value, Vec<Arc<Record>>)> = Vec::new();
        for record in self.execute() {
            let key = field_value(&record, field).clone();
            match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
                Some((_, members)) => members.push(record),
                None => groups.push((key, vec![record])),
            }
        }
        groups
    }

    /// Sum of the numeric values of `field`; non-numbers are ignored.
    pub fn sum(&self, field: &str) -> f64 {
        self.matching()
            .iter()
            .filter_map(|r| r.get_f64(field))
            .sum()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("records", &self.records.len())
            .field("filters", &self.filters.len())
            .field("sort", &self.sort)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("select", &self.select)
            .finish()
    }
}

/// Equality with numbers compared by value (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Arc<Record> {
        Arc::new(Record::from_value(value).unwrap())
    }

    fn ids(records: &[Arc<Record>]) -> Vec<&str> {
        records.iter().map(|r| r.id()).collect()
    }

    fn sample() -> Query {
        Query::new(vec![
            rec(json!({"id": "2", "name": "b", "score": 2, "tags": ["API", "db"]})),
            rec(json!({"id": "1", "name": "a", "score": 1, "team": "core"})),
            rec(json!({"id": "3", "name": "c", "score": 2, "team": "core"})),
        ])
    }

    #[test]
    fn test_basic_composition() {
        let q = Query::new(vec![
            rec(json!({"id": "1", "name": "a", "score": 1})),
            rec(json!({"id": "2", "name": "b", "score": 2})),
        ]);
        let names: Vec<_> = q
            .clone()
            .sort_by("name")
            .execute()
            .iter()
            .map(|r| r.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let b = q.clone().where_eq("score", 2).first().unwrap();
        assert_eq!(b.get_str("name"), Some("b"));

        assert!(q.clone().limit(0).execute().is_empty());
        assert_eq!(q.limit(0).count(), 0);
    }

    #[test]
    fn test_filters() {
        let q = sample();
        assert_eq!(ids(&q.clone().where_ne("score", 2).execute()), vec!["1"]);
        assert_eq!(
            ids(&q.clone().where_in("name", ["a", "c"]).execute()),
            vec!["1", "3"]
        );
        assert_eq!(
            ids(&q.clone().where_not_in("name", ["a", "c"]).execute()),
            vec!["2"]
        );
        assert_eq!(ids(&q.clone().where_exists("team").execute()), vec!["1", "3"]);
        assert_eq!(ids(&q.clone().where_eq("team", Value::Null).execute()), vec!["2"]);
        assert_eq!(ids(&q.clone().where_contains("name", "B").execute()), vec!["2"]);
        assert_eq!(ids(&q.clone().where_contains("tags", "api").execute()), vec!["2"]);
        assert!(q.clone().where_contains("tags", "ap").execute().is_empty());
        assert_eq!(
            ids(&q.where_fn(|r| r.get_f64("score").unwrap_or(0.0) > 1.5).execute()),
            vec!["2", "3"]
        );
    }

    #[test]
    fn test_multi_key_sort_is_stable() {
        let q = sample();
        assert_eq!(
            ids(&q.clone().sort_by_desc("score").then_by("name").execute()),
            vec!["2", "3", "1"]
        );
        assert_eq!(
            ids(&q.clone().sort_by_desc("score").then_by_desc("name").execute()),
            vec!["3", "2", "1"]
        );
        // Ties without a secondary key keep snapshot order.
        assert_eq!(ids(&q.clone().sort_by_desc("score").execute()), vec!["2", "3", "1"]);
        // Missing values sort first.
        assert_eq!(ids(&q.sort_by("team").execute()), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_paging_and_projection() {
        let q = sample().sort_by("name");
        assert_eq!(ids(&q.clone().offset(1).limit(1).execute()), vec!["2"]);
        assert!(q.clone().offset(10).execute().is_empty());

        let projected = q.clone().select(["name"]).execute();
        assert_eq!(projected.len(), 3);
        assert_eq!(projected[0].fields().len(), 2);
        assert_eq!(projected[0].id(), "1");
        assert!(!projected[0].contains("score"));

        // Projection runs last, so sorting on a dropped field still works.
        let by_score = q.select(["name"]).sort_by_desc("score").then_by("name").execute();
        assert_eq!(ids(&by_score), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_aggregates() {
        let q = sample();
        assert_eq!(q.sum("score"), 5.0);
        assert!(q.exists());

        let groups = q.clone().group_by("score");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, json!(2));
        assert_eq!(ids(&groups[0].1), vec!["2", "3"]);
        assert_eq!(groups[1].0, json!(1));

        let by_team = q.group_by("team");
        assert_eq!(by_team[0].0, Value::Null);
        assert_eq!(by_team[1].0, json!("core"));
    }

    #[test]
    fn test_empty_snapshot() {
        let q = Query::new(Vec::new());
        assert!(q.execute().is_empty());
        assert!(q.first().is_none());
        assert_eq!(q.count(), 0);
        assert!(!q.exists());
        assert!(q.group_by("x").is_empty());
        assert_eq!(q.sum("x"), 0.0);
    }

    #[test]
    fn test_value_order() {
        let ordered = [
            Value::Null,
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!("a"),
            json!("b"),
            json!([1]),
            json!([1, 2]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_values(&pair[0], &pair[1]),
                Ordering::Less,
                "{} < {}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(compare_values(&json!(1), &json!(1.0)), Ordering::Equal);
    }
}
