//! Path lookups over heterogeneous JSON records.
//!
//! A path is a chain of segments: plain identifiers separated by dots,
//! bracket-quoted keys (`["a.b/c"]` or `['a.b/c']`) for keys that contain
//! separators, and numeric indices (`[0]`). A missing node anywhere along the
//! way yields [`Resolved::Absent`] rather than an error.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Rendered in place of an absent value.
pub const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut chars = path.char_indices().peekable();
        let mut plain = String::new();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '.' => flush_plain(&mut plain, &mut segments),
                '[' => {
                    flush_plain(&mut plain, &mut segments);
                    let rest = &path[pos + 1..];
                    let (segment, consumed) = parse_bracket(rest);
                    if let Some(segment) = segment {
                        segments.push(segment);
                    }
                    // skip the bracket body and closing bracket
                    for _ in 0..consumed {
                        chars.next();
                    }
                }
                ']' => {}
                c => plain.push(c),
            }
        }
        flush_plain(&mut plain, &mut segments);

        Self { segments }
    }

    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        if self.segments.is_empty() {
            return None;
        }
        let mut node = record;
        for segment in &self.segments {
            node = match (segment, node) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                // arrays addressed by a string key that happens to be numeric
                (Segment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
                _ => return None,
            };
            if node.is_null() {
                return None;
            }
        }
        Some(node)
    }
}

fn flush_plain(plain: &mut String, segments: &mut Vec<Segment>) {
    if !plain.is_empty() {
        segments.push(Segment::Key(std::mem::take(plain)));
    }
}

/// Parses the body following a `[`. Returns the segment (if well formed) and
/// how many characters to skip, including the closing `]`.
fn parse_bracket(rest: &str) -> (Option<Segment>, usize) {
    let mut it = rest.chars();
    match it.next() {
        Some(q @ ('"' | '\'')) => {
            let body = &rest[1..];
            match body.find(q) {
                Some(end) if body[end + 1..].starts_with(']') => {
                    let key = &body[..end];
                    let consumed = 1 + key.chars().count() + 2;
                    (Some(Segment::Key(key.to_string())), consumed)
                }
                _ => (None, rest.chars().count()),
            }
        }
        _ => match rest.find(']') {
            Some(end) => {
                let inner = rest[..end].trim();
                let consumed = rest[..end].chars().count() + 1;
                let segment = if inner.is_empty() {
                    None
                } else if let Ok(i) = inner.parse::<usize>() {
                    Some(Segment::Index(i))
                } else {
                    Some(Segment::Key(inner.to_string()))
                };
                (segment, consumed)
            }
            None => (None, rest.chars().count()),
        },
    }
}

/// Outcome of a lookup: a present value, or the absent sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Present(Value),
    Absent,
}

impl Resolved {
    pub fn text(s: impl Into<String>) -> Self {
        Resolved::Present(Value::String(s.into()))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }

    pub fn or_else(self, f: impl FnOnce() -> Resolved) -> Resolved {
        if self.is_absent() { f() } else { self }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl From<Option<&Value>> for Resolved {
    fn from(v: Option<&Value>) -> Self {
        match v {
            Some(v) => Resolved::Present(v.clone()),
            None => Resolved::Absent,
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Absent => f.write_str(PLACEHOLDER),
            Resolved::Present(Value::String(s)) => f.write_str(s),
            Resolved::Present(Value::Null) => f.write_str(PLACEHOLDER),
            Resolved::Present(other) => write!(f, "{}", other),
        }
    }
}

pub fn resolve(record: &Value, path: &str) -> Resolved {
    PathExpr::parse(path).resolve(record).into()
}

pub type ComputeFn = Arc<dyn Fn(&Value) -> Resolved + Send + Sync>;

/// How a column finds its value in a record.
#[derive(Clone)]
pub enum ColumnSpec {
    StaticPath(PathExpr),
    Computed(ComputeFn),
}

impl ColumnSpec {
    pub fn path(path: &str) -> Self {
        ColumnSpec::StaticPath(PathExpr::parse(path))
    }

    pub fn computed(f: impl Fn(&Value) -> Resolved + Send + Sync + 'static) -> Self {
        ColumnSpec::Computed(Arc::new(f))
    }

    pub fn resolve(&self, record: &Value) -> Resolved {
        match self {
            ColumnSpec::StaticPath(path) => path.resolve(record).into(),
            ColumnSpec::Computed(f) => f(record),
        }
    }
}

impl fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSpec::StaticPath(p) => f.debug_tuple("StaticPath").field(p).finish(),
            ColumnSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> Value {
        json!({
            "metadata": {
                "name": "worker-0",
                "labels": {
                    "node-role.kubernetes.io/worker": "",
                    "topology.kubernetes.io/zone": "eastus-1",
                    "mapid": "M-100"
                }
            },
            "status": {
                "conditions": [
                    {"type": "MemoryPressure", "status": "False"},
                    {"type": "Ready", "status": "True"}
                ],
                "allocatable": {"pods": 0},
                "unschedulable": false
            }
        })
    }

    #[test]
    fn parses_all_segment_forms() {
        let p = PathExpr::parse(r#"metadata.labels["node-role.kubernetes.io/worker"].x['a.b'][2]"#);
        assert_eq!(
            p.segments,
            &[
                Segment::Key("metadata".into()),
                Segment::Key("labels".into()),
                Segment::Key("node-role.kubernetes.io/worker".into()),
                Segment::Key("x".into()),
                Segment::Key("a.b".into()),
                Segment::Index(2),
            ]
        );
    }

    #[test]
    fn resolves_dotted_bracketed_and_indexed() {
        let n = node();
        assert_eq!(resolve(&n, "metadata.name").render(), "worker-0");
        assert_eq!(resolve(&n, r#"metadata.labels["topology.kubernetes.io/zone"]"#).render(), "eastus-1");
        assert_eq!(resolve(&n, "metadata.labels['mapid']").render(), "M-100");
        assert_eq!(resolve(&n, "status.conditions[1].type").render(), "Ready");
    }

    #[test]
    fn missing_intermediates_are_absent() {
        let n = node();
        assert!(resolve(&n, "spec.providerSpec.value.subnet").is_absent());
        assert!(resolve(&n, "status.conditions[9].type").is_absent());
        assert!(resolve(&n, "metadata.name.first").is_absent());
        assert!(resolve(&n, "").is_absent());
        assert_eq!(resolve(&n, "spec.nope").render(), PLACEHOLDER);
    }

    #[test]
    fn falsy_values_render_as_themselves() {
        let n = node();
        assert_eq!(resolve(&n, "status.allocatable.pods").render(), "0");
        assert_eq!(resolve(&n, "status.unschedulable").render(), "false");
        assert_eq!(resolve(&n, r#"metadata.labels["node-role.kubernetes.io/worker"]"#).render(), "");
    }

    #[test]
    fn null_is_absent() {
        let v = json!({"a": null, "b": {"c": null}});
        assert!(resolve(&v, "a").is_absent());
        assert!(resolve(&v, "b.c").is_absent());
        assert!(resolve(&v, "a.x").is_absent());
    }

    #[test]
    fn column_spec_dispatches_both_forms() {
        let n = node();
        let by_path = ColumnSpec::path("metadata.name");
        let computed = ColumnSpec::computed(|v| {
            let ready = v["status"]["conditions"]
                .as_array()
                .and_then(|cs| cs.iter().find(|c| c["type"] == "Ready"))
                .map(|c| c["status"] == "True")
                .unwrap_or(false);
            Resolved::text(if ready { "Ready" } else { "Not Ready" })
        });
        assert_eq!(by_path.resolve(&n).render(), "worker-0");
        assert_eq!(computed.resolve(&n).render(), "Ready");
        assert!(format!("{:?}", computed).starts_with("Computed"));
    }
}
