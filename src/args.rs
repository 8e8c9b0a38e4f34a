use serde_json::{Map, Value};

use crate::config::PaginationConfig;
use crate::content_type::ContentType;

/// Operators accepted in GraphQL `filters` arguments. They are rewritten to the
/// `$`-prefixed form the entity service understands.
const FILTER_OPERATORS: &[&str] = &[
    "and",
    "or",
    "not",
    "eq",
    "eqi",
    "ne",
    "nei",
    "lt",
    "lte",
    "gt",
    "gte",
    "in",
    "notIn",
    "contains",
    "notContains",
    "containsi",
    "notContainsi",
    "null",
    "notNull",
    "between",
    "startsWith",
    "endsWith",
];

pub trait ArgsTransformer: Send + Sync {
    /// Converts raw GraphQL arguments into the canonical fetch parameters of
    /// `content_type`.
    fn transform_args(
        &self,
        args: &Value,
        content_type: &ContentType,
        use_pagination: bool,
    ) -> crate::Result<Value>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultArgsTransformer {
    pagination: PaginationConfig,
}

impl DefaultArgsTransformer {
    pub fn new(pagination: PaginationConfig) -> Self {
        Self { pagination }
    }

    fn with_default_pagination(&self, pagination: &Map<String, Value>) -> crate::Result<(i64, i64)> {
        let page = int_arg(pagination, "page")?;
        let page_size = int_arg(pagination, "pageSize")?;
        let start = int_arg(pagination, "start")?;
        let limit = int_arg(pagination, "limit")?;

        let uses_pages = page.is_some() || page_size.is_some();
        let uses_offsets = start.is_some() || limit.is_some();

        if uses_pages && uses_offsets {
            return Err(crate::Error::validation(
                "pagination: cannot mix page-based and offset-based parameters",
            ));
        }

        if uses_pages {
            let page = page.unwrap_or(1);
            let page_size = page_size.unwrap_or(self.pagination.default_limit);

            if page < 1 {
                return Err(crate::Error::validation("pagination: page must be >= 1"));
            }
            if page_size < 1 {
                return Err(crate::Error::validation("pagination: pageSize must be >= 1"));
            }

            let limit = self.clamp_limit(page_size);
            let start = (page - 1)
                .checked_mul(limit)
                .ok_or_else(|| crate::Error::validation("pagination: page out of range"))?;
            return Ok((start, limit));
        }

        let start = start.unwrap_or(0);
        if start < 0 {
            return Err(crate::Error::validation("pagination: start must be >= 0"));
        }

        let limit = limit.unwrap_or(self.pagination.default_limit);
        if limit < -1 || limit == 0 {
            return Err(crate::Error::validation(
                "pagination: limit must be >= 1, or -1 for no limit",
            ));
        }

        Ok((start, self.clamp_limit(limit)))
    }

    fn clamp_limit(&self, limit: i64) -> i64 {
        match self.pagination.max_limit {
            Some(max) if limit == -1 || limit > max => max,
            _ => limit,
        }
    }
}

impl ArgsTransformer for DefaultArgsTransformer {
    fn transform_args(
        &self,
        args: &Value,
        _content_type: &ContentType,
        use_pagination: bool,
    ) -> crate::Result<Value> {
        let mut args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(crate::Error::validation(format!(
                    "expected an arguments object, got {other}"
                )))
            }
        };

        let pagination = args.remove("pagination");
        let filters = args.remove("filters");

        if use_pagination {
            let pagination = match pagination {
                Some(Value::Object(map)) => map,
                Some(Value::Null) | None => Map::new(),
                Some(other) => {
                    return Err(crate::Error::validation(format!(
                        "pagination must be an object, got {other}"
                    )))
                }
            };

            let (start, limit) = self.with_default_pagination(&pagination)?;
            args.insert("start".to_string(), start.into());
            args.insert("limit".to_string(), limit.into());
        }

        if let Some(filters) = filters.filter(|filters| !filters.is_null()) {
            args.insert("filters".to_string(), graphql_filters_to_query(filters));
        }

        Ok(Value::Object(args))
    }
}

fn int_arg(map: &Map<String, Value>, key: &str) -> crate::Result<Option<i64>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| crate::Error::validation(format!("pagination: {key} must be an integer"))),
    }
}

/// Prefixes filter operators with `$`, leaving attribute names untouched.
pub fn graphql_filters_to_query(filters: Value) -> Value {
    match filters {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = if FILTER_OPERATORS.contains(&key.as_str()) {
                        format!("${key}")
                    } else {
                        key
                    };
                    (key, graphql_filters_to_query(value))
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(graphql_filters_to_query).collect())
        }
        other => other,
    }
}

/// Renders `value` as JSON with object keys sorted at every level, so structurally
/// identical arguments produce the same string whatever their key order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
