//! SQL type to JSON-schema fragment mapping.
//!
//! The pattern table is an ordered sequence scanned with a case-insensitive
//! substring test; the order is part of the contract (`jsonb` before
//! `json`, `int` before `variant`). Substring matching absorbs dialect
//! decorations such as `VARCHAR(255)` and `NUMERIC(10,2)` without
//! enumerating every spelling.

use singer::Fragment;

/// A column's SQL type as discovered from the catalog: either a (possibly
/// length-bounded) named type or an array of an element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Named { name: String, length: Option<u32> },
    Array { element: Box<SqlType> },
}

impl SqlType {
    pub fn named(name: &str) -> Self {
        SqlType::Named {
            name: name.to_string(),
            length: None,
        }
    }

    pub fn with_length(name: &str, length: Option<u32>) -> Self {
        SqlType::Named {
            name: name.to_string(),
            length,
        }
    }

    pub fn array_of(element: SqlType) -> Self {
        SqlType::Array {
            element: Box::new(element),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    JsonUnion,
    DateTime,
    Date,
    Integer,
    Number,
    Text,
    Boolean,
}

const SQLTYPE_LOOKUP: &[(&str, Target)] = &[
    ("jsonb", Target::JsonUnion),
    ("json", Target::JsonUnion),
    ("timestamp", Target::DateTime),
    ("datetime", Target::DateTime),
    ("date", Target::Date),
    ("int", Target::Integer),
    ("numeric", Target::Number),
    ("decimal", Target::Number),
    ("double", Target::Number),
    ("float", Target::Number),
    ("real", Target::Number),
    ("float4", Target::Number),
    ("string", Target::Text),
    ("text", Target::Text),
    ("char", Target::Text),
    ("bool", Target::Boolean),
    ("variant", Target::Text),
];

/// Map a SQL type to its schema fragment. With `dates_as_string`, date-like
/// types degrade to plain strings so textual values like `infinity` remain
/// schema-valid.
pub fn map_type(sql_type: &SqlType, dates_as_string: bool) -> Fragment {
    match sql_type {
        SqlType::Array { element } => Fragment::array(map_type(element, dates_as_string)),
        SqlType::Named { name, length } => {
            // Internal array type names (`_int4`) are the array of the
            // remainder.
            if let Some(element) = name.strip_prefix('_') {
                return Fragment::array(map_type(&SqlType::named(element), dates_as_string));
            }
            let lowered = name.to_lowercase();
            let target = SQLTYPE_LOOKUP
                .iter()
                .find(|(pattern, _)| lowered.contains(pattern))
                .map(|(_, target)| *target)
                .unwrap_or(Target::Text);
            let fragment = match (target, dates_as_string) {
                (Target::JsonUnion, _) => Fragment::json_union(),
                (Target::DateTime, false) => Fragment::date_time(),
                (Target::Date, false) => Fragment::date(),
                (Target::DateTime | Target::Date, true) => Fragment::string(),
                (Target::Integer, _) => Fragment::integer(),
                (Target::Number, _) => Fragment::number(),
                (Target::Text, _) => Fragment::string(),
                (Target::Boolean, _) => Fragment::boolean(),
            };
            fragment.with_max_length(*length)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn mapped(name: &str) -> serde_json::Value {
        serde_json::to_value(map_type(&SqlType::named(name), false)).unwrap()
    }

    #[test]
    fn precedence_is_stable() {
        let union = json!({
            "type": ["string", "number", "integer", "array", "object", "boolean"]
        });
        assert_eq!(mapped("JSONB"), union);
        assert_eq!(mapped("JSON"), union);
        assert_eq!(mapped("INTEGER"), json!({"type": "integer"}));
        assert_eq!(mapped("DOUBLE PRECISION"), json!({"type": "number"}));
        assert_eq!(
            mapped("_int4"),
            json!({"type": "array", "items": {"type": "integer"}})
        );
        assert_eq!(mapped("NUMERIC(10,2)"), json!({"type": "number"}));
    }

    #[test]
    fn decorations_are_absorbed() {
        assert_eq!(mapped("VARCHAR(255)"), json!({"type": "string"}));
        assert_eq!(mapped("character varying"), json!({"type": "string"}));
        assert_eq!(mapped("BIGINT"), json!({"type": "integer"}));
        assert_eq!(
            mapped("timestamp with time zone"),
            json!({"type": "string", "format": "date-time"})
        );
    }

    #[test]
    fn timestamp_beats_date() {
        assert_eq!(
            mapped("TIMESTAMP"),
            json!({"type": "string", "format": "date-time"})
        );
        assert_eq!(mapped("DATE"), json!({"type": "string", "format": "date"}));
    }

    #[test]
    fn unknown_types_fall_back_to_string() {
        assert_eq!(mapped("uuid"), json!({"type": "string"}));
        assert_eq!(mapped("time without time zone"), json!({"type": "string"}));
        assert_eq!(mapped("bytea"), json!({"type": "string"}));
    }

    #[test]
    fn structured_arrays_recurse() {
        let descriptor = SqlType::array_of(SqlType::named("text"));
        assert_eq!(
            serde_json::to_value(map_type(&descriptor, false)).unwrap(),
            json!({"type": "array", "items": {"type": "string"}})
        );
    }

    #[test]
    fn dates_as_string_demotes_temporal_types() {
        let date = map_type(&SqlType::named("date"), true);
        assert_eq!(serde_json::to_value(date).unwrap(), json!({"type": "string"}));
        let ts = map_type(&SqlType::named("timestamp without time zone"), true);
        assert_eq!(serde_json::to_value(ts).unwrap(), json!({"type": "string"}));
        // Non-temporal mappings are unaffected.
        assert_eq!(
            serde_json::to_value(map_type(&SqlType::named("jsonb"), true)).unwrap(),
            json!({"type": ["string", "number", "integer", "array", "object", "boolean"]})
        );
    }

    #[test]
    fn length_becomes_max_length() {
        let descriptor = SqlType::with_length("character varying", Some(255));
        assert_eq!(
            serde_json::to_value(map_type(&descriptor, false)).unwrap(),
            json!({"type": "string", "maxLength": 255})
        );
    }
}
