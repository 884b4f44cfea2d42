//! JSON-schema fragments in the dialect Singer consumers understand.
//!
//! A fragment is the schema of one stream property. The `type` keyword
//! serializes as a bare string when it holds a single type and as a list
//! otherwise, matching what downstream targets expect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Array,
    Boolean,
    Integer,
    Null,
    Number,
    Object,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Date,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(rename = "type", with = "type_list")]
    pub types: Vec<JsonType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Fragment>>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl Fragment {
    fn scalar(t: JsonType) -> Self {
        Self {
            types: vec![t],
            format: None,
            items: None,
            max_length: None,
        }
    }

    pub fn string() -> Self {
        Self::scalar(JsonType::String)
    }

    pub fn integer() -> Self {
        Self::scalar(JsonType::Integer)
    }

    pub fn number() -> Self {
        Self::scalar(JsonType::Number)
    }

    pub fn boolean() -> Self {
        Self::scalar(JsonType::Boolean)
    }

    pub fn date() -> Self {
        Self {
            format: Some(Format::Date),
            ..Self::scalar(JsonType::String)
        }
    }

    pub fn date_time() -> Self {
        Self {
            format: Some(Format::DateTime),
            ..Self::scalar(JsonType::String)
        }
    }

    pub fn array(items: Fragment) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::scalar(JsonType::Array)
        }
    }

    /// The unconstrained fragment used for `json` / `jsonb` columns, whose
    /// payloads may be any JSON value. A plain `{"type":"object"}` would
    /// reject scalar payloads, and an empty schema trips empty-schema
    /// detection in downstream targets.
    pub fn json_union() -> Self {
        Self {
            types: vec![
                JsonType::String,
                JsonType::Number,
                JsonType::Integer,
                JsonType::Array,
                JsonType::Object,
                JsonType::Boolean,
            ],
            format: None,
            items: None,
            max_length: None,
        }
    }

    pub fn with_max_length(mut self, max_length: Option<u32>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Append `"null"` to the type set, promoting a scalar `type` to a list.
    pub fn add_null(&mut self) {
        if !self.types.contains(&JsonType::Null) {
            self.types.push(JsonType::Null);
        }
    }

    /// True when the fragment admits booleans and nothing else (a `"null"`
    /// member is disregarded). A union such as `["boolean","integer"]` or
    /// the json-union fragment must answer false: byte values under those
    /// schemas are data, not BIT flags.
    pub fn is_exactly_boolean(&self) -> bool {
        let mut non_null = self.types.iter().filter(|t| **t != JsonType::Null);
        non_null.next() == Some(&JsonType::Boolean) && non_null.next().is_none()
    }
}

/// The object schema of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: indexmap::IndexMap<String, Fragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl StreamSchema {
    pub fn new(properties: indexmap::IndexMap<String, Fragment>, required: Vec<String>) -> Self {
        Self {
            kind: "object".to_string(),
            properties,
            required,
        }
    }
}

mod type_list {
    use super::JsonType;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(types: &[JsonType], s: S) -> Result<S::Ok, S::Error> {
        if types.len() == 1 {
            types[0].serialize(s)
        } else {
            types.serialize(s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<JsonType>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(JsonType),
            Many(Vec<JsonType>),
        }
        Ok(match OneOrMany::deserialize(d)? {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_type_serializes_bare() {
        let frag = Fragment::string();
        assert_eq!(serde_json::to_value(&frag).unwrap(), json!({"type": "string"}));
    }

    #[test]
    fn nullable_type_promotes_to_list() {
        let mut frag = Fragment::integer();
        frag.add_null();
        frag.add_null(); // idempotent
        assert_eq!(
            serde_json::to_value(&frag).unwrap(),
            json!({"type": ["integer", "null"]})
        );
    }

    #[test]
    fn union_round_trips() {
        let frag = Fragment::json_union();
        let value = serde_json::to_value(&frag).unwrap();
        assert_eq!(
            value,
            json!({"type": ["string", "number", "integer", "array", "object", "boolean"]})
        );
        let back: Fragment = serde_json::from_value(value).unwrap();
        assert_eq!(back, frag);
    }

    #[test]
    fn exact_boolean_check() {
        assert!(Fragment::boolean().is_exactly_boolean());

        let mut nullable = Fragment::boolean();
        nullable.add_null();
        assert!(nullable.is_exactly_boolean());

        let mixed = Fragment {
            types: vec![JsonType::Boolean, JsonType::Integer],
            format: None,
            items: None,
            max_length: None,
        };
        assert!(!mixed.is_exactly_boolean());
        assert!(!Fragment::json_union().is_exactly_boolean());
        assert!(!Fragment::string().is_exactly_boolean());
    }

    #[test]
    fn date_formats() {
        assert_eq!(
            serde_json::to_value(Fragment::date()).unwrap(),
            json!({"type": "string", "format": "date"})
        );
        assert_eq!(
            serde_json::to_value(Fragment::date_time()).unwrap(),
            json!({"type": "string", "format": "date-time"})
        );
    }

    #[test]
    fn array_of_integer_with_length() {
        let frag = Fragment::array(Fragment::integer()).with_max_length(Some(8));
        assert_eq!(
            serde_json::to_value(&frag).unwrap(),
            json!({"type": "array", "items": {"type": "integer"}, "maxLength": 8})
        );
    }
}
