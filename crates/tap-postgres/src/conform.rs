//! The value-conformance policy applied to every scalar before emission.
//!
//! This replaces any default conformance a surrounding runtime might apply:
//! both stream types run every decoded cell through [`conform`] as their
//! record post-processing stage, so there is no per-call opt-in.

use crate::value::{PgInterval, PgValue};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use singer::Fragment;

/// Convert one decoded cell to its JSON form under `schema`.
///
/// Ordering matters: calendar dates are handled before datetimes so a pure
/// date never acquires a spurious time component. Byte strings coerce to
/// booleans only when the schema admits booleans and nothing else; a
/// `["boolean","integer"]` union or the json-union fragment used for jsonb
/// must leave bytes alone, otherwise jsonb payloads would be destroyed.
pub fn conform(value: PgValue, schema: &Fragment) -> Value {
    match value {
        PgValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        PgValue::Timestamp(naive) => {
            // Naive timestamps are assumed UTC.
            Value::String(Utc.from_utc_datetime(&naive).to_rfc3339())
        }
        PgValue::TimestampTz(stamp) => Value::String(stamp.to_rfc3339()),
        PgValue::Interval(interval) => interval_from_epoch(interval),
        PgValue::Time(time) => Value::String(time.to_string()),
        PgValue::Bytes(bytes) => {
            if schema.is_exactly_boolean() {
                // BIT(1): a single zero byte is false, anything else true.
                Value::Bool(bytes != [0u8])
            } else {
                Value::String(hex::encode(&bytes))
            }
        }
        PgValue::Array(values) => {
            let items = schema
                .items
                .as_deref()
                .cloned()
                .unwrap_or_else(Fragment::json_union);
            Value::Array(values.into_iter().map(|v| conform(v, &items)).collect())
        }
        PgValue::Null => Value::Null,
        PgValue::Bool(b) => Value::Bool(b),
        PgValue::Int(i) => Value::from(i),
        PgValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PgValue::Numeric(decimal) => {
            use rust_decimal::prelude::ToPrimitive;
            decimal
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        PgValue::Text(text) => Value::String(text),
        PgValue::Json(json) => json,
        PgValue::Uuid(uuid) => Value::String(uuid.to_string()),
    }
}

/// An interval is emitted as the timestamp it lands on when added to the
/// UTC epoch. Months weigh 30 days, as the driver-level duration conversion
/// always did.
fn interval_from_epoch(interval: PgInterval) -> Value {
    let days = interval.months as i64 * 30 + interval.days as i64;
    Utc.timestamp_opt(0, 0)
        .single()
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days)))
        .and_then(|stamp| {
            stamp.checked_add_signed(chrono::Duration::microseconds(interval.microseconds))
        })
        .map(|stamp| Value::String(stamp.to_rfc3339()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;

    #[test]
    fn dates_never_gain_a_time_component() {
        let date = PgValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let out = conform(date, &Fragment::date());
        assert_eq!(out, json!("2024-03-09"));
        assert!(!out.as_str().unwrap().contains('T'));
    }

    #[test]
    fn naive_timestamps_assume_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            conform(PgValue::Timestamp(naive), &Fragment::date_time()),
            json!("2024-01-01T12:30:00+00:00")
        );
    }

    #[test]
    fn intervals_land_on_the_epoch() {
        let interval = PgValue::Interval(PgInterval {
            months: 0,
            days: 1,
            microseconds: 90_000_000,
        });
        assert_eq!(
            conform(interval, &Fragment::date_time()),
            json!("1970-01-02T00:01:30+00:00")
        );
    }

    #[test]
    fn time_of_day_is_canonical() {
        let time = PgValue::Time(NaiveTime::from_hms_opt(23, 56, 4).unwrap());
        assert_eq!(conform(time, &Fragment::string()), json!("23:56:04"));
    }

    #[test]
    fn bit_coerces_only_under_exact_boolean() {
        assert_eq!(
            conform(PgValue::Bytes(vec![0x00]), &Fragment::boolean()),
            json!(false)
        );
        assert_eq!(
            conform(PgValue::Bytes(vec![0x01]), &Fragment::boolean()),
            json!(true)
        );
        assert_eq!(
            conform(PgValue::Bytes(vec![0x80]), &Fragment::boolean()),
            json!(true)
        );

        let mut nullable = Fragment::boolean();
        nullable.add_null();
        assert_eq!(conform(PgValue::Bytes(vec![0x00]), &nullable), json!(false));
    }

    #[test]
    fn bytea_renders_lowercase_hex() {
        assert_eq!(
            conform(PgValue::Bytes(vec![0xDE, 0xAD, 0x00]), &Fragment::string()),
            json!("dead00")
        );
    }

    #[test]
    fn jsonb_union_never_collapses_bytes_to_booleans() {
        // Regression guard: the union contains "boolean", but a zero byte
        // under it must stay data.
        assert_eq!(
            conform(PgValue::Bytes(vec![0x00]), &Fragment::json_union()),
            json!("00")
        );
    }

    #[test]
    fn jsonb_values_pass_through_unchanged() {
        let payload = json!({"a": [1, "two", null], "b": false});
        assert_eq!(
            conform(PgValue::Json(payload.clone()), &Fragment::json_union()),
            payload
        );
        assert_eq!(
            conform(PgValue::Json(json!(true)), &Fragment::json_union()),
            json!(true)
        );
    }

    #[test]
    fn arrays_conform_elementwise() {
        let array = PgValue::Array(vec![
            PgValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            PgValue::Null,
        ]);
        assert_eq!(
            conform(array, &Fragment::array(Fragment::date())),
            json!(["2024-01-01", null])
        );
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(conform(PgValue::Int(7), &Fragment::integer()), json!(7));
        assert_eq!(conform(PgValue::Bool(true), &Fragment::boolean()), json!(true));
        assert_eq!(
            conform(PgValue::Text("x".to_string()), &Fragment::string()),
            json!("x")
        );
        assert_eq!(conform(PgValue::Null, &Fragment::string()), json!(null));
        assert_eq!(conform(PgValue::Float(f64::NAN), &Fragment::number()), json!(null));
    }
}
