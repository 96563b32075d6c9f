use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::db::error::{DbError, Result};

/// 列语义类型 / Column semantic type
///
/// 动态表没有编译期结构体，绑定与解码都依据此类型进行。
/// Runtime tables have no compile-time struct; binding and decoding are driven by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColType {
    Text,
    Int64,
    Decimal,
    Date,
    Timestamp,
}

/// 已按列类型转换的绑定值 / Bind value coerced to its column type
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int64(Option<i64>),
    Decimal(Option<Decimal>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

const TS_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// 将 JSON 值转换为列类型 / Coerce a JSON value into the column type
///
/// 空字符串对非文本列视为 NULL / empty strings are NULL for non-text columns
pub fn coerce(ty: ColType, column: &str, v: &Value) -> Result<SqlValue> {
    let bad = |expect: &str| DbError::Value {
        column: column.to_string(),
        message: format!("期望 {}，实际 {}", expect, v),
    };
    let blank = matches!(v, Value::Null) || matches!(v, Value::String(s) if s.trim().is_empty());

    Ok(match ty {
        ColType::Text => SqlValue::Text(match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        _ if blank => null_of(ty),
        ColType::Int64 => SqlValue::Int64(Some(match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => i,
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => f as i64,
                    _ => return Err(bad("整数")),
                },
            },
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| bad("整数"))?,
            Value::Bool(b) => i64::from(*b),
            _ => return Err(bad("整数")),
        })),
        ColType::Decimal => SqlValue::Decimal(Some(match v {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .map_err(|_| bad("小数"))?,
            Value::String(s) => Decimal::from_str(s.trim()).map_err(|_| bad("小数"))?,
            _ => return Err(bad("小数")),
        })),
        ColType::Date => SqlValue::Date(Some(match v {
            Value::String(s) => parse_date(s.trim()).ok_or_else(|| bad("日期 YYYY-MM-DD"))?,
            _ => return Err(bad("日期 YYYY-MM-DD")),
        })),
        ColType::Timestamp => SqlValue::Timestamp(Some(match v {
            Value::String(s) => parse_timestamp(s.trim()).ok_or_else(|| bad("时间"))?,
            _ => return Err(bad("时间")),
        })),
    })
}

/// 类型化 NULL / typed NULL
pub fn null_of(ty: ColType) -> SqlValue {
    match ty {
        ColType::Text => SqlValue::Text(None),
        ColType::Int64 => SqlValue::Int64(None),
        ColType::Decimal => SqlValue::Decimal(None),
        ColType::Date => SqlValue::Date(None),
        ColType::Timestamp => SqlValue::Timestamp(None),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    TS_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_from_strings_and_numbers() {
        assert_eq!(
            coerce(ColType::Int64, "qty", &json!("42")).unwrap(),
            SqlValue::Int64(Some(42))
        );
        assert_eq!(
            coerce(ColType::Int64, "qty", &json!(7.0)).unwrap(),
            SqlValue::Int64(Some(7))
        );
        assert!(coerce(ColType::Int64, "qty", &json!("4x")).is_err());
        assert_eq!(
            coerce(ColType::Decimal, "price", &json!("12.50")).unwrap(),
            SqlValue::Decimal(Some(Decimal::new(1250, 2)))
        );
    }

    #[test]
    fn blank_is_typed_null_except_for_text() {
        assert_eq!(
            coerce(ColType::Date, "d", &json!("")).unwrap(),
            SqlValue::Date(None)
        );
        assert_eq!(
            coerce(ColType::Text, "t", &json!("")).unwrap(),
            SqlValue::Text(Some(String::new()))
        );
    }

    #[test]
    fn dates_and_timestamps() {
        assert_eq!(
            coerce(ColType::Date, "d", &json!("2024-02-29")).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29))
        );
        let ts = coerce(ColType::Timestamp, "t", &json!("2024-01-02 03:04:05.678")).unwrap();
        match ts {
            SqlValue::Timestamp(Some(t)) => {
                assert_eq!(t.format("%H:%M:%S%.3f").to_string(), "03:04:05.678")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(coerce(ColType::Timestamp, "t", &json!("2024-01-02T03:04:05Z")).is_ok());
        assert!(coerce(ColType::Date, "d", &json!(20240101)).is_err());
    }
}
