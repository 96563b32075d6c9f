use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::types;
use sqlx::Column;
use sqlx::Postgres;
use sqlx::QueryBuilder;
use sqlx::Row;

use crate::db::condition::{Predicate, WherePart};
use crate::db::error::Result;
use crate::db::model::{coerce, ColType, SqlValue};

/// 列类型查询函数 / Column type lookup
pub type TypeOf<'a> = &'a dyn Fn(&str) -> Option<ColType>;

/// 按 JSON 类型绑定（未知列）/ Bind by JSON type (unknown column)
pub fn push_value(qb: &mut QueryBuilder<'_, Postgres>, v: &Value) {
    match v {
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                qb.push_bind(f);
            } else {
                qb.push_bind(n.to_string());
            }
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        Value::Array(a) => {
            let vs: Vec<String> = a.iter().map(list_item_text).collect();
            qb.push_bind(vs);
        }
        Value::Object(_) => {
            qb.push_bind(types::Json(v.clone()));
        }
        Value::Null => {
            qb.push_bind(Option::<String>::None);
        }
    }
}

/// 数组元素的文本形式，字符串不带 JSON 引号 / text form of an array item, strings unquoted
fn list_item_text(x: &Value) -> String {
    x.as_str().map(str::to_string).unwrap_or_else(|| x.to_string())
}

/// 绑定已转换值 / Bind a coerced value
pub fn push_sql_value(qb: &mut QueryBuilder<'_, Postgres>, v: SqlValue) {
    match v {
        SqlValue::Text(x) => {
            qb.push_bind(x);
        }
        SqlValue::Int64(x) => {
            qb.push_bind(x);
        }
        SqlValue::Decimal(x) => {
            qb.push_bind(x);
        }
        SqlValue::Date(x) => {
            qb.push_bind(x);
        }
        SqlValue::Timestamp(x) => {
            qb.push_bind(x);
        }
    }
}

/// 按列类型绑定，未知列退回 JSON 类型 / Bind by column type, falling back to JSON type
pub fn push_typed(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: Option<&str>,
    v: &Value,
    type_of: TypeOf<'_>,
) -> Result<()> {
    match column.and_then(|c| type_of(c).map(|t| (c, t))) {
        Some((c, ty)) => push_sql_value(qb, coerce(ty, c, v)?),
        None => push_value(qb, v),
    }
    Ok(())
}

/// 渲染谓词到查询构建器（列表展开为 `($1, $2, ...)`）
/// Render a predicate into the builder, expanding lists into `($1, $2, ...)`
pub fn push_where(
    qb: &mut QueryBuilder<'_, Postgres>,
    pred: &Predicate,
    type_of: TypeOf<'_>,
) -> Result<()> {
    for p in pred.parts() {
        match p {
            WherePart::Raw(s) => {
                qb.push(s);
            }
            WherePart::Bind { column, value } => {
                push_typed(qb, column.as_deref(), value, type_of)?;
            }
            WherePart::BindList { column, values } => {
                qb.push("(");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    push_typed(qb, column.as_deref(), v, type_of)?;
                }
                qb.push(")");
            }
        }
    }
    Ok(())
}

/// 将一行转换为 JSON 对象 / Convert a row to a JSON object
///
/// 已知列按声明类型解码，其余列依次尝试常见类型。
/// Known columns decode by declared type; others try common types in turn.
pub fn row_to_json(row: &PgRow, type_of: TypeOf<'_>) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        let typed = type_of(name).and_then(|ty| decode_typed(row, name, ty));
        let val_json = match typed {
            Some(v) => v,
            None => decode_any(row, name),
        };
        map.insert(name.to_string(), val_json);
    }
    Ok(map)
}

fn decode_typed(row: &PgRow, name: &str, ty: ColType) -> Option<Value> {
    match ty {
        ColType::Text => row
            .try_get::<Option<String>, _>(name)
            .ok()
            .map(|v| v.map(Value::String).unwrap_or(Value::Null)),
        ColType::Int64 => row
            .try_get::<Option<i64>, _>(name)
            .ok()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        // 定点小数按文本返回，避免经 f64 丢失精度 / decimals come back as exact text
        ColType::Decimal => row
            .try_get::<Option<rust_decimal::Decimal>, _>(name)
            .ok()
            .map(|v| v.map(decimal_text).unwrap_or(Value::Null)),
        ColType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(name)
            .ok()
            .map(|v| {
                v.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Value::Null)
            }),
        ColType::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(name)
            .ok()
            .map(|v| {
                v.map(|d| Value::String(d.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))
                    .unwrap_or(Value::Null)
            }),
    }
}

fn decimal_text(d: rust_decimal::Decimal) -> Value {
    Value::String(d.to_string())
}

fn decode_any(row: &PgRow, name: &str) -> Value {
    // 尽量覆盖常见类型，避免出现 Null 导致反序列化失败
    // cover common types to avoid Null causing deserialization errors
    row.try_get::<types::Json<Value>, _>(name)
        .map(|j| j.0)
        .or_else(|_| row.try_get::<i16, _>(name).map(|v| Value::from(v as i64)))
        .or_else(|_| row.try_get::<i32, _>(name).map(|v| Value::from(v as i64)))
        .or_else(|_| row.try_get::<i64, _>(name).map(Value::from))
        .or_else(|_| row.try_get::<bool, _>(name).map(Value::from))
        .or_else(|_| row.try_get::<rust_decimal::Decimal, _>(name).map(decimal_text))
        .or_else(|_| row.try_get::<Vec<String>, _>(name).map(Value::from))
        .or_else(|_| {
            row.try_get::<chrono::NaiveDateTime, _>(name).map(|dt| {
                Value::String(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            })
        })
        .or_else(|_| {
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(name)
                .map(|dt| Value::String(dt.to_rfc3339()))
        })
        .or_else(|_| row.try_get::<String, _>(name).map(Value::String))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::condition::build;
    use serde_json::json;

    fn types(c: &str) -> Option<ColType> {
        match c {
            "id" => Some(ColType::Int64),
            "birthday" => Some(ColType::Date),
            "name" => Some(ColType::Text),
            _ => None,
        }
    }

    #[test]
    fn renders_numbered_placeholders_and_expands_lists() {
        let pred = build(
            json!({"id": [1, 2, 3], "name like": "%a%"})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM \"t_x\" WHERE ");
        push_where(&mut qb, &pred, &types).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT * FROM \"t_x\" WHERE \"id\" IN ($1, $2, $3) AND \"name\" LIKE $4"
        );
    }

    #[test]
    fn coercion_errors_surface_with_column() {
        let pred = build(json!({"birthday": "not-a-date"}).as_object().unwrap()).unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE ");
        let err = push_where(&mut qb, &pred, &types).unwrap_err();
        assert!(err.to_string().contains("birthday"));
    }

    #[test]
    fn decimals_keep_every_digit() {
        let d: rust_decimal::Decimal = "123456789012345678.91".parse().unwrap();
        assert_eq!(decimal_text(d), json!("123456789012345678.91"));
        let scaled: rust_decimal::Decimal = "12.50".parse().unwrap();
        assert_eq!(decimal_text(scaled), json!("12.50"));
    }

    #[test]
    fn list_items_bind_without_json_quotes() {
        assert_eq!(list_item_text(&json!("a")), "a");
        assert_eq!(list_item_text(&json!(12)), "12");
        assert_eq!(list_item_text(&json!(true)), "true");
    }

    #[test]
    fn unsatisfiable_membership_has_no_binds() {
        let pred = build(json!({"id": []}).as_object().unwrap()).unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE ");
        push_where(&mut qb, &pred, &types).unwrap();
        assert_eq!(qb.sql(), "SELECT 1 WHERE 1 = 0");
    }
}
