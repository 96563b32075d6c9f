//! 条件构造器 / Condition builder
//!
//! 将通用过滤 Map 转换为参数化谓词。键的三种形式：
//! Turns a generic filter map into a parameterized predicate. Keys come in three shapes:
//! - `field`：等值；换行分隔字符串或数组视为 IN / equality, newline string or array means IN
//! - `field op`：`=, >, >=, <, <=, <>, !=, in, notin, like`
//! - 原始片段 `a = ? or b = ?`：值为逗号分隔串或数组，按位置消费 / raw fragment consumed positionally

use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::ident::{is_identifier, quote_ident, validate_identifier};

/// 条件构造错误 / Condition builder error
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("非法标识符: {0}")]
    InvalidIdentifier(String),
    #[error("不支持的操作符: {field} {operator}")]
    UnsupportedOperator { field: String, operator: String },
    #[error("不支持的值类型: {field} {operator} 需要 {expected}")]
    UnsupportedValue {
        field: String,
        operator: String,
        expected: &'static str,
    },
    #[error("非法条件片段: {0}")]
    InvalidFragment(String),
    #[error("占位符数量不匹配: {fragment} 需要 {expected} 个值, 实际 {actual} 个")]
    PlaceholderMismatch {
        fragment: String,
        expected: usize,
        actual: usize,
    },
}

impl ConditionError {
    /// 出错的字段或片段 / offending field or fragment
    pub fn field(&self) -> &str {
        match self {
            ConditionError::InvalidIdentifier(f) | ConditionError::InvalidFragment(f) => f,
            ConditionError::UnsupportedOperator { field, .. }
            | ConditionError::UnsupportedValue { field, .. } => field,
            ConditionError::PlaceholderMismatch { fragment, .. } => fragment,
        }
    }
}

/// 谓词片段 / Predicate part
///
/// `column` 记录绑定值所比较的列，供调用方按列类型转换。
/// `column` names the compared column so callers can coerce by column type.
#[derive(Debug, Clone, PartialEq)]
pub enum WherePart {
    Raw(String),
    Bind {
        column: Option<String>,
        value: Value,
    },
    BindList {
        column: Option<String>,
        values: Vec<Value>,
    },
}

/// 参数化谓词 / Parameterized predicate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    parts: Vec<WherePart>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[WherePart] {
        &self.parts
    }

    /// 以 `?` 占位渲染（列表为 `IN ?`），用于日志与测试
    /// Render with `?` placeholders (lists as `IN ?`), for logs and tests
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for p in &self.parts {
            match p {
                WherePart::Raw(s) => out.push_str(s),
                WherePart::Bind { .. } | WherePart::BindList { .. } => out.push('?'),
            }
        }
        out
    }

    /// 绑定值（列表按一个值计）/ bound values, one entry per placeholder
    pub fn values(&self) -> Vec<Value> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                WherePart::Bind { value, .. } => Some(value.clone()),
                WherePart::BindList { values, .. } => Some(Value::Array(values.clone())),
                WherePart::Raw(_) => None,
            })
            .collect()
    }

    /// 谓词引用的列（去重，按出现顺序）/ columns referenced by the predicate
    ///
    /// 列名只会以引号形式出现在 `Raw` 片段中，值永远在绑定里。
    pub fn columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.parts {
            if let WherePart::Raw(s) = p {
                for (i, piece) in s.split('"').enumerate() {
                    if i % 2 == 1 && !out.iter().any(|c| c == piece) {
                        out.push(piece.to_string());
                    }
                }
            }
        }
        out
    }

    /// 以 AND 追加另一谓词 / append another predicate with AND
    pub fn and(mut self, other: Predicate) -> Predicate {
        if other.is_empty() {
            return self;
        }
        if !self.is_empty() {
            self.parts.push(WherePart::Raw(" AND ".into()));
        }
        self.parts.extend(other.parts);
        self
    }

    /// 原始条件（不含绑定）/ raw condition without binds
    pub fn raw(sql: impl Into<String>) -> Predicate {
        Predicate {
            parts: vec![WherePart::Raw(sql.into())],
        }
    }

    /// 单列等值 / single column equality
    pub fn eq(column: &str, value: Value) -> Result<Predicate, ConditionError> {
        let column = validate_identifier(column)?;
        Ok(Predicate {
            parts: vec![
                WherePart::Raw(format!("{} = ", quote_ident(column))),
                WherePart::Bind {
                    column: Some(column.to_string()),
                    value,
                },
            ],
        })
    }
}

const COMPARE_OPS: [&str; 7] = ["=", ">", ">=", "<", "<=", "<>", "!="];
const FRAGMENT_KEYWORDS: [&str; 6] = ["and", "or", "not", "like", "is", "null"];

/// 构造谓词 / Build predicate
///
/// 键按字典序处理，多个条件以 ` AND ` 连接；空 Map 返回空谓词。
/// Keys are processed in sorted order and joined by ` AND `; an empty map yields an empty predicate.
pub fn build(filter: &Map<String, Value>) -> Result<Predicate, ConditionError> {
    let mut keys: Vec<&String> = filter.keys().collect();
    keys.sort();

    let mut out = Predicate::default();
    for key in keys {
        let value = &filter[key.as_str()];
        let tokens: Vec<&str> = key.split_whitespace().collect();
        let part = match tokens.len() {
            0 => return Err(ConditionError::InvalidIdentifier(key.clone())),
            1 => bare(tokens[0], value)?,
            2 => with_operator(tokens[0], tokens[1], value)?,
            _ => fragment(key.trim(), value)?,
        };
        out = out.and(part);
    }
    Ok(out)
}

fn bare(field: &str, value: &Value) -> Result<Predicate, ConditionError> {
    let field = validate_identifier(field)?;
    match value {
        Value::String(s) if s.contains('\n') => {
            let lines: Vec<Value> = s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Value::String(l.to_string()))
                .collect();
            if lines.is_empty() {
                // 全部为空行时退回原串等值 / all-blank input falls back to equality
                Ok(compare(field, "=", value.clone()))
            } else {
                Ok(membership(field, false, lines))
            }
        }
        Value::Array(items) => Ok(membership(field, false, items.clone())),
        Value::Null => Ok(Predicate::raw(format!("{} IS NULL", quote_ident(field)))),
        Value::Object(_) => Err(ConditionError::UnsupportedValue {
            field: field.to_string(),
            operator: "=".into(),
            expected: "标量、数组或换行分隔字符串",
        }),
        other => Ok(compare(field, "=", other.clone())),
    }
}

fn with_operator(field: &str, op: &str, value: &Value) -> Result<Predicate, ConditionError> {
    let field = validate_identifier(field)?;
    let op_lower = op.to_ascii_lowercase();
    match op_lower.as_str() {
        "=" => bare(field, value),
        "in" | "notin" => {
            let negate = op_lower == "notin";
            let items = match value {
                Value::String(s) => s
                    .split(',')
                    .map(|x| Value::String(x.trim().to_string()))
                    .collect(),
                Value::Array(items) => items.clone(),
                _ => {
                    return Err(ConditionError::UnsupportedValue {
                        field: field.to_string(),
                        operator: op_lower.clone(),
                        expected: "逗号分隔字符串或数组",
                    })
                }
            };
            Ok(membership(field, negate, items))
        }
        "like" => match value {
            Value::String(s) => Ok(Predicate {
                parts: vec![
                    WherePart::Raw(format!("{} LIKE ", quote_ident(field))),
                    // like 总是按文本绑定 / like always binds as text
                    WherePart::Bind {
                        column: None,
                        value: Value::String(s.clone()),
                    },
                ],
            }),
            _ => Err(ConditionError::UnsupportedValue {
                field: field.to_string(),
                operator: op_lower.clone(),
                expected: "字符串",
            }),
        },
        o if COMPARE_OPS.contains(&o) => match value {
            Value::Array(_) | Value::Object(_) | Value::Null => {
                Err(ConditionError::UnsupportedValue {
                    field: field.to_string(),
                    operator: op_lower.clone(),
                    expected: "标量",
                })
            }
            v => Ok(compare(field, o, v.clone())),
        },
        _ => Err(ConditionError::UnsupportedOperator {
            field: field.to_string(),
            operator: op.to_string(),
        }),
    }
}

fn compare(field: &str, op: &str, value: Value) -> Predicate {
    Predicate {
        parts: vec![
            WherePart::Raw(format!("{} {} ", quote_ident(field), op)),
            WherePart::Bind {
                column: Some(field.to_string()),
                value,
            },
        ],
    }
}

fn membership(field: &str, negate: bool, values: Vec<Value>) -> Predicate {
    if values.is_empty() {
        // 空集合：IN 恒假，NOT IN 恒真 / empty set: IN is false, NOT IN is true
        return Predicate::raw(if negate { "1 = 1" } else { "1 = 0" });
    }
    let op = if negate { "NOT IN" } else { "IN" };
    Predicate {
        parts: vec![
            WherePart::Raw(format!("{} {} ", quote_ident(field), op)),
            WherePart::BindList {
                column: Some(field.to_string()),
                values,
            },
        ],
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Op(String),
    Placeholder,
    Open,
    Close,
}

fn tokenize(fragment: &str) -> Result<Vec<Token>, ConditionError> {
    let invalid = || ConditionError::InvalidFragment(fragment.to_string());
    let chars: Vec<char> = fragment.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '?' {
            out.push(Token::Placeholder);
            i += 1;
        } else if c == '(' {
            out.push(Token::Open);
            i += 1;
        } else if c == ')' {
            out.push(Token::Close);
            i += 1;
        } else if c.is_ascii_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push(Token::Word(chars[start..i].iter().collect()));
        } else if "=<>!".contains(c) {
            let start = i;
            while i < chars.len() && "=<>!".contains(chars[i]) {
                i += 1;
            }
            let op: String = chars[start..i].iter().collect();
            if !COMPARE_OPS.contains(&op.as_str()) {
                return Err(invalid());
            }
            out.push(Token::Op(op));
        } else {
            return Err(invalid());
        }
    }
    Ok(out)
}

fn fragment(key: &str, value: &Value) -> Result<Predicate, ConditionError> {
    let tokens = tokenize(key)?;
    let values: Vec<Value> = match value {
        Value::String(s) => s.split(',').map(|x| Value::String(x.trim().to_string())).collect(),
        Value::Array(items) => items.clone(),
        Value::Object(_) => {
            return Err(ConditionError::UnsupportedValue {
                field: key.to_string(),
                operator: "fragment".into(),
                expected: "逗号分隔字符串或数组",
            })
        }
        other => vec![other.clone()],
    };
    let expected = tokens.iter().filter(|t| **t == Token::Placeholder).count();
    if expected != values.len() {
        return Err(ConditionError::PlaceholderMismatch {
            fragment: key.to_string(),
            expected,
            actual: values.len(),
        });
    }

    let mut parts = vec![WherePart::Raw("(".into())];
    let mut sql = String::new();
    let mut last_column: Option<String> = None;
    let mut values = values.into_iter();
    for t in tokens {
        match t {
            Token::Word(w) => {
                let lower = w.to_ascii_lowercase();
                if FRAGMENT_KEYWORDS.contains(&lower.as_str()) {
                    sql.push_str(&format!(" {} ", lower.to_uppercase()));
                } else if is_identifier(&w) {
                    sql.push_str(&quote_ident(&w));
                    last_column = Some(w);
                } else {
                    return Err(ConditionError::InvalidFragment(key.to_string()));
                }
            }
            Token::Op(op) => sql.push_str(&format!(" {} ", op)),
            Token::Open => sql.push('('),
            Token::Close => sql.push(')'),
            Token::Placeholder => {
                parts.push(WherePart::Raw(std::mem::take(&mut sql)));
                if let Some(v) = values.next() {
                    parts.push(WherePart::Bind {
                        column: last_column.clone(),
                        value: v,
                    });
                }
            }
        }
    }
    sql.push(')');
    parts.push(WherePart::Raw(sql));
    parts.retain(|p| !matches!(p, WherePart::Raw(s) if s.is_empty()));
    Ok(Predicate { parts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn single_value_is_equality() {
        let p = build(&filter(json!({"code": "TEST001"}))).unwrap();
        assert_eq!(p.to_sql(), "\"code\" = ?");
        assert_eq!(p.values(), vec![json!("TEST001")]);
    }

    #[test]
    fn newline_value_becomes_in_list_without_blank_lines() {
        let p = build(&filter(json!({"code": "TEST001\n\nTEST002\n  \nTEST003"}))).unwrap();
        assert_eq!(p.to_sql(), "\"code\" IN ?");
        assert_eq!(p.values(), vec![json!(["TEST001", "TEST002", "TEST003"])]);
    }

    #[test]
    fn explicit_equal_with_newline_becomes_in_list() {
        let p = build(&filter(json!({"code =": "A\nB"}))).unwrap();
        assert_eq!(p.to_sql(), "\"code\" IN ?");
    }

    #[test]
    fn all_blank_lines_fall_back_to_equality_on_original() {
        let p = build(&filter(json!({"code": " \n \n"}))).unwrap();
        assert_eq!(p.to_sql(), "\"code\" = ?");
        assert_eq!(p.values(), vec![json!(" \n \n")]);
    }

    #[test]
    fn empty_list_is_unsatisfiable() {
        let p = build(&filter(json!({"id": []}))).unwrap();
        assert_eq!(p.to_sql(), "1 = 0");
        assert!(p.values().is_empty());
        let p = build(&filter(json!({"id in": []}))).unwrap();
        assert_eq!(p.to_sql(), "1 = 0");
        let p = build(&filter(json!({"id notin": []}))).unwrap();
        assert_eq!(p.to_sql(), "1 = 1");
    }

    #[test]
    fn operators_and_sorted_conjunction() {
        let p = build(&filter(json!({
            "name like": "%Test%",
            "status": "active\npending",
            "age >=": 18,
        })))
        .unwrap();
        assert_eq!(
            p.to_sql(),
            "\"age\" >= ? AND \"name\" LIKE ? AND \"status\" IN ?"
        );
        assert_eq!(p.values().len(), 3);
    }

    #[test]
    fn in_accepts_comma_string_and_list() {
        let p = build(&filter(json!({"code in": "a, b,c"}))).unwrap();
        assert_eq!(p.values(), vec![json!(["a", "b", "c"])]);
        let p = build(&filter(json!({"code notin": [1, 2]}))).unwrap();
        assert_eq!(p.to_sql(), "\"code\" NOT IN ?");
    }

    #[test]
    fn unsupported_in_value_is_typed_error() {
        let err = build(&filter(json!({"code in": 5}))).unwrap_err();
        assert!(matches!(err, ConditionError::UnsupportedValue { .. }));
        assert_eq!(err.field(), "code");
        let err = build(&filter(json!({"code like": 5}))).unwrap_err();
        assert!(matches!(err, ConditionError::UnsupportedValue { .. }));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = build(&filter(json!({"code ~": "x"}))).unwrap_err();
        assert!(matches!(err, ConditionError::UnsupportedOperator { .. }));
    }

    #[test]
    fn raw_fragment_consumes_values_positionally() {
        let p = build(&filter(json!({"a = ? or b = ?": "1,2"}))).unwrap();
        assert_eq!(p.to_sql(), "(\"a\" = ? OR \"b\" = ?)");
        assert_eq!(p.values(), vec![json!("1"), json!("2")]);
        let binds: Vec<Option<String>> = p
            .parts()
            .iter()
            .filter_map(|x| match x {
                WherePart::Bind { column, .. } => Some(column.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![Some("a".into()), Some("b".into())]);
    }

    #[test]
    fn raw_fragment_rejects_injection_and_mismatch() {
        let err = build(&filter(json!({"a = ? ; drop": "1"}))).unwrap_err();
        assert!(matches!(err, ConditionError::InvalidFragment(_)));
        let err = build(&filter(json!({"a = ? or b = ?": "1"}))).unwrap_err();
        assert!(matches!(
            err,
            ConditionError::PlaceholderMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn invalid_field_names_never_reach_sql() {
        let err = build(&filter(json!({"na\"me": "x"}))).unwrap_err();
        assert!(matches!(err, ConditionError::InvalidIdentifier(_)));
    }

    #[test]
    fn null_means_is_null() {
        let p = build(&filter(json!({"deleted_at": null}))).unwrap();
        assert_eq!(p.to_sql(), "\"deleted_at\" IS NULL");
    }

    #[test]
    fn referenced_columns_cover_fragments() {
        let p = build(&filter(json!({"a = ? or b = ?": "1,2", "c": "x"}))).unwrap();
        assert_eq!(p.columns(), vec!["a", "b", "c"]);
    }
}
