//! 标识符白名单 / Identifier allow-list
//!
//! 所有拼接进 SQL 的表名、列名、索引名都必须先通过这里的校验。
//! Every table, column and index name interpolated into SQL must pass through here first.

use regex::Regex;

use crate::db::condition::ConditionError;

/// PostgreSQL 标识符最大字节数 / PostgreSQL identifier length limit
pub const MAX_IDENT_LEN: usize = 63;

lazy_static::lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,62}$").expect("valid identifier regex");
}

/// 校验标识符（字母开头，字母数字下划线，最长 63）
/// Validate identifier (letter first, alphanumerics/underscore, at most 63 bytes)
pub fn validate_identifier(name: &str) -> Result<&str, ConditionError> {
    if IDENT_RE.is_match(name) {
        Ok(name)
    } else {
        Err(ConditionError::InvalidIdentifier(name.to_string()))
    }
}

pub fn is_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// 加双引号 / Quote identifier
///
/// 调用方必须先通过 `validate_identifier` / callers validate first
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// 截断到 63 字节，用于生成索引名 / Truncate generated names to 63 bytes
pub fn truncate_ident(name: &str) -> String {
    if name.len() <= MAX_IDENT_LEN {
        return name.to_string();
    }
    let mut end = MAX_IDENT_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_identifier("t_customer").is_ok());
        assert!(validate_identifier("A1").is_ok());
    }

    #[test]
    fn rejects_injection_and_bad_shapes() {
        for bad in ["", "1abc", "_x", "a b", "a;drop table x", "a\"b", "名称"] {
            assert!(validate_identifier(bad).is_err(), "{bad} should be rejected");
        }
        let long = "a".repeat(64);
        assert!(validate_identifier(&long).is_err());
        assert!(validate_identifier(&long[..63]).is_ok());
    }

    #[test]
    fn truncates_long_names() {
        let long = format!("idx_{}", "x".repeat(80));
        assert_eq!(truncate_ident(&long).len(), MAX_IDENT_LEN);
        assert_eq!(truncate_ident("idx_a"), "idx_a");
    }
}
