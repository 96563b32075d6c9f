//! 字段目录模型 / Field catalog model

use serde::{Deserialize, Serialize};

use crate::error::{MdmError, MdmResult};

/// 系统保留列，业务字段不能使用 / reserved system columns
pub const SYSTEM_FIELDS: [&str; 13] = [
    "id",
    "operation",
    "action",
    "send_status",
    "entity_id",
    "approval_code",
    "draft_status",
    "status",
    "created_by",
    "updated_by",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub fn is_system_field(code: &str) -> bool {
    SYSTEM_FIELDS.contains(&code.to_ascii_lowercase().as_str())
}

/// 表编码最大长度：`t_{code}_draft` 也要满足 63 字节限制
pub const MAX_TABLE_CODE_LEN: usize = 57;
const MAX_TEXT_LEN: i32 = 10_485_760;
const MAX_PRECISION: u32 = 38;

/// 字符串枚举的解析错误 / parse error for string-backed enums
#[derive(Debug, thiserror::Error)]
#[error("无法识别的 {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// 为字符串存储的枚举生成 `as_str`/`FromStr`/`TryFrom<String>`/`Display`
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::modules::schema::field::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err($crate::modules::schema::field::ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::modules::schema::field::ParseEnumError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
pub(crate) use string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Text,
    Number,
    Date,
    DateTime,
}

string_enum!(PrimitiveType, "primitive type", {
    Text => "Text",
    Number => "Number",
    Date => "Date",
    DateTime => "DateTime",
});

/// 目录与实体共用的记录状态 / record status shared by catalog rows and entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Normal,
    Frozen,
    Deleted,
}

string_enum!(RecordStatus, "record status", {
    Normal => "Normal",
    Frozen => "Frozen",
    Deleted => "Deleted",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericOptions {
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

/// 字段定义 / Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(default)]
    pub id: i64,
    pub table_code: String,
    pub code: String,
    pub name: String,
    pub primitive_type: PrimitiveType,
    #[serde(default)]
    pub length: Option<i32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub is_index: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub index_priority: i32,
    #[serde(default)]
    pub numeric: NumericOptions,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_status")]
    pub status: RecordStatus,
}

fn default_status() -> RecordStatus {
    RecordStatus::Normal
}

impl FieldDefinition {
    pub fn new(
        table_code: impl Into<String>,
        code: impl Into<String>,
        name: impl Into<String>,
        primitive_type: PrimitiveType,
    ) -> Self {
        Self {
            id: 0,
            table_code: table_code.into(),
            code: code.into(),
            name: name.into(),
            primitive_type,
            length: None,
            required: false,
            is_index: false,
            is_unique: false,
            index_name: None,
            index_priority: 0,
            numeric: NumericOptions::default(),
            sort_order: 0,
            status: RecordStatus::Normal,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Normal
    }

    /// 带精度与小数位的数值字段映射为定点小数
    pub fn is_decimal(&self) -> bool {
        self.primitive_type == PrimitiveType::Number
            && self.numeric.precision.is_some()
            && self.numeric.scale.is_some()
    }

    /// 索引组名，缺省为字段编码 / index group name, field code by default
    pub fn index_group(&self) -> &str {
        match self.index_name.as_deref() {
            Some(n) if !n.trim().is_empty() => n.trim(),
            _ => &self.code,
        }
    }

    pub fn validate(&self) -> MdmResult<()> {
        validate_table_code(&self.table_code)?;
        if !v::is_identifier(&self.code) {
            return Err(MdmError::validation(
                "code",
                format!("字段编码 '{}' 必须为字母开头的字母、数字、下划线组合", self.code),
            ));
        }
        if is_system_field(&self.code) {
            return Err(MdmError::validation(
                "code",
                format!("字段编码 '{}' 是系统保留字段", self.code),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(MdmError::validation("name", "字段名称不能为空"));
        }
        if let Some(len) = self.length {
            if len <= 0 || len > MAX_TEXT_LEN {
                return Err(MdmError::validation(
                    "length",
                    format!("长度 {} 超出范围 1..={}", len, MAX_TEXT_LEN),
                ));
            }
        }
        if let Some(p) = self.numeric.precision {
            if p == 0 || p > MAX_PRECISION {
                return Err(MdmError::validation(
                    "precision",
                    format!("精度 {} 超出范围 1..={}", p, MAX_PRECISION),
                ));
            }
            if let Some(s) = self.numeric.scale {
                if s > p {
                    return Err(MdmError::validation(
                        "scale",
                        format!("小数位 {} 不能大于精度 {}", s, p),
                    ));
                }
            }
        }
        if let Some(name) = self.index_name.as_deref() {
            if !name.trim().is_empty() && !v::is_identifier(name.trim()) {
                return Err(MdmError::validation(
                    "index_name",
                    format!("索引名 '{}' 非法", name),
                ));
            }
        }
        Ok(())
    }
}

/// 用户自定义表登记 / Registered user-defined table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub code: String,
    pub name: String,
    pub status: RecordStatus,
}

pub fn validate_table_code(code: &str) -> MdmResult<()> {
    if !v::is_identifier(code) || code.len() > MAX_TABLE_CODE_LEN {
        return Err(MdmError::validation(
            "table_code",
            format!("表编码 '{}' 非法", code),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(code: &str) -> FieldDefinition {
        FieldDefinition::new("customer", code, "名称", PrimitiveType::Text)
    }

    #[test]
    fn system_columns_are_reserved() {
        for code in ["id", "status", "Deleted_At"] {
            let err = field(code).validate().unwrap_err();
            assert!(matches!(err, MdmError::Validation { ref field, .. } if field == "code"));
        }
        assert!(field("customer_name").validate().is_ok());
    }

    #[test]
    fn numeric_bounds() {
        let mut f = FieldDefinition::new("customer", "amount", "金额", PrimitiveType::Number);
        f.numeric = NumericOptions {
            precision: Some(10),
            scale: Some(12),
        };
        assert!(f.validate().is_err());
        f.numeric.scale = Some(2);
        assert!(f.validate().is_ok());
        assert!(f.is_decimal());
    }

    #[test]
    fn table_code_length_leaves_room_for_suffixes() {
        assert!(validate_table_code(&"c".repeat(57)).is_ok());
        assert!(validate_table_code(&"c".repeat(58)).is_err());
        assert!(validate_table_code("bad-code").is_err());
    }

    #[test]
    fn enums_round_trip_through_strings() {
        assert_eq!("DateTime".parse::<PrimitiveType>().unwrap(), PrimitiveType::DateTime);
        assert!("Blob".parse::<PrimitiveType>().is_err());
        assert_eq!(RecordStatus::Frozen.to_string(), "Frozen");
    }
}
