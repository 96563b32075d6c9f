//! 表描述 / Table descriptor
//!
//! 由字段目录快照推导出的运行时表结构：有序列、索引与 upsert 冲突键。
//! Runtime table shape derived from a catalog snapshot: ordered columns, indexes and the upsert conflict key.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use v::ColType;

use crate::error::{MdmError, MdmResult};
use crate::modules::schema::field::{validate_table_code, FieldDefinition, PrimitiveType};

/// 物理表变体 / Physical table variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableKind {
    Live,
    Draft,
    Log,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [TableKind::Live, TableKind::Draft, TableKind::Log];

    fn suffix(&self) -> &'static str {
        match self {
            TableKind::Live => "",
            TableKind::Draft => "_draft",
            TableKind::Log => "_log",
        }
    }

    /// 草稿与日志表允许重复，不建唯一索引 / drafts and logs may collide
    pub fn allows_unique(&self) -> bool {
        matches!(self, TableKind::Live)
    }
}

/// 物理表名：`t_{code}`、`t_{code}_draft`、`t_{code}_log`
pub fn table_name(table_code: &str, kind: TableKind) -> MdmResult<String> {
    validate_table_code(table_code)?;
    let name = format!("t_{}{}", table_code, kind.suffix());
    v::validate_identifier(&name)?;
    Ok(name)
}

/// 物理列类型 / Physical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Varchar(u32),
    Numeric { precision: u32, scale: u32 },
    BigInt,
    Date,
    /// 毫秒精度时间戳 / millisecond-precision timestamp
    Timestamp,
}

impl SqlType {
    pub fn ddl(&self) -> String {
        match self {
            SqlType::Varchar(n) => format!("varchar({})", n),
            SqlType::Numeric { precision, scale } => format!("numeric({},{})", precision, scale),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Date => "date".to_string(),
            SqlType::Timestamp => "timestamp(3)".to_string(),
        }
    }

    pub fn col_type(&self) -> ColType {
        match self {
            SqlType::Varchar(_) => ColType::Text,
            SqlType::Numeric { .. } => ColType::Decimal,
            SqlType::BigInt => ColType::Int64,
            SqlType::Date => ColType::Date,
            SqlType::Timestamp => ColType::Timestamp,
        }
    }

    /// 业务字段类型映射 / business field type mapping
    pub fn for_field(f: &FieldDefinition) -> SqlType {
        match f.primitive_type {
            PrimitiveType::Text => SqlType::Varchar(f.length.filter(|l| *l > 0).unwrap_or(255) as u32),
            PrimitiveType::Number => match (f.numeric.precision, f.numeric.scale) {
                (Some(precision), Some(scale)) => SqlType::Numeric { precision, scale },
                _ => SqlType::BigInt,
            },
            PrimitiveType::Date => SqlType::Date,
            PrimitiveType::DateTime => SqlType::Timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnOrigin {
    Key,
    Business,
    System,
    Audit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<String>,
    pub origin: ColumnOrigin,
    /// 业务必填（仅正式表创建时校验）/ required on live create
    pub required: bool,
}

impl ColumnSpec {
    fn system(name: &str, sql_type: SqlType, default: Option<&str>, origin: ColumnOrigin) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            nullable: true,
            default: default.map(str::to_string),
            origin,
            required: false,
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.origin == ColumnOrigin::Key
    }

    /// 建表/加列时的列定义 / column definition for CREATE/ADD
    pub fn ddl(&self) -> String {
        let ident = v::quote_ident(&self.name);
        if self.is_primary_key() {
            return format!("{} bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY", ident);
        }
        let mut out = format!("{} {}", ident, self.sql_type.ddl());
        if let Some(d) = &self.default {
            out.push_str(" DEFAULT ");
            out.push_str(d);
        }
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    fn new(prefix: &str, table: &str, group: &str, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: v::truncate_ident(&format!("{}_{}_{}", prefix, table, group)),
            columns,
            unique,
        }
    }

    pub fn ddl(&self, table: &str) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| v::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            v::quote_ident(&self.name),
            v::quote_ident(table),
            cols
        )
    }
}

/// 运行时表描述 / Runtime table descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub table_code: String,
    pub kind: TableKind,
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
    pub conflict_columns: Vec<String>,
}

/// upsert 冲突键：唯一字段按索引优先级排序，没有则退回 `id`
/// Upsert conflict key: unique fields by index priority, or `id` when none
pub fn conflict_columns(fields: &[FieldDefinition]) -> Vec<String> {
    let mut unique: Vec<&FieldDefinition> = fields
        .iter()
        .filter(|f| f.is_active() && f.is_unique)
        .collect();
    if unique.is_empty() {
        return vec!["id".to_string()];
    }
    unique.sort_by(|a, b| {
        (a.index_priority, a.sort_order, &a.code).cmp(&(b.index_priority, b.sort_order, &b.code))
    });
    unique.into_iter().map(|f| f.code.clone()).collect()
}

impl TableDescriptor {
    pub fn build(table_code: &str, kind: TableKind, fields: &[FieldDefinition]) -> MdmResult<Self> {
        let table = table_name(table_code, kind)?;

        let mut business: Vec<&FieldDefinition> = fields
            .iter()
            .filter(|f| f.is_active() && f.table_code == table_code)
            .collect();
        business.sort_by(|a, b| (a.sort_order, a.id, &a.code).cmp(&(b.sort_order, b.id, &b.code)));

        let mut seen = HashSet::new();
        let mut columns = vec![ColumnSpec {
            name: "id".to_string(),
            sql_type: SqlType::BigInt,
            nullable: false,
            default: None,
            origin: ColumnOrigin::Key,
            required: false,
        }];
        for f in &business {
            f.validate()?;
            if !seen.insert(f.code.to_ascii_lowercase()) {
                return Err(MdmError::validation(
                    "code",
                    format!("字段编码 '{}' 重复", f.code),
                ));
            }
            let sql_type = SqlType::for_field(f);
            let default = match sql_type {
                SqlType::BigInt | SqlType::Numeric { .. } => Some("0".to_string()),
                _ => None,
            };
            columns.push(ColumnSpec {
                name: f.code.clone(),
                sql_type,
                nullable: true,
                default,
                origin: ColumnOrigin::Business,
                required: f.required,
            });
        }

        use ColumnOrigin::{Audit, System};
        columns.push(ColumnSpec::system("operation", SqlType::Varchar(16), None, System));
        columns.push(ColumnSpec::system("action", SqlType::Varchar(4), None, System));
        columns.push(ColumnSpec::system("send_status", SqlType::BigInt, Some("0"), System));
        if kind != TableKind::Live {
            columns.push(ColumnSpec::system("entity_id", SqlType::BigInt, Some("0"), System));
            columns.push(ColumnSpec::system("approval_code", SqlType::Varchar(64), None, System));
        }
        if kind == TableKind::Draft {
            columns.push(ColumnSpec::system("draft_status", SqlType::Varchar(16), None, System));
        }
        columns.push(ColumnSpec::system("status", SqlType::Varchar(16), None, Audit));
        columns.push(ColumnSpec::system("created_by", SqlType::Varchar(64), None, Audit));
        columns.push(ColumnSpec::system("updated_by", SqlType::Varchar(64), None, Audit));
        columns.push(ColumnSpec::system("created_at", SqlType::Timestamp, None, Audit));
        columns.push(ColumnSpec::system("updated_at", SqlType::Timestamp, None, Audit));
        columns.push(ColumnSpec::system("deleted_at", SqlType::Timestamp, None, Audit));

        let mut indexes = Vec::new();
        let mut groups: BTreeMap<String, Vec<&FieldDefinition>> = BTreeMap::new();
        for f in business.iter().filter(|f| f.is_index && !f.is_unique) {
            groups.entry(f.index_group().to_string()).or_default().push(f);
        }
        for (group, mut members) in groups {
            members.sort_by_key(|f| (f.index_priority, f.sort_order));
            let cols = members.iter().map(|f| f.code.clone()).collect();
            indexes.push(IndexSpec::new("idx", &table, &group, cols, false));
        }

        let unique_key = conflict_columns(&business.iter().map(|f| (*f).clone()).collect::<Vec<_>>());
        let has_unique = unique_key != ["id"];
        if has_unique && kind.allows_unique() {
            let group = business
                .iter()
                .find(|f| f.is_unique && f.code == unique_key[0])
                .map(|f| f.index_group().to_string())
                .unwrap_or_else(|| "key".to_string());
            indexes.push(IndexSpec::new("uk", &table, &group, unique_key.clone(), true));
        }
        indexes.push(IndexSpec::new("idx", &table, "deleted_at", vec!["deleted_at".into()], false));
        if kind != TableKind::Live {
            indexes.push(IndexSpec::new("idx", &table, "entity_id", vec!["entity_id".into()], false));
            indexes.push(IndexSpec::new(
                "idx",
                &table,
                "approval_code",
                vec!["approval_code".into()],
                false,
            ));
        }

        let conflict = if kind.allows_unique() {
            unique_key
        } else {
            vec!["id".to_string()]
        };

        Ok(Self {
            table_code: table_code.to_string(),
            kind,
            table_name: table,
            columns,
            indexes,
            conflict_columns: conflict,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn col_type(&self, name: &str) -> Option<ColType> {
        self.column(name).map(|c| c.sql_type.col_type())
    }

    pub fn business_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| c.origin == ColumnOrigin::Business)
    }

    /// 引号包裹的表名 / quoted table name
    pub fn quoted_table(&self) -> String {
        v::quote_ident(&self.table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::schema::field::NumericOptions;

    fn fields() -> Vec<FieldDefinition> {
        let mut name = FieldDefinition::new("customer", "name", "名称", PrimitiveType::Text);
        name.length = Some(100);
        name.is_index = true;
        name.sort_order = 2;
        let mut code = FieldDefinition::new("customer", "code", "编码", PrimitiveType::Text);
        code.is_unique = true;
        code.index_name = Some("code".into());
        code.sort_order = 1;
        let mut amount = FieldDefinition::new("customer", "amount", "金额", PrimitiveType::Number);
        amount.numeric = NumericOptions {
            precision: Some(12),
            scale: Some(2),
        };
        amount.sort_order = 3;
        let mut qty = FieldDefinition::new("customer", "qty", "数量", PrimitiveType::Number);
        qty.sort_order = 4;
        let mut born = FieldDefinition::new("customer", "born", "生日", PrimitiveType::Date);
        born.sort_order = 5;
        let mut seen = FieldDefinition::new("customer", "seen_at", "时间", PrimitiveType::DateTime);
        seen.sort_order = 6;
        vec![name, code, amount, qty, born, seen]
    }

    #[test]
    fn type_mapping() {
        let d = TableDescriptor::build("customer", TableKind::Live, &fields()).unwrap();
        assert_eq!(d.table_name, "t_customer");
        assert_eq!(d.column("name").unwrap().sql_type.ddl(), "varchar(100)");
        assert_eq!(d.column("code").unwrap().sql_type.ddl(), "varchar(255)");
        assert_eq!(d.column("amount").unwrap().sql_type.ddl(), "numeric(12,2)");
        assert_eq!(d.column("qty").unwrap().sql_type.ddl(), "bigint");
        assert_eq!(d.column("qty").unwrap().default.as_deref(), Some("0"));
        assert_eq!(d.column("born").unwrap().sql_type.ddl(), "date");
        assert_eq!(d.column("seen_at").unwrap().sql_type.ddl(), "timestamp(3)");
    }

    #[test]
    fn system_and_audit_columns_bind_as_text_integer_or_timestamp() {
        let d = TableDescriptor::build("customer", TableKind::Draft, &fields()).unwrap();
        assert_eq!(d.col_type("amount"), Some(ColType::Decimal));
        assert_eq!(d.col_type("send_status"), Some(ColType::Int64));
        assert_eq!(d.col_type("entity_id"), Some(ColType::Int64));
        assert_eq!(d.col_type("draft_status"), Some(ColType::Text));
        assert_eq!(d.col_type("created_at"), Some(ColType::Timestamp));
        assert_eq!(d.col_type("deleted_at"), Some(ColType::Timestamp));
    }

    #[test]
    fn column_order_and_single_primary_key() {
        let d = TableDescriptor::build("customer", TableKind::Draft, &fields()).unwrap();
        let names: Vec<&str> = d.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names[0], "id");
        assert_eq!(&names[1..4], &["code", "name", "amount"]);
        assert!(names.contains(&"draft_status"));
        assert!(names.contains(&"approval_code"));
        assert_eq!(*names.last().unwrap(), "deleted_at");
        assert_eq!(d.columns.iter().filter(|c| c.is_primary_key()).count(), 1);

        let live = TableDescriptor::build("customer", TableKind::Live, &fields()).unwrap();
        assert!(!live.has_column("draft_status"));
        assert!(!live.has_column("entity_id"));
        let log = TableDescriptor::build("customer", TableKind::Log, &fields()).unwrap();
        assert!(log.has_column("entity_id"));
        assert!(!log.has_column("draft_status"));
    }

    #[test]
    fn draft_and_log_suppress_unique_indexes() {
        let live = TableDescriptor::build("customer", TableKind::Live, &fields()).unwrap();
        assert!(live.indexes.iter().any(|i| i.unique && i.columns == ["code"]));
        assert_eq!(live.conflict_columns, vec!["code"]);
        assert!(live.indexes.iter().any(|i| !i.unique && i.columns == ["name"]));

        for kind in [TableKind::Draft, TableKind::Log] {
            let d = TableDescriptor::build("customer", kind, &fields()).unwrap();
            assert!(d.indexes.iter().all(|i| !i.unique));
            assert!(d.indexes.iter().any(|i| i.columns == ["name"]));
            assert_eq!(d.conflict_columns, vec!["id"]);
        }
    }

    #[test]
    fn conflict_key_falls_back_to_id() {
        let plain = vec![FieldDefinition::new("c", "name", "n", PrimitiveType::Text)];
        assert_eq!(conflict_columns(&plain), vec!["id"]);

        let mut a = FieldDefinition::new("c", "a", "a", PrimitiveType::Text);
        a.is_unique = true;
        a.index_priority = 2;
        let mut b = FieldDefinition::new("c", "b", "b", PrimitiveType::Text);
        b.is_unique = true;
        b.index_priority = 1;
        let mut retired = FieldDefinition::new("c", "z", "z", PrimitiveType::Text);
        retired.is_unique = true;
        retired.status = crate::modules::schema::field::RecordStatus::Deleted;
        assert_eq!(conflict_columns(&[a, b, retired]), vec!["b", "a"]);
    }

    #[test]
    fn composite_index_groups_by_name() {
        let mut a = FieldDefinition::new("c", "a", "a", PrimitiveType::Text);
        a.is_index = true;
        a.index_name = Some("ab".into());
        a.index_priority = 2;
        let mut b = FieldDefinition::new("c", "b", "b", PrimitiveType::Text);
        b.is_index = true;
        b.index_name = Some("ab".into());
        b.index_priority = 1;
        let d = TableDescriptor::build("c", TableKind::Live, &[a, b]).unwrap();
        let idx = d.indexes.iter().find(|i| i.name == "idx_t_c_ab").unwrap();
        assert_eq!(idx.columns, vec!["b", "a"]);
        assert_eq!(
            idx.ddl(&d.table_name),
            "CREATE INDEX IF NOT EXISTS \"idx_t_c_ab\" ON \"t_c\" (\"b\", \"a\")"
        );
    }

    #[test]
    fn rejects_unsafe_table_codes_and_duplicates() {
        assert!(TableDescriptor::build("x; drop", TableKind::Live, &[]).is_err());
        let dup = vec![
            FieldDefinition::new("c", "a", "a", PrimitiveType::Text),
            FieldDefinition::new("c", "A", "a", PrimitiveType::Text),
        ];
        assert!(TableDescriptor::build("c", TableKind::Live, &dup).is_err());
    }
}
