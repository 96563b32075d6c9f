//! 字段目录与表结构编译 / Field catalog and schema compilation

pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod descriptor;
pub mod field;

pub use cache::DescriptorCache;
pub use catalog::{CatalogStore, FieldCatalog, MemoryCatalogStore, PgCatalogStore};
pub use compiler::{plan, DdlStatement, ReconcileReport, ReconcileSummary, SchemaCompiler, TableState};
pub use descriptor::{table_name, ColumnSpec, SqlType, TableDescriptor, TableKind};
pub use field::{FieldDefinition, NumericOptions, PrimitiveType, RecordStatus, TableDefinition};
