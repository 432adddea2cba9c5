pub mod catalog;
pub mod handle;
pub mod types;

pub use catalog::{
    CatalogError, ColumnDescriptor, DescriptorError, SchemaCatalog, TableDescriptor,
    TableDescriptorBuilder,
};
pub use handle::CatalogHandle;
pub use types::{ColumnType, StructField, TypeParseError};
