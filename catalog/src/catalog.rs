//! Catalog module - immutable schema information used by the validator.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::Path,
};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ColumnType;

/// [`SchemaCatalog`] is an in-memory, read-only view of the tables a query may reference.
///
/// It is built once (from descriptors or from a JSON document) and never mutated afterwards.
/// To pick up a newer schema, build a new [`SchemaCatalog`] and swap it through
/// [`crate::CatalogHandle::reload`].
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    /// Maps each qualified table name to its descriptor.
    tables: BTreeMap<String, TableDescriptor>,
}

/// Error for [`SchemaCatalog`] related operations
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No table matched provided name (neither exactly nor by unique suffix)
    #[error("table '{0}' not found")]
    NotFound(String),
    /// Provided name is a suffix of more than one qualified table name
    #[error("table name '{name}' is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousTable {
        name: String,
        candidates: Vec<String>,
    },
    /// Table exists but has no column with provided name
    #[error("column '{column}' not found in table '{table}'")]
    UnknownColumn { table: String, column: String },
    /// Table descriptor violated one of its invariants
    #[error("invalid descriptor for table '{table}': {source}")]
    InvalidDescriptor {
        table: String,
        #[source]
        source: DescriptorError,
    },
    /// Two descriptors share the same qualified name
    #[error("table '{0}' was defined more than once")]
    DuplicateTable(String),
    /// Underlying IO module returned error
    #[error("io error occurred: {0}")]
    Io(#[from] io::Error),
    /// File contains invalid json
    #[error("json error occurred: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaCatalog {
    /// Creates new [`SchemaCatalog`] from already validated descriptors.
    /// Can fail if two descriptors share the same qualified name.
    pub fn load(tables: Vec<TableDescriptor>) -> Result<Self, CatalogError> {
        let mut by_name = BTreeMap::new();
        for table in tables {
            if by_name.contains_key(&table.qualified_name) {
                return Err(CatalogError::DuplicateTable(table.qualified_name));
            }
            by_name.insert(table.qualified_name.clone(), table);
        }
        info!("schema catalog loaded with {} tables", by_name.len());
        Ok(SchemaCatalog { tables: by_name })
    }

    /// Parses catalog JSON document and builds [`SchemaCatalog`] from it.
    /// Fails fast on the first invalid table descriptor.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let catalog_json: CatalogJson = serde_json::from_str(json)?;
        let tables = catalog_json
            .tables
            .into_iter()
            .map(|t| {
                let name = t.name.clone();
                TableDescriptor::try_from(t)
                    .map_err(|source| CatalogError::InvalidDescriptor { table: name, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        SchemaCatalog::load(tables)
    }

    /// Reads catalog JSON file at `path` and builds [`SchemaCatalog`] from it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path)?;
        SchemaCatalog::from_json_str(&content)
    }

    /// Returns table with `name`.
    ///
    /// Exact qualified name match wins. Otherwise `name` is treated as a dot-segment suffix
    /// (`orders` or `dataset.orders` finds `project.dataset.orders`), which must be unique.
    pub fn lookup(&self, name: &str) -> Result<&TableDescriptor, CatalogError> {
        if let Some(table) = self.tables.get(name) {
            return Ok(table);
        }
        let candidates: Vec<&TableDescriptor> = self
            .tables
            .values()
            .filter(|t| t.matches_suffix(name))
            .collect();
        match candidates.as_slice() {
            [] => Err(CatalogError::NotFound(name.into())),
            [table] => Ok(table),
            _ => Err(CatalogError::AmbiguousTable {
                name: name.into(),
                candidates: candidates
                    .iter()
                    .map(|t| t.qualified_name.clone())
                    .collect(),
            }),
        }
    }

    /// Returns descriptor of `column` in `table`.
    /// Can fail if table does not exist or has no such column.
    pub fn resolve_column(
        &self,
        table: &str,
        column: &str,
    ) -> Result<&ColumnDescriptor, CatalogError> {
        let table = self.lookup(table)?;
        table
            .column(column)
            .ok_or_else(|| CatalogError::UnknownColumn {
                table: table.qualified_name.clone(),
                column: column.into(),
            })
    }

    /// Returns all tables sorted by their qualified name.
    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// [`TableDescriptor`] stores the schema of a single table.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    qualified_name: String,
    /// All table's columns in declaration order.
    columns: Vec<ColumnDescriptor>,
    /// Maps each lowercase column name to its index in `columns`.
    columns_by_name: HashMap<String, usize>,
    partition_column: Option<String>,
    requires_partition_filter: bool,
    clustering_columns: Vec<String>,
}

/// Error for [`TableDescriptor`] construction
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("table name cannot be empty")]
    EmptyName,
    /// More than one column with the same (case-insensitive) name
    #[error("column '{0}' was defined more than once")]
    DuplicatedColumn(String),
    /// `partition_column` does not name a column of the table
    #[error("unknown partition column: {0}")]
    UnknownPartitionColumn(String),
    /// `requires_partition_filter` is set but table has no partition column
    #[error("partition filter is required but table has no partition column")]
    PartitionFilterWithoutPartitionColumn,
    /// Clustering column does not name a column of the table
    #[error("unknown clustering column: {0}")]
    UnknownClusteringColumn(String),
    /// `is_partition_column` flag of a column disagrees with table's `partition_column`
    #[error("partition flag of column '{0}' does not match table partitioning")]
    PartitionFlagMismatch(String),
    /// `is_clustering_column` flag of a column disagrees with table's `clustering_columns`
    #[error("clustering flag of column '{0}' does not match table clustering")]
    ClusteringFlagMismatch(String),
}

impl TableDescriptor {
    /// Creates new [`TableDescriptor`] and checks all of its invariants.
    pub fn new(
        qualified_name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        partition_column: Option<String>,
        requires_partition_filter: bool,
        clustering_columns: Vec<String>,
    ) -> Result<Self, DescriptorError> {
        let qualified_name = qualified_name.into();
        if qualified_name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        let mut columns_by_name = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let key = column.name.to_ascii_lowercase();
            if columns_by_name.contains_key(&key) {
                return Err(DescriptorError::DuplicatedColumn(column.name.clone()));
            }
            columns_by_name.insert(key, idx);
        }

        if let Some(partition) = &partition_column
            && !columns_by_name.contains_key(&partition.to_ascii_lowercase())
        {
            return Err(DescriptorError::UnknownPartitionColumn(partition.clone()));
        }
        if requires_partition_filter && partition_column.is_none() {
            return Err(DescriptorError::PartitionFilterWithoutPartitionColumn);
        }
        for clustering in &clustering_columns {
            if !columns_by_name.contains_key(&clustering.to_ascii_lowercase()) {
                return Err(DescriptorError::UnknownClusteringColumn(clustering.clone()));
            }
        }

        for column in &columns {
            let is_partition = partition_column
                .as_ref()
                .is_some_and(|p| p.eq_ignore_ascii_case(&column.name));
            if is_partition != column.is_partition_column {
                return Err(DescriptorError::PartitionFlagMismatch(column.name.clone()));
            }
            let is_clustering = clustering_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&column.name));
            if is_clustering != column.is_clustering_column {
                return Err(DescriptorError::ClusteringFlagMismatch(column.name.clone()));
            }
        }

        Ok(TableDescriptor {
            qualified_name,
            columns,
            columns_by_name,
            partition_column,
            requires_partition_filter,
            clustering_columns,
        })
    }

    /// Starts building a descriptor for `qualified_name`. Column flags are derived from
    /// table-level partitioning and clustering, so the builder cannot produce mismatched flags.
    pub fn builder(qualified_name: impl Into<String>) -> TableDescriptorBuilder {
        TableDescriptorBuilder {
            qualified_name: qualified_name.into(),
            columns: Vec::new(),
            partition_column: None,
            requires_partition_filter: false,
            clustering_columns: Vec::new(),
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Returns last dot-segment of the qualified name (`orders` for `project.dataset.orders`).
    pub fn short_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    /// Returns column with `name` (case-insensitive) if it exists.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns_by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.columns[idx])
    }

    /// Returns all columns in declaration order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn partition_column(&self) -> Option<&str> {
        self.partition_column.as_deref()
    }

    pub fn requires_partition_filter(&self) -> bool {
        self.requires_partition_filter
    }

    pub fn clustering_columns(&self) -> &[String] {
        &self.clustering_columns
    }

    fn matches_suffix(&self, name: &str) -> bool {
        let qualified = self.qualified_name.to_ascii_lowercase();
        let name = name.to_ascii_lowercase();
        qualified == name || qualified.ends_with(&format!(".{name}"))
    }
}

/// Structure for creating new [`TableDescriptor`] column by column.
pub struct TableDescriptorBuilder {
    qualified_name: String,
    columns: Vec<(String, ColumnType, bool)>,
    partition_column: Option<String>,
    requires_partition_filter: bool,
    clustering_columns: Vec<String>,
}

impl TableDescriptorBuilder {
    /// Adds non-nullable column.
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((name.into(), ty, false));
        self
    }

    pub fn nullable_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((name.into(), ty, true));
        self
    }

    pub fn partitioned_by(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    pub fn require_partition_filter(mut self) -> Self {
        self.requires_partition_filter = true;
        self
    }

    pub fn clustered_by(mut self, columns: &[&str]) -> Self {
        self.clustering_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn build(self) -> Result<TableDescriptor, DescriptorError> {
        let columns = self
            .columns
            .into_iter()
            .map(|(name, ty, nullable)| {
                let is_partition = self
                    .partition_column
                    .as_ref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(&name));
                let is_clustering = self
                    .clustering_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&name));
                ColumnDescriptor::new(name, ty)
                    .with_nullable(nullable)
                    .with_partition(is_partition)
                    .with_clustering(is_clustering)
            })
            .collect();
        TableDescriptor::new(
            self.qualified_name,
            columns,
            self.partition_column,
            self.requires_partition_filter,
            self.clustering_columns,
        )
    }
}

/// [`ColumnDescriptor`] stores the schema of a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    name: String,
    ty: ColumnType,
    nullable: bool,
    is_partition_column: bool,
    is_clustering_column: bool,
}

impl ColumnDescriptor {
    /// Creates new nullable, non-partition, non-clustering column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnDescriptor {
            name: name.into(),
            ty,
            nullable: true,
            is_partition_column: false,
            is_clustering_column: false,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_partition(mut self, is_partition_column: bool) -> Self {
        self.is_partition_column = is_partition_column;
        self
    }

    pub fn with_clustering(mut self, is_clustering_column: bool) -> Self {
        self.is_clustering_column = is_clustering_column;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_partition_column(&self) -> bool {
        self.is_partition_column
    }

    pub fn is_clustering_column(&self) -> bool {
        self.is_clustering_column
    }
}

/// [`CatalogJson`] is a representation of [`SchemaCatalog`] in a JSON file. Used only for deserializing.
#[derive(Serialize, Deserialize)]
struct CatalogJson {
    tables: Vec<TableJson>,
}

/// [`TableJson`] is a representation of [`TableDescriptor`] in a JSON file.
#[derive(Serialize, Deserialize)]
struct TableJson {
    name: String,
    columns: Vec<ColumnJson>,
    #[serde(default)]
    partition_column: Option<String>,
    #[serde(default)]
    require_partition_filter: bool,
    #[serde(default)]
    clustering_columns: Vec<String>,
}

impl TryFrom<TableJson> for TableDescriptor {
    type Error = DescriptorError;

    fn try_from(value: TableJson) -> Result<Self, Self::Error> {
        let mut builder = TableDescriptor::builder(value.name);
        for column in value.columns {
            builder = match column.nullable {
                true => builder.nullable_column(column.name, column.ty),
                false => builder.column(column.name, column.ty),
            };
        }
        if let Some(partition) = value.partition_column {
            builder = builder.partitioned_by(partition);
        }
        if value.require_partition_filter {
            builder = builder.require_partition_filter();
        }
        builder.clustering_columns = value.clustering_columns;
        builder.build()
    }
}

/// [`ColumnJson`] is a representation of [`ColumnDescriptor`] in a JSON file.
#[derive(Serialize, Deserialize)]
struct ColumnJson {
    name: String,
    #[serde(rename = "type")]
    ty: ColumnType,
    #[serde(default = "nullable_by_default")]
    nullable: bool,
}

fn nullable_by_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;
    use serde::de::Error;

    fn orders_table() -> TableDescriptor {
        TableDescriptor::builder("shop.sales.orders")
            .column("order_id", ColumnType::Int64)
            .column("created_at", ColumnType::Timestamp)
            .nullable_column("shop_id", ColumnType::Int64)
            .nullable_column("amount", ColumnType::Numeric)
            .partitioned_by("created_at")
            .require_partition_filter()
            .clustered_by(&["shop_id"])
            .build()
            .unwrap()
    }

    fn customers_table(qualified_name: &str) -> TableDescriptor {
        TableDescriptor::builder(qualified_name)
            .column("customer_id", ColumnType::Int64)
            .nullable_column("signup_date", ColumnType::Date)
            .build()
            .unwrap()
    }

    // Helper to check if error variant is as expected
    fn assert_catalog_error_variant(actual: &CatalogError, expected: &CatalogError) {
        assert_eq!(
            mem::discriminant(actual),
            mem::discriminant(expected),
            "CatalogError variant does not match, got: {actual:?}"
        );
    }

    #[test]
    fn table_descriptor_builder_sets_column_flags() {
        // given
        let table = orders_table();

        // then
        let created_at = table.column("created_at").unwrap();
        assert!(created_at.is_partition_column());
        assert!(!created_at.is_clustering_column());
        assert!(!created_at.nullable());
        let shop_id = table.column("SHOP_ID").unwrap();
        assert!(shop_id.is_clustering_column());
        assert!(shop_id.nullable());
        assert_eq!(table.partition_column(), Some("created_at"));
        assert!(table.requires_partition_filter());
        assert_eq!(table.short_name(), "orders");
    }

    #[test]
    fn table_descriptor_new_returns_error_on_duplicate_column_names() {
        let result = TableDescriptor::builder("t")
            .column("id", ColumnType::Int64)
            .column("ID", ColumnType::String)
            .build();
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::DuplicatedColumn("ID".into())
        );
    }

    #[test]
    fn table_descriptor_new_returns_error_when_filter_required_without_partition() {
        let result = TableDescriptor::builder("t")
            .column("id", ColumnType::Int64)
            .require_partition_filter()
            .build();
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::PartitionFilterWithoutPartitionColumn
        );
    }

    #[test]
    fn table_descriptor_new_returns_error_on_unknown_partition_column() {
        let result = TableDescriptor::builder("t")
            .column("id", ColumnType::Int64)
            .partitioned_by("day")
            .require_partition_filter()
            .build();
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::UnknownPartitionColumn("day".into())
        );
    }

    #[test]
    fn table_descriptor_new_returns_error_on_unknown_clustering_column() {
        let result = TableDescriptor::builder("t")
            .column("id", ColumnType::Int64)
            .clustered_by(&["region"])
            .build();
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::UnknownClusteringColumn("region".into())
        );
    }

    #[test]
    fn table_descriptor_new_returns_error_on_flag_mismatch() {
        // given column flagged as partition column while table is not partitioned
        let columns = vec![ColumnDescriptor::new("day", ColumnType::Date).with_partition(true)];

        // when
        let result = TableDescriptor::new("t", columns, None, false, vec![]);

        // then
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::PartitionFlagMismatch("day".into())
        );

        let columns = vec![ColumnDescriptor::new("region", ColumnType::String)];
        let result = TableDescriptor::new("t", columns, None, false, vec!["region".into()]);
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::ClusteringFlagMismatch("region".into())
        );
    }

    #[test]
    fn schema_catalog_load_rejects_duplicate_tables() {
        let result = SchemaCatalog::load(vec![orders_table(), orders_table()]);
        assert_catalog_error_variant(
            &result.unwrap_err(),
            &CatalogError::DuplicateTable(String::new()),
        );
    }

    #[test]
    fn schema_catalog_lookup_finds_exact_and_suffix_names() {
        // given
        let catalog =
            SchemaCatalog::load(vec![orders_table(), customers_table("shop.crm.customers")])
                .unwrap();

        // then
        assert_eq!(
            catalog.lookup("shop.sales.orders").unwrap().qualified_name(),
            "shop.sales.orders"
        );
        assert_eq!(
            catalog.lookup("orders").unwrap().qualified_name(),
            "shop.sales.orders"
        );
        assert_eq!(
            catalog.lookup("crm.customers").unwrap().qualified_name(),
            "shop.crm.customers"
        );
        assert_catalog_error_variant(
            &catalog.lookup("ders").unwrap_err(),
            &CatalogError::NotFound(String::new()),
        );
    }

    #[test]
    fn schema_catalog_lookup_returns_error_on_ambiguous_suffix() {
        let catalog = SchemaCatalog::load(vec![
            customers_table("a.crm.customers"),
            customers_table("b.crm.customers"),
        ])
        .unwrap();

        let err = catalog.lookup("customers").unwrap_err();
        let CatalogError::AmbiguousTable { candidates, .. } = err else {
            panic!("Expected ambiguous table error, got {err:?}");
        };
        assert_eq!(candidates, vec!["a.crm.customers", "b.crm.customers"]);
    }

    #[test]
    fn schema_catalog_resolve_column() {
        let catalog = SchemaCatalog::load(vec![orders_table()]).unwrap();

        let column = catalog.resolve_column("orders", "Created_At").unwrap();
        assert_eq!(column.ty(), &ColumnType::Timestamp);

        let err = catalog.resolve_column("orders", "missing").unwrap_err();
        let CatalogError::UnknownColumn { table, column } = err else {
            panic!("Expected unknown column error, got {err:?}");
        };
        assert_eq!(table, "shop.sales.orders");
        assert_eq!(column, "missing");
    }

    #[test]
    fn schema_catalog_from_json_str_loads_tables() {
        // given
        let json = r#"
        {
            "tables": [
                {
                    "name": "shop.sales.orders",
                    "columns": [
                        { "name": "order_id", "type": "INT64", "nullable": false },
                        { "name": "created_at", "type": "TIMESTAMP" },
                        { "name": "items", "type": "ARRAY<STRUCT<sku STRING, qty INT64>>" }
                    ],
                    "partition_column": "created_at",
                    "require_partition_filter": true
                }
            ]
        }"#;

        // when
        let catalog = SchemaCatalog::from_json_str(json).unwrap();

        // then
        let orders = catalog.lookup("orders").unwrap();
        assert!(orders.requires_partition_filter());
        assert!(orders.column("created_at").unwrap().is_partition_column());
        assert!(!orders.column("order_id").unwrap().nullable());
        assert!(matches!(
            orders.column("items").unwrap().ty(),
            ColumnType::Array(_)
        ));
    }

    #[test]
    fn schema_catalog_from_json_str_wraps_descriptor_errors() {
        let json = r#"
        {
            "tables": [
                {
                    "name": "broken",
                    "columns": [{ "name": "id", "type": "INT64" }],
                    "require_partition_filter": true
                }
            ]
        }"#;

        let err = SchemaCatalog::from_json_str(json).unwrap_err();
        let CatalogError::InvalidDescriptor { table, source } = err else {
            panic!("Expected invalid descriptor error, got {err:?}");
        };
        assert_eq!(table, "broken");
        assert_eq!(source, DescriptorError::PartitionFilterWithoutPartitionColumn);
    }

    #[test]
    fn schema_catalog_from_json_str_returns_error_on_invalid_json() {
        assert_catalog_error_variant(
            &SchemaCatalog::from_json_str("not a json").unwrap_err(),
            &CatalogError::Json(serde_json::Error::custom("")),
        );
        assert_catalog_error_variant(
            &SchemaCatalog::from_json_str(r#"{"tables": [{"name": "t", "columns": [{"name": "a", "type": "VARCHAR"}]}]}"#)
                .unwrap_err(),
            &CatalogError::Json(serde_json::Error::custom("")),
        );
    }

    #[test]
    fn schema_catalog_from_json_file_reads_file() {
        // given
        let mut file = tempfile::NamedTempFile::new().unwrap();
        io::Write::write_all(
            &mut file,
            br#"{"tables": [{"name": "d.events", "columns": [{"name": "day", "type": "DATE"}]}]}"#,
        )
        .unwrap();

        // when
        let catalog = SchemaCatalog::from_json_file(file.path()).unwrap();

        // then
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.resolve_column("events", "day").unwrap().ty(),
            &ColumnType::Date
        );
    }

    #[test]
    fn schema_catalog_from_json_file_returns_error_when_missing() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let result = SchemaCatalog::from_json_file(tmp_dir.path().join("missing.json"));
        assert_catalog_error_variant(
            &result.unwrap_err(),
            &CatalogError::Io(io::Error::new(io::ErrorKind::NotFound, "")),
        );
    }
}
