//! End-to-end tests running whole queries through [`crate::validate`].

use catalog::{ColumnType, SchemaCatalog, TableDescriptor};

use crate::{ValidationReport, ValidatorConfig};

mod pipeline;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `orders` requires a filter on `created_at`, `shops` is not partitioned.
pub(crate) fn shop_catalog() -> SchemaCatalog {
    let orders = TableDescriptor::builder("shop.sales.orders")
        .column("order_id", ColumnType::Int64)
        .column("shop_id", ColumnType::Int64)
        .column("created_at", ColumnType::Timestamp)
        .column("amount", ColumnType::Numeric)
        .column("quantity", ColumnType::Int64)
        .partitioned_by("created_at")
        .require_partition_filter()
        .build()
        .unwrap();
    let shops = TableDescriptor::builder("shop.sales.shops")
        .column("shop_id", ColumnType::Int64)
        .column("name", ColumnType::String)
        .column("opened_on", ColumnType::Date)
        .build()
        .unwrap();
    SchemaCatalog::load(vec![orders, shops]).unwrap()
}

pub(crate) fn validate(query: &str) -> ValidationReport {
    init_logger();
    crate::validate(query, &shop_catalog(), &ValidatorConfig::default())
}
