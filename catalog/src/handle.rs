use std::{path::Path, sync::Arc};

use log::info;
use parking_lot::RwLock;

use crate::catalog::{CatalogError, SchemaCatalog};

/// Shared, atomically swappable reference to the current [`SchemaCatalog`].
///
/// Readers take a snapshot (`Arc`) and keep using it for as long as they need, even if the
/// catalog is reloaded in the meantime. Reload never blocks on in-flight validations, it only
/// waits for other threads that are taking a snapshot at the same moment.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Snapshot>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    catalog: Arc<SchemaCatalog>,
    version: u64,
}

impl CatalogHandle {
    pub fn new(catalog: SchemaCatalog) -> Self {
        CatalogHandle {
            current: RwLock::new(Snapshot {
                catalog: Arc::new(catalog),
                version: 0,
            }),
        }
    }

    /// Returns the catalog that is current at the moment of the call.
    pub fn snapshot(&self) -> Arc<SchemaCatalog> {
        self.current.read().catalog.clone()
    }

    /// Returns current catalog together with its version.
    pub fn versioned_snapshot(&self) -> (Arc<SchemaCatalog>, u64) {
        let snapshot = self.current.read();
        (snapshot.catalog.clone(), snapshot.version)
    }

    /// Replaces the current catalog with `catalog` and returns the new version.
    pub fn reload(&self, catalog: SchemaCatalog) -> u64 {
        let catalog = Arc::new(catalog);
        let mut current = self.current.write();
        current.catalog = catalog;
        current.version += 1;
        info!(
            "schema catalog reloaded (version {}, {} tables)",
            current.version,
            current.catalog.len()
        );
        current.version
    }

    /// Loads catalog from JSON file and swaps it in.
    /// On error the current catalog stays in place.
    pub fn reload_from_json_file(&self, path: impl AsRef<Path>) -> Result<u64, CatalogError> {
        let catalog = SchemaCatalog::from_json_file(path)?;
        Ok(self.reload(catalog))
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{catalog::TableDescriptor, types::ColumnType};

    fn catalog_with(table: &str) -> SchemaCatalog {
        let table = TableDescriptor::builder(table)
            .column("id", ColumnType::Int64)
            .build()
            .unwrap();
        SchemaCatalog::load(vec![table]).unwrap()
    }

    #[test]
    fn reload_swaps_catalog_and_keeps_old_snapshots_alive() {
        // given
        let handle = CatalogHandle::new(catalog_with("d.first"));
        let old = handle.snapshot();

        // when
        let version = handle.reload(catalog_with("d.second"));

        // then
        assert_eq!(version, 1);
        assert_eq!(handle.version(), 1);
        assert!(old.lookup("first").is_ok());
        assert!(old.lookup("second").is_err());
        let (new, new_version) = handle.versioned_snapshot();
        assert_eq!(new_version, 1);
        assert!(new.lookup("second").is_ok());
    }

    #[test]
    fn reload_from_json_file_keeps_current_catalog_on_error() {
        // given
        let handle = CatalogHandle::new(catalog_with("d.first"));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ broken").unwrap();

        // when
        let result = handle.reload_from_json_file(file.path());

        // then
        assert!(matches!(result, Err(CatalogError::Json(_))));
        assert_eq!(handle.version(), 0);
        assert!(handle.snapshot().lookup("first").is_ok());
    }

    #[test]
    fn snapshots_are_shared_across_threads() {
        let handle = Arc::new(CatalogHandle::new(catalog_with("d.first")));
        std::thread::scope(|s| {
            for _ in 0..4 {
                let handle = handle.clone();
                s.spawn(move || {
                    let snapshot = handle.snapshot();
                    assert_eq!(snapshot.len(), 1);
                });
            }
            handle.reload(catalog_with("d.second"));
        });
        assert_eq!(handle.version(), 1);
    }
}
