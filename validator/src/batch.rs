//! Fixed-size worker pool validating many queries against a single catalog snapshot.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use catalog::SchemaCatalog;
use crossbeam::channel;
use log::{debug, error};

use crate::ast::Span;
use crate::config::ValidatorConfig;
use crate::diagnostics::{Diagnostic, RuleId, ValidationReport, report_with_config};

/// Stack of every batch worker. Leaves headroom for a `max_depth` raised above the default.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Validates `queries` on `workers` threads and returns reports in input order.
///
/// Every job carries the index of its query, so completion order does not matter. A query whose
/// validation panics gets a report with a single `INTERNAL_ERROR` diagnostic and other queries of
/// the batch are not affected. Stack exhaustion is not a panic and cannot be caught: nesting is
/// bounded by [`ValidatorConfig::max_depth`] instead, and workers run on a
/// [`WORKER_STACK_SIZE`] stack.
pub(crate) fn validate_batch<Q>(
    queries: &[Q],
    catalog: &SchemaCatalog,
    config: &ValidatorConfig,
    workers: usize,
) -> Vec<ValidationReport>
where
    Q: AsRef<str> + Sync,
{
    if queries.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, queries.len());
    debug!("validating batch of {} queries on {workers} workers", queries.len());

    let (jobs_tx, jobs_rx) = channel::unbounded::<(usize, &str)>();
    let (results_tx, results_rx) = channel::unbounded::<(usize, ValidationReport)>();
    for (index, query) in queries.iter().enumerate() {
        // Receiver lives until the end of this function.
        let _ = jobs_tx.send((index, query.as_ref()));
    }
    drop(jobs_tx);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .filter_map(|worker| {
                let jobs = jobs_rx.clone();
                let results = results_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("validator-worker-{worker}"))
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn_scoped(scope, move || {
                        for (index, query) in jobs {
                            let report = validate_job(index, query, catalog, config);
                            if results.send((index, report)).is_err() {
                                error!("batch results channel closed, dropping report of query {index}");
                                return;
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        error!("Failed to spawn batch validation worker {worker}: {err}");
                        None
                    }
                }
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                error!("Failed to join batch validation worker");
            }
        }
    });
    drop(results_tx);

    let mut reports: Vec<Option<ValidationReport>> = vec![None; queries.len()];
    for (index, report) in results_rx {
        reports[index] = Some(report);
    }
    reports
        .into_iter()
        .enumerate()
        .map(|(index, report)| {
            report.unwrap_or_else(|| {
                error!("no report produced for query {index}");
                internal_error(queries[index].as_ref(), config)
            })
        })
        .collect()
}

fn validate_job(
    index: usize,
    query: &str,
    catalog: &SchemaCatalog,
    config: &ValidatorConfig,
) -> ValidationReport {
    match panic::catch_unwind(AssertUnwindSafe(|| crate::validate(query, catalog, config))) {
        Ok(report) => report,
        Err(_) => {
            error!("validation of query {index} panicked");
            internal_error(query, config)
        }
    }
}

fn internal_error(query: &str, config: &ValidatorConfig) -> ValidationReport {
    let diagnostic = Diagnostic::new(
        RuleId::InternalError,
        "internal error while validating query",
        Span::new(1, 1, 0, 0),
    );
    report_with_config(query, vec![diagnostic], config)
}

#[cfg(test)]
mod tests {
    use catalog::{ColumnType, TableDescriptor};

    use super::*;

    fn catalog() -> SchemaCatalog {
        let table = TableDescriptor::builder("proj.ds.items")
            .column("id", ColumnType::Int64)
            .column("price", ColumnType::Numeric)
            .column("sold_on", ColumnType::Date)
            .build()
            .unwrap();
        SchemaCatalog::load(vec![table]).unwrap()
    }

    #[test]
    fn empty_batch() {
        let queries: Vec<String> = Vec::new();
        let reports = validate_batch(&queries, &catalog(), &ValidatorConfig::default(), 4);
        assert!(reports.is_empty());
    }

    #[test]
    fn reports_follow_input_order() {
        // given
        let queries: Vec<String> = (0..40)
            .map(|i| match i % 2 {
                0 => format!("SELECT id + {i} FROM items"),
                _ => format!("SELECT missing_{i} FROM items"),
            })
            .collect();

        // when
        let reports = validate_batch(&queries, &catalog(), &ValidatorConfig::default(), 8);

        // then
        assert_eq!(reports.len(), queries.len());
        for (i, report) in reports.iter().enumerate() {
            match i % 2 {
                0 => assert!(report.ok, "query {i} should pass: {report:?}"),
                _ => {
                    assert_eq!(report.count(RuleId::UnresolvedReference), 1);
                    assert!(report.diagnostics[0].message.contains(&format!("missing_{i}")));
                }
            }
        }
    }

    #[test]
    fn matches_sequential_validation() {
        let catalog = catalog();
        let config = ValidatorConfig::default();
        let queries = [
            "SELECT id FROM items WHERE sold_on > CURRENT_TIMESTAMP()",
            "SELECT price / id FROM items",
            "SELECT (",
            "SELECT 1",
        ];
        let batch = validate_batch(&queries, &catalog, &config, 3);
        let sequential: Vec<_> = queries
            .iter()
            .map(|q| crate::validate(q, &catalog, &config))
            .collect();
        assert_eq!(batch, sequential);
    }

    #[test]
    fn more_workers_than_queries() {
        let reports = validate_batch(&["SELECT 1"], &catalog(), &ValidatorConfig::default(), 16);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].ok);
    }

    #[test]
    fn deep_queries_do_not_affect_rest_of_batch() {
        // given
        let queries = vec![
            "SELECT id FROM items".to_string(),
            format!("SELECT id FROM items WHERE {}", vec!["id = 1"; 20_000].join(" AND ")),
            format!("SELECT {}", vec!["price"; 20_000].join(" + ")),
            "SELECT missing FROM items".to_string(),
        ];

        // when
        let reports = validate_batch(&queries, &catalog(), &ValidatorConfig::default(), 2);

        // then
        assert_eq!(reports.len(), 4);
        assert!(reports[0].ok, "{:?}", reports[0]);
        for report in &reports[1..3] {
            assert_eq!(report.diagnostics.len(), 1, "{report:?}");
            assert_eq!(report.count(RuleId::MaxDepthExceeded), 1);
        }
        assert_eq!(reports[3].count(RuleId::UnresolvedReference), 1);
    }

    #[test]
    fn internal_error_report() {
        let report = internal_error("SELECT 1", &ValidatorConfig::default());
        assert!(!report.ok);
        assert_eq!(report.count(RuleId::InternalError), 1);
    }
}
