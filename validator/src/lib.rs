use std::sync::Arc;

use catalog::{CatalogHandle, SchemaCatalog};
use log::debug;

use crate::{
    cte::CteResolver,
    diagnostics::report_with_config,
    functions::{FunctionRegistry, FunctionValidator},
    inference::TypeInference,
    lexer::tokenize,
    parser::Parser,
    partition::PartitionAnalyzer,
};

pub mod ast;
mod batch;
pub mod config;
pub mod cte;
pub mod diagnostics;
pub mod functions;
pub mod inference;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod partition;
pub mod tokens;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, ValidatorConfig};
pub use diagnostics::{Diagnostic, RuleId, Severity, ValidationReport};

/// Helper trait for converting `Vec<E> -> Vec<Diagnostic>`, where `E` is a finding of one pass.
trait VecDiagnosticExt {
    fn into_diagnostics(self) -> Vec<Diagnostic>;
}

impl<E> VecDiagnosticExt for Vec<E>
where
    E: Into<Diagnostic>,
{
    fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Runs all passes over `query_text` and builds its report.
///
/// A lexer error stops validation immediately. Parser errors are recovered per statement
/// and per CTE, so the remaining passes still run over everything that parsed.
pub fn validate(
    query_text: &str,
    catalog: &SchemaCatalog,
    config: &ValidatorConfig,
) -> ValidationReport {
    let tokens = match tokenize(query_text) {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!("lexer failed: {err}");
            return report_with_config(query_text, vec![err.into()], config);
        }
    };
    debug!("lexer produced {} tokens", tokens.len());

    let outcome = Parser::new(tokens)
        .with_max_depth(config.max_depth)
        .parse_program();
    let mut ast = outcome.ast;
    let mut diagnostics = outcome.errors.into_diagnostics();
    debug!(
        "parser produced {} statements and {} errors",
        ast.statements().len(),
        diagnostics.len()
    );

    diagnostics.extend(CteResolver::new(&ast).resolve_all().into_diagnostics());
    diagnostics.extend(
        TypeInference::infer(&mut ast, catalog, &config.parameter_types).into_diagnostics(),
    );
    diagnostics.extend(PartitionAnalyzer::new(&ast, catalog).analyze().into_diagnostics());
    diagnostics.extend(
        FunctionValidator::new(&ast, FunctionRegistry::builtin())
            .validate()
            .into_diagnostics(),
    );
    debug!("validation finished with {} raw diagnostics", diagnostics.len());

    report_with_config(query_text, diagnostics, config)
}

/// Entry point for validating queries against a reloadable catalog.
///
/// Each call to [`Validator::validate`] and each batch works on the catalog snapshot
/// current at its start, so [`CatalogHandle::reload`] never affects work in progress.
pub struct Validator {
    catalog: Arc<CatalogHandle>,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(catalog: Arc<CatalogHandle>, config: ValidatorConfig) -> Self {
        Validator { catalog, config }
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, query_text: &str) -> ValidationReport {
        let catalog = self.catalog.snapshot();
        validate(query_text, &catalog, &self.config)
    }

    /// Validates `queries` concurrently on `workers` threads. Reports are in input order.
    pub fn validate_batch<Q>(&self, queries: &[Q], workers: usize) -> Vec<ValidationReport>
    where
        Q: AsRef<str> + Sync,
    {
        let (catalog, version) = self.catalog.versioned_snapshot();
        debug!("batch uses catalog version {version}");
        batch::validate_batch(queries, &catalog, &self.config, workers)
    }
}
