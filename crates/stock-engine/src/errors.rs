use domain::{StockError, StockShortage};
use serde::Serialize;
use std::fmt;
use stock_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// One item of a batch that failed, keyed by product or reservation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub key: Uuid,
    pub error: String,
}

/// Outcome of a batch that keeps going past per-item failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, key: Uuid, error: &impl fmt::Display) {
        self.failures.push(ItemFailure {
            key,
            error: error.to_string(),
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `PartialFailure` when any item failed
    pub fn into_result(self) -> Result<BatchReport> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(StockServiceError::PartialFailure(self))
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} items failed", self.failures.len(), self.total())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.key, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("Persistence error: {0}")]
    Persistence(StoreError),

    #[error("Partial failure: {0}")]
    PartialFailure(BatchReport),
}

impl From<StoreError> for StockServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Rejected(e) => StockServiceError::Stock(e),
            other => StockServiceError::Persistence(other),
        }
    }
}

impl StockServiceError {
    pub fn as_stock_error(&self) -> Option<&StockError> {
        match self {
            StockServiceError::Stock(e) => Some(e),
            _ => None,
        }
    }

    /// Per-item shortages when the request failed for insufficient stock
    pub fn shortages(&self) -> &[StockShortage] {
        match self {
            StockServiceError::Stock(e) => e.shortages(),
            _ => &[],
        }
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, StockServiceError::Stock(StockError::InsufficientStock(_)))
    }
}

pub type Result<T> = std::result::Result<T, StockServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_store_error_becomes_stock_error() {
        let product_id = Uuid::new_v4();
        let err: StockServiceError = StoreError::Rejected(StockError::insufficient(product_id, 3, 1)).into();

        assert!(err.is_insufficient_stock());
        assert_eq!(err.shortages()[0].product_id, product_id);
    }

    #[test]
    fn test_other_store_errors_are_persistence() {
        let err: StockServiceError = StoreError::CorruptRow("bad status".to_string()).into();
        assert!(matches!(err, StockServiceError::Persistence(_)));
        assert!(err.shortages().is_empty());
    }

    #[test]
    fn test_batch_report_into_result() {
        let mut report = BatchReport::new();
        report.record_success();
        assert_eq!(report.clone().into_result().unwrap().succeeded, 1);

        let key = Uuid::new_v4();
        report.record_failure(key, &"ledger row locked");
        let err = report.into_result().unwrap_err();
        match err {
            StockServiceError::PartialFailure(report) => {
                assert_eq!(report.total(), 2);
                assert_eq!(report.failures[0].key, key);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
    }
}
