//! Stock availability checks performed against ledger snapshots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, ProductId};

/// Unreserved stock per product at the source branch, read from the ledger by
/// the workflow inside the same unit of work as the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability(HashMap<ProductId, i64>);

impl StockAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, product_id: ProductId, available: i64) -> Self {
        self.set(product_id, available);
        self
    }

    pub fn set(&mut self, product_id: ProductId, available: i64) {
        self.0.insert(product_id, available);
    }

    /// Unknown products have nothing available.
    pub fn get(&self, product_id: ProductId) -> i64 {
        self.0.get(&product_id).copied().unwrap_or(0)
    }

    /// Fail on the first product (in first-listed order) whose summed demand
    /// exceeds what is available.
    pub fn ensure_covers(&self, demand: &[(ProductId, i64)]) -> Result<(), DomainError> {
        for &(product_id, requested) in demand {
            let available = self.get(product_id);
            if available < requested {
                return Err(DomainError::insufficient(product_id, requested, available));
            }
        }
        Ok(())
    }
}

impl FromIterator<(ProductId, i64)> for StockAvailability {
    fn from_iter<T: IntoIterator<Item = (ProductId, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Sum quantities per product, keeping the order in which products first appear.
///
/// A per-product sum beyond `i64` is a validation failure.
pub fn demand_by_product(
    lines: impl IntoIterator<Item = (ProductId, i64)>,
) -> Result<Vec<(ProductId, i64)>, DomainError> {
    let mut order = Vec::new();
    let mut totals: HashMap<ProductId, i64> = HashMap::new();
    for (product_id, quantity) in lines {
        let total = totals.entry(product_id).or_insert_with(|| {
            order.push(product_id);
            0
        });
        *total = total.checked_add(quantity).ok_or_else(|| {
            DomainError::validation(format!("requested quantity of product {product_id} is out of range"))
        })?;
    }
    Ok(order
        .into_iter()
        .map(|p| (p, totals.get(&p).copied().unwrap_or(0)))
        .collect())
}
