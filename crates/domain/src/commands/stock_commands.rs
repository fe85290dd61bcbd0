use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::StockError;

/// A product and a quantity, as carried by cart and order lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StockItem {
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

impl StockItem {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Validates a batch of items and folds repeated products into one line,
/// keeping the order in which products first appear.
pub fn merge_items(items: &[StockItem]) -> Result<Vec<StockItem>, StockError> {
    if items.is_empty() {
        return Err(StockError::InvalidRequest(
            "at least one item is required".to_string(),
        ));
    }

    let mut merged: Vec<StockItem> = Vec::with_capacity(items.len());
    for item in items {
        item.validate().map_err(|e| {
            StockError::InvalidRequest(format!("item for product {}: {}", item.product_id, e))
        })?;

        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity =
                    existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                        StockError::InvalidRequest(format!(
                            "quantity overflow for product {}",
                            item.product_id
                        ))
                    })?;
            }
            None => merged.push(*item),
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_duplicates_in_first_seen_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let merged = merge_items(&[
            StockItem::new(a, 1),
            StockItem::new(b, 2),
            StockItem::new(a, 3),
        ])
        .unwrap();

        assert_eq!(merged, vec![StockItem::new(a, 4), StockItem::new(b, 2)]);
    }

    #[test]
    fn test_merge_rejects_zero_quantity() {
        let result = merge_items(&[StockItem::new(Uuid::new_v4(), 0)]);
        assert!(matches!(result, Err(StockError::InvalidRequest(_))));
    }

    #[test]
    fn test_merge_rejects_empty_batch() {
        assert!(merge_items(&[]).is_err());
    }
}
