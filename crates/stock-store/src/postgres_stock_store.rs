use super::{ChangeSet, ReservationCounts, StockSection, StockStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    CartOwner, Inventory, ProductRecord, ProductStock, ReservationStatus, StockError,
    StockReservation,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    stock: i32,
    is_active: bool,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            stock: row.stock,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InventoryRow {
    id: Uuid,
    product_id: Uuid,
    quantity_on_hand: i32,
    quantity_reserved: i32,
    quantity_available: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InventoryRow> for Inventory {
    fn from(row: InventoryRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            quantity_on_hand: row.quantity_on_hand,
            quantity_reserved: row.quantity_reserved,
            quantity_available: row.quantity_available,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
    reservation_type: String,
    status: String,
    order_id: Option<Uuid>,
    user_id: Option<Uuid>,
    session_id: Option<String>,
    expires_at: DateTime<Utc>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for StockReservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let corrupt = |e: StockError| StoreError::CorruptRow(format!("reservation {}: {}", row.id, e));
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            quantity: row.quantity,
            reservation_type: row.reservation_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            order_id: row.order_id,
            user_id: row.user_id,
            session_id: row.session_id,
            expires_at: row.expires_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RESERVATION_COLUMNS: &str = "id, product_id, quantity, reservation_type, status, order_id, \
     user_id, session_id, expires_at, notes, created_at, updated_at";

fn into_reservations(rows: Vec<ReservationRow>) -> Result<Vec<StockReservation>, StoreError> {
    rows.into_iter().map(StockReservation::try_from).collect()
}

/// PostgreSQL implementation of the stock store.
///
/// Exclusive sections lock `products` rows with `SELECT ... FOR UPDATE`, so
/// concurrent sections over the same product serialize in the database.
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool (useful for testing)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_changes(
        tx: &mut Transaction<'_, Postgres>,
        changes: &ChangeSet,
    ) -> Result<(), StoreError> {
        for inventory in &changes.inventory_inserts {
            sqlx::query(
                r#"
                INSERT INTO inventory (
                    id, product_id, quantity_on_hand, quantity_reserved,
                    quantity_available, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(inventory.id)
            .bind(inventory.product_id)
            .bind(inventory.quantity_on_hand)
            .bind(inventory.quantity_reserved)
            .bind(inventory.quantity_available)
            .bind(inventory.created_at)
            .bind(inventory.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        for inventory in &changes.inventory_updates {
            sqlx::query(
                r#"
                UPDATE inventory
                SET quantity_on_hand = $2, quantity_reserved = $3,
                    quantity_available = $4, updated_at = $5
                WHERE product_id = $1
                "#,
            )
            .bind(inventory.product_id)
            .bind(inventory.quantity_on_hand)
            .bind(inventory.quantity_reserved)
            .bind(inventory.quantity_available)
            .bind(inventory.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        for reservation in &changes.reservation_inserts {
            sqlx::query(
                r#"
                INSERT INTO stock_reservations (
                    id, product_id, quantity, reservation_type, status, order_id,
                    user_id, session_id, expires_at, notes, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(reservation.id)
            .bind(reservation.product_id)
            .bind(reservation.quantity)
            .bind(reservation.reservation_type.as_str())
            .bind(reservation.status.as_str())
            .bind(reservation.order_id)
            .bind(reservation.user_id)
            .bind(&reservation.session_id)
            .bind(reservation.expires_at)
            .bind(&reservation.notes)
            .bind(reservation.created_at)
            .bind(reservation.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        for reservation in &changes.reservation_updates {
            sqlx::query(
                r#"
                UPDATE stock_reservations
                SET status = $2, expires_at = $3, notes = $4, updated_at = $5
                WHERE id = $1
                "#,
            )
            .bind(reservation.id)
            .bind(reservation.status.as_str())
            .bind(reservation.expires_at)
            .bind(&reservation.notes)
            .bind(reservation.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn exclusive<T, F>(&self, product_ids: &[Uuid], f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StockSection) -> Result<T, StockError> + Send,
        T: Send,
    {
        let mut ids = product_ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Err(StockError::InvalidRequest("no products to lock".to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        // Lock order is ascending product id for every section
        let products: Vec<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, name, stock, is_active
            FROM products
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        if let Some(missing) = ids.iter().find(|id| !products.iter().any(|p| p.id == **id)) {
            let missing = *missing;
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after missing product failed");
            }
            return Err(StockError::unavailable(missing, "product not found").into());
        }

        let inventory: Vec<InventoryRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, quantity_on_hand, quantity_reserved,
                   quantity_available, created_at, updated_at
            FROM inventory
            WHERE product_id = ANY($1)
            ORDER BY product_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let reservation_rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stock_reservations \
             WHERE product_id = ANY($1) AND status = 'active' \
             ORDER BY created_at",
            RESERVATION_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        let reservations = into_reservations(reservation_rows)?;

        let persisted: HashSet<Uuid> = inventory.iter().map(|row| row.product_id).collect();
        let mut inventory_by_product: BTreeMap<Uuid, Inventory> = inventory
            .into_iter()
            .map(|row| (row.product_id, Inventory::from(row)))
            .collect();

        let stocks: Vec<ProductStock> = products
            .into_iter()
            .map(|row| {
                let product = ProductRecord::from(row);
                let inventory = inventory_by_product.remove(&product.id);
                let holds = reservations
                    .iter()
                    .filter(|r| r.product_id == product.id)
                    .cloned()
                    .collect();
                ProductStock::new(product, inventory, holds)
            })
            .collect();

        let originals: BTreeMap<Uuid, ProductStock> =
            stocks.iter().map(|s| (s.product_id(), s.clone())).collect();

        let now = Utc::now();
        let mut section = StockSection::new(now, stocks);

        let value = match f(&mut section) {
            Ok(value) => value,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback of rejected section failed");
                }
                return Err(e.into());
            }
        };

        let changes = ChangeSet::diff(&originals, &persisted, section.into_stocks(), now);
        changes.report_violations();

        Self::apply_changes(&mut tx, &changes).await?;
        tx.commit().await?;

        debug!(
            products = ids.len(),
            reservation_inserts = changes.reservation_inserts.len(),
            reservation_updates = changes.reservation_updates.len(),
            "Exclusive stock section committed"
        );

        Ok(value)
    }

    async fn load_stock(&self, product_id: Uuid) -> Result<ProductStock, StoreError> {
        let product: ProductRow = sqlx::query_as(
            "SELECT id, name, stock, is_active FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StockError::unavailable(product_id, "product not found"))?;

        let inventory: Option<InventoryRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, quantity_on_hand, quantity_reserved,
                   quantity_available, created_at, updated_at
            FROM inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stock_reservations \
             WHERE product_id = $1 AND status = 'active' \
             ORDER BY created_at",
            RESERVATION_COLUMNS
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProductStock::new(
            product.into(),
            inventory.map(Inventory::from),
            into_reservations(rows)?,
        ))
    }

    async fn write_product_stock(&self, product_id: Uuid, stock: i32) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id)
            .bind(stock)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StockError::unavailable(product_id, "product not found").into());
        }

        debug!(product_id = %product_id, stock, "Product stock cache written");
        Ok(())
    }

    async fn find_reservations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stock_reservations \
             WHERE order_id = $1 AND reservation_type = 'order' \
             ORDER BY created_at",
            RESERVATION_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        into_reservations(rows)
    }

    async fn find_active_cart_reservations(
        &self,
        owner: &CartOwner,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let query = match (&owner.user_id, &owner.session_id) {
            (Some(user_id), _) => sqlx::query_as::<_, ReservationRow>(&format!(
                "SELECT {} FROM stock_reservations \
                 WHERE user_id = $1 AND reservation_type = 'cart' AND status = 'active' \
                 ORDER BY created_at",
                RESERVATION_COLUMNS
            ))
            .bind(*user_id)
            .fetch_all(&self.pool)
            .await?,
            (None, Some(session_id)) => sqlx::query_as::<_, ReservationRow>(&format!(
                "SELECT {} FROM stock_reservations \
                 WHERE session_id = $1 AND reservation_type = 'cart' AND status = 'active' \
                 ORDER BY created_at",
                RESERVATION_COLUMNS
            ))
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?,
            (None, None) => Vec::new(),
        };

        into_reservations(query)
    }

    async fn find_products_with_due_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT product_id
            FROM stock_reservations
            WHERE status = 'active' AND expires_at <= $1
            ORDER BY product_id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn reservation_counts(&self, product_id: Uuid) -> Result<ReservationCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM stock_reservations
            WHERE product_id = $1
            GROUP BY status
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = ReservationCounts::default();
        for (status, count) in rows {
            let status: ReservationStatus = status
                .parse()
                .map_err(|e: StockError| StoreError::CorruptRow(e.to_string()))?;
            counts.add(status, count);
        }
        Ok(counts)
    }

    async fn list_product_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM products ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_row_with_unknown_status_is_corrupt() {
        let now = Utc::now();
        let row = ReservationRow {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 1,
            reservation_type: "order".to_string(),
            status: "pending".to_string(),
            order_id: Some(Uuid::new_v4()),
            user_id: None,
            session_id: None,
            expires_at: now,
            notes: None,
            created_at: now,
            updated_at: now,
        };

        assert!(matches!(
            StockReservation::try_from(row),
            Err(StoreError::CorruptRow(_))
        ));
    }

    // Note: database-backed tests live in tests/postgres_store_tests.rs
    // Run with: cargo test -p stock-store -- --ignored
}
