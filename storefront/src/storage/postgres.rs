//! `PostgreSQL` backend.
//!
//! Stock changes are single conditional `UPDATE`s. The order commit and
//! cancellation run in one transaction each; dropping the transaction on an
//! early return rolls everything back.

use super::{HealthProbe, StorageError};
use crate::cart::CartRepository;
use crate::checkout::CheckoutRepository;
use crate::inventory::{InventoryError, InventoryLedger};
use crate::orders::{CommitOutcome, OrderCommit, OrderError, OrderRepository, StockPolicy};
use crate::types::{
    Cart, CartId, CartItem, CheckoutId, CheckoutSnapshot, Money, Order, OrderNumber, OrderStatus,
    Product, ProductId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

const PRODUCT_COLUMNS: &str =
    "id, name, description, images, price_cents, stock, category, is_active";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    images: Json<Vec<String>>,
    price_cents: i64,
    stock: i64,
    category: String,
    is_active: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = StorageError;

    fn try_from(row: ProductRow) -> Result<Self, StorageError> {
        Ok(Self {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            images: row.images.0,
            price: Money::from_cents(row.price_cents),
            stock: to_u32(row.stock)?,
            category: row.category,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    user_id: String,
    items: Json<Vec<CartItem>>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = StorageError;

    fn try_from(row: CartRow) -> Result<Self, StorageError> {
        let version = u64::try_from(row.version)
            .map_err(|_| StorageError::Corrupt(format!("cart version {}", row.version)))?;
        Ok(Self::from_parts(
            CartId::from_uuid(row.id),
            UserId::new(row.user_id),
            row.items.0,
            version,
            row.updated_at,
        ))
    }
}

/// Conditional decrement; `None` when the product is missing or short
async fn take_stock<'e>(
    executor: impl PgExecutor<'e>,
    id: ProductId,
    quantity: u32,
) -> Result<Option<i64>, StorageError> {
    Ok(sqlx::query_scalar(
        "UPDATE products SET stock = stock - $1 WHERE id = $2 AND stock >= $1 RETURNING stock",
    )
    .bind(i64::from(quantity))
    .bind(id.as_uuid())
    .fetch_optional(executor)
    .await?)
}

async fn return_stock<'e>(
    executor: impl PgExecutor<'e>,
    id: ProductId,
    quantity: u32,
) -> Result<Option<i64>, StorageError> {
    Ok(
        sqlx::query_scalar("UPDATE products SET stock = stock + $1 WHERE id = $2 RETURNING stock")
            .bind(i64::from(quantity))
            .bind(id.as_uuid())
            .fetch_optional(executor)
            .await?,
    )
}

fn to_u32(stock: i64) -> Result<u32, StorageError> {
    u32::try_from(stock).map_err(|_| StorageError::Corrupt(format!("stock {stock}")))
}

fn to_i64(version: u64) -> Result<i64, StorageError> {
    i64::try_from(version).map_err(|_| StorageError::Corrupt(format!("version {version}")))
}

/// Every repository over one `PostgreSQL` database.
#[derive(Clone, Debug)]
pub struct PostgresShop {
    pool: PgPool,
}

impl PostgresShop {
    /// Connects a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] when the database is unreachable.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Migration failed: {e}")))
    }

    /// Inserts or replaces a catalog product (seeding and tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub async fn upsert_product(&self, product: &Product) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO products
                (id, name, description, images, price_cents, stock, category, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                images = EXCLUDED.images,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                category = EXCLUDED.category,
                is_active = EXCLUDED.is_active
            ",
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(Json(&product.images))
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .bind(&product.category)
        .bind(product.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_order_for_update(
        tx: &mut Transaction<'static, Postgres>,
        number: &OrderNumber,
    ) -> Result<Option<Order>, StorageError> {
        let document: Option<Json<Order>> =
            sqlx::query_scalar("SELECT document FROM orders WHERE order_number = $1 FOR UPDATE")
                .bind(number.as_str())
                .fetch_optional(&mut **tx)
                .await?;
        Ok(document.map(|d| d.0))
    }

    async fn release_cart(
        tx: &mut Transaction<'static, Postgres>,
        cart_id: CartId,
        purchased: &[(ProductId, u32)],
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let row: Option<CartRow> = sqlx::query_as(
            "SELECT id, user_id, items, version, updated_at FROM carts WHERE id = $1 FOR UPDATE",
        )
        .bind(cart_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            tracing::warn!(%cart_id, "Cart to release not found");
            return Ok(());
        };
        let mut cart = Cart::try_from(row)?;
        cart.release(purchased);

        sqlx::query(
            "UPDATE carts SET items = $1, version = version + 1, updated_at = $2 WHERE id = $3",
        )
        .bind(Json(cart.items()))
        .bind(now)
        .bind(cart_id.as_uuid())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for PostgresShop {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryLedger for PostgresShop {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        let row: Option<ProductRow> =
            sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Product::try_from).transpose()
    }

    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StorageError> {
        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let rows: Vec<ProductRow> =
            sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"))
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError> {
        if let Some(remaining) = take_stock(&self.pool, id, quantity).await? {
            return Ok(to_u32(remaining)?);
        }

        let available: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        match available {
            None => Err(InventoryError::ProductNotFound(id)),
            Some(available) => Err(InventoryError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: to_u32(available)?,
            }),
        }
    }

    async fn restock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError> {
        let stock = return_stock(&self.pool, id, quantity)
            .await?
            .ok_or(InventoryError::ProductNotFound(id))?;
        Ok(to_u32(stock)?)
    }
}

#[async_trait]
impl CartRepository for PostgresShop {
    async fn find_by_user(&self, user: &UserId) -> Result<Option<Cart>, StorageError> {
        let row: Option<CartRow> = sqlx::query_as(
            "SELECT id, user_id, items, version, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Cart::try_from).transpose()
    }

    async fn find(&self, id: CartId) -> Result<Option<Cart>, StorageError> {
        let row: Option<CartRow> = sqlx::query_as(
            "SELECT id, user_id, items, version, updated_at FROM carts WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Cart::try_from).transpose()
    }

    async fn save(&self, cart: &Cart) -> Result<Cart, StorageError> {
        let result = if cart.version == 0 {
            sqlx::query(
                r"
                INSERT INTO carts (id, user_id, items, version, updated_at)
                VALUES ($1, $2, $3, 1, $4)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(cart.id.as_uuid())
            .bind(cart.user_id.as_str())
            .bind(Json(cart.items()))
            .bind(cart.updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r"
                UPDATE carts SET items = $1, version = version + 1, updated_at = $2
                WHERE id = $3 AND version = $4
                ",
            )
            .bind(Json(cart.items()))
            .bind(cart.updated_at)
            .bind(cart.id.as_uuid())
            .bind(to_i64(cart.version)?)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::VersionConflict {
                expected: cart.version,
            });
        }

        let mut stored = cart.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn clear(&self, user: &UserId) -> Result<Option<Cart>, StorageError> {
        let row: Option<CartRow> = sqlx::query_as(
            r"
            UPDATE carts SET items = '[]'::jsonb, version = version + 1
            WHERE user_id = $1
            RETURNING id, user_id, items, version, updated_at
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Cart::try_from).transpose()
    }
}

#[async_trait]
impl CheckoutRepository for PostgresShop {
    async fn save_snapshot(&self, snapshot: &CheckoutSnapshot) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO checkout_snapshots (id, document, created_at) VALUES ($1, $2, $3)")
            .bind(snapshot.id.as_uuid())
            .bind(Json(snapshot))
            .bind(snapshot.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn snapshot(&self, id: CheckoutId) -> Result<Option<CheckoutSnapshot>, StorageError> {
        let document: Option<Json<CheckoutSnapshot>> =
            sqlx::query_scalar("SELECT document FROM checkout_snapshots WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|d| d.0))
    }

    async fn attach_session(&self, id: CheckoutId, session_id: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE checkout_snapshots
            SET document = jsonb_set(document, '{sessionId}', to_jsonb($2::text))
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Corrupt(format!("checkout {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresShop {
    #[tracing::instrument(skip(self, commit), fields(order_number = %commit.order.order_number))]
    async fn commit(&self, commit: OrderCommit) -> Result<CommitOutcome, OrderError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let mut order = commit.order;

        if let Some(receipt) = &commit.receipt {
            let claimed = sqlx::query(
                r"
                INSERT INTO fulfillment_receipts (session_id, event_id, order_number)
                VALUES ($1, $2, $3)
                ON CONFLICT (session_id) DO NOTHING
                ",
            )
            .bind(&receipt.session_id)
            .bind(&receipt.event_id)
            .bind(order.order_number.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;

            if claimed.rows_affected() == 0 {
                let existing: String = sqlx::query_scalar(
                    "SELECT order_number FROM fulfillment_receipts WHERE session_id = $1",
                )
                .bind(&receipt.session_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StorageError::from)?;
                return Ok(CommitOutcome::Duplicate {
                    order_number: OrderNumber::new(existing),
                });
            }
        }

        for line in &order.lines {
            if take_stock(&mut *tx, line.product_id, line.quantity).await?.is_none() {
                if commit.stock_policy == StockPolicy::Reject {
                    return Err(OrderError::InsufficientStock {
                        product_id: line.product_id,
                        name: line.name.clone(),
                    });
                }
                order.shortfalls.push(line.product_id);
            }
        }
        if !order.shortfalls.is_empty() {
            order.status = OrderStatus::NeedsReview;
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO orders (id, order_number, user_id, status, document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(order.user_id.as_str())
        .bind(order.status.as_str())
        .bind(Json(&order))
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(OrderError::DuplicateOrderId(order.order_number));
            },
            other => {
                other.map_err(StorageError::from)?;
            },
        }

        if let Some(release) = &commit.cart_release {
            Self::release_cart(&mut tx, release.cart_id, &release.purchased, order.created_at)
                .await?;
        }

        if let Some(checkout_id) = commit.checkout_id {
            sqlx::query(
                r"
                UPDATE checkout_snapshots
                SET document = jsonb_set(document, '{consumed}', 'true'::jsonb)
                WHERE id = $1
                ",
            )
            .bind(checkout_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(CommitOutcome::Committed(order))
    }

    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>, StorageError> {
        let document: Option<Json<Order>> =
            sqlx::query_scalar("SELECT document FROM orders WHERE order_number = $1")
                .bind(number.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|d| d.0))
    }

    async fn list_for_user(&self, user: &UserId) -> Result<Vec<Order>, StorageError> {
        let documents: Vec<Json<Order>> = sqlx::query_scalar(
            r"
            SELECT document FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, order_number DESC
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(documents.into_iter().map(|d| d.0).collect())
    }

    async fn find_by_payment(&self, session_id: &str) -> Result<Option<OrderNumber>, StorageError> {
        let number: Option<String> = sqlx::query_scalar(
            "SELECT order_number FROM fulfillment_receipts WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(number.map(OrderNumber::new))
    }

    async fn cancel(
        &self,
        number: &OrderNumber,
        requester: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let mut order = Self::load_order_for_update(&mut tx, number)
            .await?
            .ok_or(OrderError::NotFound)?;

        if order.user_id != *requester {
            return Err(OrderError::Forbidden);
        }
        if !order.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition { from: order.status });
        }

        for line in order.decremented_lines() {
            if return_stock(&mut *tx, line.product_id, line.quantity).await?.is_none() {
                tracing::warn!(product_id = %line.product_id, "Cancelled line for deleted product");
            }
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        sqlx::query("UPDATE orders SET status = $1, document = $2 WHERE order_number = $3")
            .bind(order.status.as_str())
            .bind(Json(&order))
            .bind(number.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        Ok(order)
    }
}
