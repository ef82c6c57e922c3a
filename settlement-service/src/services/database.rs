//! Database service for settlement-service.

use crate::models::{
    BillingModel, ChargeBuckets, ChargeType, ChargeTypeRestriction, Invoice, InvoiceStatus,
    LineItem, LineItemStatus, PackageTransform, PaymentStatus, Price, PriceTier, TierMode, Wallet,
    WalletStatus, WalletType,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::stores::{
    InvoiceStore, MeterUsageReader, PriceRepo, SettlementRepository, SettlementTransaction,
    WalletStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Serialization failures and deadlocks are retried by the caller.
fn db_error(action: &str, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return AppError::Conflict(anyhow::anyhow!("Failed to {}: {}", action, e));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", action, e))
}

/// Persisted enum columns must hold a known value; anything else is corrupt data.
fn parse_column<T>(column: &str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T, AppError> {
    parse(value).ok_or_else(|| {
        AppError::DatabaseError(anyhow::anyhow!("Unknown {} '{}'", column, value))
    })
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    customer_id: Uuid,
    subscription_id: Option<Uuid>,
    currency: String,
    amount_due: Decimal,
    amount_paid: Decimal,
    amount_remaining: Decimal,
    invoice_status: String,
    payment_status: String,
    remaining_by_type: Json<ChargeBuckets>,
    payment_attempts: i32,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    finalized_utc: Option<DateTime<Utc>>,
    paid_utc: Option<DateTime<Utc>>,
    voided_utc: Option<DateTime<Utc>>,
}

impl InvoiceRow {
    fn into_invoice(self, line_items: Vec<LineItem>) -> Result<Invoice, AppError> {
        Ok(Invoice {
            invoice_id: self.invoice_id,
            customer_id: self.customer_id,
            subscription_id: self.subscription_id,
            currency: self.currency,
            amount_due: self.amount_due,
            amount_paid: self.amount_paid,
            amount_remaining: self.amount_remaining,
            invoice_status: parse_column(
                "invoice status",
                &self.invoice_status,
                InvoiceStatus::from_string,
            )?,
            payment_status: parse_column(
                "payment status",
                &self.payment_status,
                PaymentStatus::from_string,
            )?,
            remaining_by_type: self.remaining_by_type.0,
            payment_attempts: self.payment_attempts,
            line_items,
            period_start: self.period_start,
            period_end: self.period_end,
            created_utc: self.created_utc,
            updated_utc: self.updated_utc,
            finalized_utc: self.finalized_utc,
            paid_utc: self.paid_utc,
            voided_utc: self.voided_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineItemRow {
    line_item_id: Uuid,
    invoice_id: Uuid,
    price_id: Uuid,
    charge_type: String,
    quantity: Decimal,
    amount: Decimal,
    status: String,
    description: Option<String>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = AppError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        Ok(LineItem {
            line_item_id: row.line_item_id,
            invoice_id: row.invoice_id,
            price_id: row.price_id,
            charge_type: parse_column("charge type", &row.charge_type, ChargeType::parse)?,
            quantity: row.quantity,
            amount: row.amount,
            status: parse_column("line item status", &row.status, LineItemStatus::from_string)?,
            description: row.description,
            created_utc: row.created_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct WalletRow {
    wallet_id: Uuid,
    customer_id: Uuid,
    currency: String,
    balance: Decimal,
    wallet_type: String,
    status: String,
    allowed_charge_types: Option<Vec<String>>,
    priority: i32,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = AppError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Ok(Wallet {
            wallet_id: row.wallet_id,
            customer_id: row.customer_id,
            currency: row.currency,
            balance: row.balance,
            wallet_type: parse_column("wallet type", &row.wallet_type, WalletType::from_string)?,
            status: parse_column("wallet status", &row.status, WalletStatus::from_string)?,
            allowed_charge_types: ChargeTypeRestriction::from_db(row.allowed_charge_types)
                .ok_or_else(|| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Unknown charge type in wallet {} restriction",
                        row.wallet_id
                    ))
                })?,
            priority: row.priority,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct PriceRow {
    price_id: Uuid,
    currency: String,
    price_type: String,
    billing_model: String,
    amount: Decimal,
    tier_mode: String,
    tiers: Json<Vec<PriceTier>>,
    transform: Option<Json<PackageTransform>>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PriceRow> for Price {
    type Error = AppError;

    fn try_from(row: PriceRow) -> Result<Self, Self::Error> {
        Ok(Price {
            price_id: row.price_id,
            currency: row.currency,
            price_type: parse_column("charge type", &row.price_type, ChargeType::parse)?,
            billing_model: parse_column("billing model", &row.billing_model, BillingModel::from_string)?,
            amount: row.amount,
            tier_mode: parse_column("tier mode", &row.tier_mode, TierMode::from_string)?,
            tiers: row.tiers.0,
            transform: row.transform.map(|t| t.0),
            created_utc: row.created_utc,
        })
    }
}

const INVOICE_COLUMNS: &str = "invoice_id, customer_id, subscription_id, currency, amount_due, \
     amount_paid, amount_remaining, invoice_status, payment_status, remaining_by_type, \
     payment_attempts, period_start, period_end, created_utc, updated_utc, finalized_utc, \
     paid_utc, voided_utc";

async fn load_line_items(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
    let rows = sqlx::query_as::<_, LineItemRow>(
        r#"
        SELECT line_item_id, invoice_id, price_id, charge_type, quantity, amount, status, description, created_utc
        FROM invoice_line_items
        WHERE invoice_id = $1
        ORDER BY created_utc, line_item_id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await
    .map_err(|e| db_error("get line items", e))?;

    rows.into_iter().map(LineItem::try_from).collect()
}

async fn load_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    lock: bool,
) -> Result<Option<Invoice>, AppError> {
    let query = format!(
        "SELECT {} FROM invoices WHERE invoice_id = $1{}",
        INVOICE_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );

    let row = sqlx::query_as::<_, InvoiceRow>(&query)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("get invoice", e))?;

    match row {
        Some(row) => {
            let line_items = load_line_items(conn, invoice_id).await?;
            row.into_invoice(line_items).map(Some)
        }
        None => Ok(None),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "settlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Create a pool that connects on first use.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(database_url)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Invalid database URL: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl SettlementRepository for Database {
    async fn begin(&self) -> Result<Box<dyn SettlementTransaction>, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(PgSettlementTransaction { tx }))
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e)))?;
        let invoice = load_invoice(&mut conn, invoice_id, false).await?;

        timer.observe_duration();
        Ok(invoice)
    }
}

#[async_trait]
impl PriceRepo for Database {
    #[instrument(skip(self), fields(price_id = %price_id))]
    async fn get_price(&self, price_id: Uuid) -> Result<Option<Price>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_price"])
            .start_timer();

        let row = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT price_id, currency, price_type, billing_model, amount, tier_mode, tiers, transform, created_utc
            FROM prices
            WHERE price_id = $1
            "#,
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get price", e))?;

        timer.observe_duration();

        row.map(Price::try_from).transpose()
    }
}

#[async_trait]
impl MeterUsageReader for Database {
    #[instrument(skip(self), fields(customer_id = %customer_id, price_id = %price_id))]
    async fn usage_quantity(
        &self,
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        price_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["usage_quantity"])
            .start_timer();

        let quantity = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM usage_aggregates
            WHERE customer_id = $1
              AND price_id = $2
              AND ($3::uuid IS NULL OR subscription_id = $3)
              AND period_start >= $4
              AND period_end <= $5
            "#,
        )
        .bind(customer_id)
        .bind(price_id)
        .bind(subscription_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("read usage", e))?;

        timer.observe_duration();
        Ok(quantity)
    }
}

/// A PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PgSettlementTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InvoiceStore for PgSettlementTransaction {
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice_for_update(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_for_update"])
            .start_timer();

        let invoice = load_invoice(&mut self.tx, invoice_id, true).await?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_due = $2,
                amount_paid = $3,
                amount_remaining = $4,
                invoice_status = $5,
                payment_status = $6,
                remaining_by_type = $7,
                payment_attempts = $8,
                updated_utc = $9,
                finalized_utc = $10,
                paid_utc = $11,
                voided_utc = $12
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.amount_due)
        .bind(invoice.amount_paid)
        .bind(invoice.amount_remaining)
        .bind(invoice.invoice_status.as_str())
        .bind(invoice.payment_status.as_str())
        .bind(Json(&invoice.remaining_by_type))
        .bind(invoice.payment_attempts)
        .bind(invoice.updated_utc)
        .bind(invoice.finalized_utc)
        .bind(invoice.paid_utc)
        .bind(invoice.voided_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update invoice", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice.invoice_id
            )));
        }

        for item in &invoice.line_items {
            sqlx::query("UPDATE invoice_line_items SET status = $2 WHERE line_item_id = $1")
                .bind(item.line_item_id)
                .bind(item.status.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("update line item", e))?;
        }

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, customer_id = %invoice.customer_id))]
    async fn create_with_line_items(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let query = format!(
            "INSERT INTO invoices ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            INVOICE_COLUMNS
        );
        sqlx::query(&query)
            .bind(invoice.invoice_id)
            .bind(invoice.customer_id)
            .bind(invoice.subscription_id)
            .bind(&invoice.currency)
            .bind(invoice.amount_due)
            .bind(invoice.amount_paid)
            .bind(invoice.amount_remaining)
            .bind(invoice.invoice_status.as_str())
            .bind(invoice.payment_status.as_str())
            .bind(Json(&invoice.remaining_by_type))
            .bind(invoice.payment_attempts)
            .bind(invoice.period_start)
            .bind(invoice.period_end)
            .bind(invoice.created_utc)
            .bind(invoice.updated_utc)
            .bind(invoice.finalized_utc)
            .bind(invoice.paid_utc)
            .bind(invoice.voided_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Invoice {} already exists",
                        invoice.invoice_id
                    ))
                }
                _ => db_error("create invoice", e),
            })?;

        for item in &invoice.line_items {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (line_item_id, invoice_id, price_id, charge_type, quantity, amount, status, description, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.line_item_id)
            .bind(invoice.invoice_id)
            .bind(item.price_id)
            .bind(item.charge_type.as_str())
            .bind(item.quantity)
            .bind(item.amount)
            .bind(item.status.as_str())
            .bind(&item.description)
            .bind(item.created_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("create line item", e))?;
        }

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            line_items = invoice.line_items.len(),
            "Invoice created"
        );

        Ok(())
    }
}

#[async_trait]
impl WalletStore for PgSettlementTransaction {
    #[instrument(skip(self), fields(customer_id = %customer_id, currency = %currency))]
    async fn get_wallets_for_update(
        &mut self,
        customer_id: Uuid,
        currency: &str,
    ) -> Result<Vec<Wallet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_wallets_for_update"])
            .start_timer();

        // Locks in wallet_id order so concurrent settlements cannot deadlock.
        let rows = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT wallet_id, customer_id, currency, balance, wallet_type, status, allowed_charge_types, priority, created_utc, updated_utc
            FROM wallets
            WHERE customer_id = $1 AND UPPER(currency) = UPPER($2)
            ORDER BY wallet_id
            FOR UPDATE
            "#,
        )
        .bind(customer_id)
        .bind(currency)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("get wallets", e))?;

        timer.observe_duration();

        rows.into_iter().map(Wallet::try_from).collect()
    }

    #[instrument(skip(self), fields(wallet_id = %wallet_id, amount = %amount))]
    async fn debit_wallet(
        &mut self,
        wallet_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["debit_wallet"])
            .start_timer();

        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE wallets
            SET balance = balance - $2, updated_utc = $3
            WHERE wallet_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(wallet_id)
        .bind(amount)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("debit wallet", e))?;

        timer.observe_duration();
        Ok(balance)
    }
}

#[async_trait]
impl SettlementTransaction for PgSettlementTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| db_error("commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(|e| db_error("roll back transaction", e))
    }
}
