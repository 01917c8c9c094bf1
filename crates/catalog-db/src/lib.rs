//! Catalog persistence layer for card & item records.
//!
//! This crate offers an async API around SQLite (sqlx) for the catalog
//! backend. Each record family comes in two language variants that share a
//! schema and differ only in their backing table, so every accessor takes a
//! table selector instead of duplicating queries per variant. The `img`
//! column holds the storage key of the bound asset; resolving that key to a
//! retrieval URL is the asset store's job, not ours.

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};

/// Default SQLite busy timeout in milliseconds when the DB is under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Primary entry point to the persistence layer.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes (or creates) a connection pool to the SQLite database located at
    /// the given URL (e.g. `sqlite:///var/lib/catalog/catalog.db`).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

        // An in-memory database exists per connection; more than one pooled
        // handle would each see their own empty schema.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        // Run embedded migrations. The directory is resolved relative to this crate.
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects to a file path via `sqlite://` scheme.
    pub async fn connect_file(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}", path.display());
        Self::connect(&url).await
    }

    /// Exposes the underlying pool for composed queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a card row and returns the persisted record.
    pub async fn insert_card(&self, table: CardTable, data: NewCard<'_>) -> Result<CardRecord> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (title, img, state, date, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            table.name()
        );
        let result = sqlx::query(&sql)
            .bind(data.title)
            .bind(Option::<&str>::None)
            .bind(data.state.as_str())
            .bind(data.date.to_string())
            .bind(data.description)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        self.fetch_card(table, id)
            .await?
            .ok_or_else(|| anyhow!("card inserted but missing when reloaded (table={})", table.name()))
    }

    /// Retrieves a card by its identifier.
    pub async fn fetch_card(&self, table: CardTable, id: i64) -> Result<Option<CardRecord>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", table.name());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_card).transpose()
    }

    /// Lists all cards in insertion order.
    pub async fn list_cards(&self, table: CardTable) -> Result<Vec<CardRecord>> {
        let sql = format!("SELECT * FROM {} ORDER BY id ASC", table.name());
        let mut rows = sqlx::query(&sql).fetch(&self.pool);

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_card(row)?);
        }
        Ok(out)
    }

    /// Writes back every mutable column of a card and bumps `updated_at`.
    pub async fn update_card(&self, table: CardTable, record: &CardRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE {} SET title = ?, img = ?, state = ?, date = ?, description = ?, updated_at = ? \
             WHERE id = ?",
            table.name()
        );
        sqlx::query(&sql)
            .bind(&record.title)
            .bind(record.img.as_deref())
            .bind(record.state.as_str())
            .bind(record.date.to_string())
            .bind(record.description.as_deref())
            .bind(&now)
            .bind(record.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a card row. Returns whether a row was actually deleted.
    pub async fn delete_card(&self, table: CardTable, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.name());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts an item row and returns the persisted record.
    pub async fn insert_item(&self, table: ItemTable, data: NewItem<'_>) -> Result<ItemRecord> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (title, img, price, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            table.name()
        );
        let result = sqlx::query(&sql)
            .bind(data.title)
            .bind(Option::<&str>::None)
            .bind(data.price)
            .bind(data.status.as_str())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        self.fetch_item(table, id)
            .await?
            .ok_or_else(|| anyhow!("item inserted but missing when reloaded (table={})", table.name()))
    }

    /// Retrieves an item by its identifier.
    pub async fn fetch_item(&self, table: ItemTable, id: i64) -> Result<Option<ItemRecord>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", table.name());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_item).transpose()
    }

    /// Lists all items in insertion order.
    pub async fn list_items(&self, table: ItemTable) -> Result<Vec<ItemRecord>> {
        let sql = format!("SELECT * FROM {} ORDER BY id ASC", table.name());
        let mut rows = sqlx::query(&sql).fetch(&self.pool);

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_item(row)?);
        }
        Ok(out)
    }

    /// Writes back every mutable column of an item and bumps `updated_at`.
    pub async fn update_item(&self, table: ItemTable, record: &ItemRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE {} SET title = ?, img = ?, price = ?, status = ?, updated_at = ? WHERE id = ?",
            table.name()
        );
        sqlx::query(&sql)
            .bind(&record.title)
            .bind(record.img.as_deref())
            .bind(record.price)
            .bind(record.status.as_str())
            .bind(&now)
            .bind(record.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes an item row. Returns whether a row was actually deleted.
    pub async fn delete_item(&self, table: ItemTable, id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.name());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_datetime(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid RFC3339 timestamp '{}': {}", value, err))
}

fn parse_date(value: String) -> Result<NaiveDate> {
    value
        .parse::<NaiveDate>()
        .map_err(|err| anyhow!("invalid ISO date '{}': {}", value, err))
}

fn map_card(row: SqliteRow) -> Result<CardRecord> {
    let state: String = row.try_get("state")?;

    Ok(CardRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        img: row.try_get("img")?,
        state: CardState::from_str(&state)?,
        date: parse_date(row.try_get("date")?)?,
        description: row.try_get("description")?,
        created_at: parse_datetime(row.try_get("created_at")?)?,
        updated_at: parse_datetime(row.try_get("updated_at")?)?,
    })
}

fn map_item(row: SqliteRow) -> Result<ItemRecord> {
    let status: String = row.try_get("status")?;

    Ok(ItemRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        img: row.try_get("img")?,
        price: row.try_get("price")?,
        status: ItemStatus::from_str(&status)?,
        created_at: parse_datetime(row.try_get("created_at")?)?,
        updated_at: parse_datetime(row.try_get("updated_at")?)?,
    })
}

/// Table selector for the card family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTable {
    Cards,
    SpanishCards,
}

impl CardTable {
    pub fn name(&self) -> &'static str {
        match self {
            CardTable::Cards => "cards",
            CardTable::SpanishCards => "spanish_cards",
        }
    }

    /// Prefix woven into asset storage keys for this table.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            CardTable::Cards => "card",
            CardTable::SpanishCards => "spanish-card",
        }
    }
}

/// Table selector for the item family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemTable {
    Items,
    SpanishItems,
}

impl ItemTable {
    pub fn name(&self) -> &'static str {
        match self {
            ItemTable::Items => "items",
            ItemTable::SpanishItems => "spanish_items",
        }
    }

    pub fn key_prefix(&self) -> &'static str {
        match self {
            ItemTable::Items => "item",
            ItemTable::SpanishItems => "spanish-item",
        }
    }
}

/// Publication state of a card. Persisted and serialized under its exact
/// display label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CardState {
    #[serde(rename = "Coming Soon")]
    ComingSoon,
    #[serde(rename = "Available")]
    Available,
}

impl CardState {
    pub const LABELS: &'static [&'static str] = &["Coming Soon", "Available"];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardState::ComingSoon => "Coming Soon",
            CardState::Available => "Available",
        }
    }
}

impl FromStr for CardState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Coming Soon" => Ok(CardState::ComingSoon),
            "Available" => Ok(CardState::Available),
            other => Err(anyhow!("unknown card state: {}", other)),
        }
    }
}

/// Stock status of an item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemStatus {
    #[serde(rename = "Available")]
    Available,
    #[serde(rename = "Out of stock")]
    OutOfStock,
    #[serde(rename = "Sold out")]
    SoldOut,
    #[serde(rename = "Coming Soon")]
    ComingSoon,
}

impl ItemStatus {
    pub const LABELS: &'static [&'static str] =
        &["Available", "Out of stock", "Sold out", "Coming Soon"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "Available",
            ItemStatus::OutOfStock => "Out of stock",
            ItemStatus::SoldOut => "Sold out",
            ItemStatus::ComingSoon => "Coming Soon",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Available" => Ok(ItemStatus::Available),
            "Out of stock" => Ok(ItemStatus::OutOfStock),
            "Sold out" => Ok(ItemStatus::SoldOut),
            "Coming Soon" => Ok(ItemStatus::ComingSoon),
            other => Err(anyhow!("unknown item status: {}", other)),
        }
    }
}

/// Input payload for card creation. The asset key is bound separately once
/// the row id is known.
#[derive(Debug, Clone)]
pub struct NewCard<'a> {
    pub title: &'a str,
    pub state: CardState,
    pub date: NaiveDate,
    pub description: Option<&'a str>,
}

/// Input payload for item creation.
#[derive(Debug, Clone)]
pub struct NewItem<'a> {
    pub title: &'a str,
    pub price: f64,
    pub status: ItemStatus,
}

/// Persisted card row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardRecord {
    pub id: i64,
    pub title: String,
    pub img: Option<String>,
    pub state: CardState,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted item row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    pub title: String,
    pub img: Option<String>,
    pub price: f64,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
