//! Menu item repository: operations for the `menu_items` table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::models::{ItemGenerationStatus, MenuItem};
use crate::services::{ItemRepository, ServiceError};

use super::{format_timestamp, Database, DatabaseError};

fn item_from_row(row: &Row<'_>) -> Result<(MenuItem, String), rusqlite::Error> {
    let item = MenuItem {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        price: row.get("price")?,
        category: row.get("category")?,
        is_edited: row.get("is_edited")?,
        generation_status: ItemGenerationStatus::Pending,
        image_url: row.get("image_url")?,
    };
    Ok((item, row.get("generation_status")?))
}

fn with_status((mut item, status): (MenuItem, String)) -> Result<MenuItem, DatabaseError> {
    item.generation_status =
        ItemGenerationStatus::parse(&status).ok_or(DatabaseError::InvalidValue {
            column: "menu_items.generation_status",
            value: status,
        })?;
    Ok(item)
}

/// Replaces the items stored for a session, keeping the given order.
pub fn replace_for_session(
    db: &Database,
    session_id: &str,
    items: &[MenuItem],
) -> Result<Vec<MenuItem>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM menu_items WHERE session_id = ?1",
            params![session_id],
        )?;

        let now = format_timestamp(Utc::now());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO menu_items (session_id, id, position, name, description, price,
                 category, is_edited, generation_status, image_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            )?;
            for (position, item) in items.iter().enumerate() {
                stmt.execute(params![
                    session_id,
                    item.id,
                    position as i64,
                    item.name,
                    item.description,
                    item.price,
                    item.category,
                    item.is_edited,
                    item.generation_status.as_str(),
                    item.image_url,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })?;

    find_by_session_id(db, session_id)
}

pub fn find_by_session_id(db: &Database, session_id: &str) -> Result<Vec<MenuItem>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM menu_items WHERE session_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(with_status).collect()
}

/// Updates generation fields of an item within a session. A `None` image
/// URL keeps the stored one.
pub fn update_generation_status(
    db: &Database,
    session_id: &str,
    item_id: &str,
    status: ItemGenerationStatus,
    image_url: Option<&str>,
) -> Result<(), DatabaseError> {
    let updated = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE menu_items
             SET generation_status = ?3,
                 image_url = COALESCE(?4, image_url),
                 updated_at = ?5
             WHERE session_id = ?1 AND id = ?2",
            params![
                session_id,
                item_id,
                status.as_str(),
                image_url,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(n)
    })?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Menu item",
            id: format!("{session_id}/{item_id}"),
        });
    }
    Ok(())
}

/// [`ItemRepository`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteItemRepository {
    db: Database,
}

impl SqliteItemRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn create_many(
        &self,
        session_id: &str,
        items: &[MenuItem],
    ) -> Result<Vec<MenuItem>, ServiceError> {
        Ok(replace_for_session(&self.db, session_id, items)?)
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<MenuItem>, ServiceError> {
        Ok(find_by_session_id(&self.db, session_id)?)
    }

    async fn update_generation_status(
        &self,
        session_id: &str,
        item_id: &str,
        status: ItemGenerationStatus,
        image_url: Option<&str>,
    ) -> Result<(), ServiceError> {
        Ok(update_generation_status(
            &self.db, session_id, item_id, status, image_url,
        )?)
    }
}
