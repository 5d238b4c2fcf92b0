//! Session repository: CRUD operations for the `sessions` table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::models::{ProcessingStatus, Session};
use crate::services::{ServiceError, SessionRepository};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// A raw session row from the database.
#[derive(Debug, Clone)]
struct SessionRow {
    id: String,
    image_url: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            image_url: row.get("image_url")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<Session, DatabaseError> {
        let status =
            ProcessingStatus::parse(&self.status).ok_or_else(|| DatabaseError::InvalidValue {
                column: "sessions.status",
                value: self.status.clone(),
            })?;
        Ok(Session {
            created_at: parse_timestamp("sessions.created_at", &self.created_at)?,
            updated_at: parse_timestamp("sessions.updated_at", &self.updated_at)?,
            id: self.id,
            image_url: self.image_url,
            status,
        })
    }
}

/// Inserts a session, or resets it when the id already exists.
pub fn upsert(db: &Database, session: &Session) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sessions (id, image_url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                image_url = excluded.image_url,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                session.id,
                session.image_url,
                session.status.as_str(),
                format_timestamp(session.created_at),
                format_timestamp(session.updated_at),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Session>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                SessionRow::from_row,
            )
            .optional()?;
        Ok(row)
    })?;
    row.map(SessionRow::into_session).transpose()
}

pub fn update_status(db: &Database, id: &str, status: ProcessingStatus) -> Result<(), DatabaseError> {
    let updated = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), format_timestamp(Utc::now())],
        )?;
        Ok(n)
    })?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Session",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// [`SessionRepository`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteSessionRepository {
    db: Database,
}

impl SqliteSessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: &Session) -> Result<(), ServiceError> {
        Ok(upsert(&self.db, session)?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(find_by_id(&self.db, id)?)
    }

    async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), ServiceError> {
        Ok(update_status(&self.db, id, status)?)
    }
}
