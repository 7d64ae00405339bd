//! SQLite persistence for chats and their message transcripts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::traits::ChatStore;
use crate::types::{Chat, ChatMessage, PLACEHOLDER_TITLE};

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_created
             ON messages (chat_id, created_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> Chat {
    Chat {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    /// Create the chat with the placeholder title if it does not exist.
    /// An existing row is left untouched, including its title.
    async fn upsert_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(PLACEHOLDER_TITLE)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> anyhow::Result<Option<Chat>> {
        let row = sqlx::query("SELECT id, user_id, title, created_at FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chat))
    }

    async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<Chat>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, created_at FROM chats
             WHERE user_id = ?
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chat).collect())
    }

    /// Owner-checked rename. Returns the number of rows changed, so the
    /// caller can distinguish "renamed" from "not yours / not found".
    async fn rename_chat(&self, chat_id: &str, user_id: &str, title: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE chats SET title = ? WHERE id = ? AND user_id = ?")
            .bind(title.trim())
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Set the title only while it still carries the placeholder, so a
    /// user-chosen title is never overwritten by auto-titling.
    async fn rename_if_placeholder(&self, chat_id: &str, title: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE chats SET title = ? WHERE id = ? AND title = ?")
            .bind(title)
            .bind(chat_id)
            .bind(PLACEHOLDER_TITLE)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<u64> {
        let deleted = sqlx::query("DELETE FROM chats WHERE id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            sqlx::query("DELETE FROM messages WHERE chat_id = ?")
                .bind(chat_id)
                .execute(&self.pool)
                .await?;
        }

        debug!(chat_id, deleted, "delete_chat");
        Ok(deleted)
    }

    async fn append_message(&self, msg: &ChatMessage) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.chat_id)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(msg.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, role, content, created_at FROM messages
             WHERE chat_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatMessage {
                id: row.get("id"),
                chat_id: row.get("chat_id"),
                role: row.get("role"),
                content: row.get("content"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at")),
            })
            .collect())
    }
}
