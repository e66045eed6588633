//! SQLite store for users, businesses, analyses and chat transcripts
//!
//! # Database Schema
//!
//! 1. **users** / **sessions** - accounts and login tokens
//! 2. **businesses** - one row per business, soft-deleted through `status`
//! 3. **analyses** - create-only snapshots, the row id doubles as `plan_id`
//! 4. **task_details** - memoized task expansions keyed by `(plan_id, task_id)`
//! 5. **dimension_chats** / **task_chats** - append-only transcripts
//! 6. **schema_version** - schema version for migrations
//!
//! The connection sits behind a mutex, so a `Database` can be shared by
//! reference across tasks. Writes are visible to the next read in the same
//! process; nothing here assumes more than that.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::chat::{ChatMessage, ChatRole};
use crate::pipeline::{Analysis, Dimension};

pub const SCHEMA_VERSION: i32 = 2;

/// Database wrapper for orchestrator persistence
pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Stored credentials for one user
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: UserRecord,
    pub salt: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessStatus {
    Active,
    Deleted,
}

impl BusinessStatus {
    fn as_str(&self) -> &'static str {
        match self {
            BusinessStatus::Active => "active",
            BusinessStatus::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BusinessStatus::Active),
            "deleted" => Ok(BusinessStatus::Deleted),
            _ => Err(anyhow!("Unknown business status: {}", s)),
        }
    }
}

/// A business and a pointer to its latest analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub segment: String,
    /// Current profile, as last submitted
    pub profile: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_analysis_id: Option<String>,
    pub status: BusinessStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Completion marks for one task of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub completed: bool,
    /// Ids of subtasks marked done, in id order
    pub completed_subtasks: Vec<String>,
}

/// One row of an analysis listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: String,
    pub business_id: String,
    pub overall: u8,
    pub classification: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Create a new database connection at the specified path
    pub fn new(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (tests and throwaway runs)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open at `path` and make sure the schema exists
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = Self::new(path)?;
        db.initialize_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }

    /// Initialize database schema with all tables and indexes
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                salt TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,

                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS businesses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                segment TEXT,
                profile TEXT NOT NULL,
                latest_analysis_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,

                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_businesses_user ON businesses(user_id, status);

            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                business_id TEXT NOT NULL,
                overall INTEGER NOT NULL,
                classification TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,

                FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_business
            ON analyses(business_id, created_at DESC);
            "#,
        )?;

        // Transcripts and expansions also serve analyses that were never saved,
        // so they carry no foreign key to `analyses`.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS task_details (
                plan_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,

                PRIMARY KEY(plan_id, task_id)
            );

            CREATE TABLE IF NOT EXISTS dimension_chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL,
                dimension TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dimension_chats_scope
            ON dimension_chats(analysis_id, dimension, id);

            CREATE TABLE IF NOT EXISTS task_chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_task_chats_scope
            ON task_chats(plan_id, task_id, id);

            -- An empty subtask_id marks the task itself
            CREATE TABLE IF NOT EXISTS task_completions (
                plan_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                subtask_id TEXT NOT NULL DEFAULT '',
                completed INTEGER NOT NULL,
                updated_at TEXT NOT NULL,

                PRIMARY KEY(plan_id, task_id, subtask_id)
            );

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Get current schema version
    pub fn get_schema_version(&self) -> Result<i32> {
        let version: i32 = self
            .conn()?
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version)
    }

    // ========================================================================
    // Users and sessions
    // ========================================================================

    pub fn insert_user(&self, user: &UserRecord, salt: &str, password_hash: &str) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO users (id, email, name, salt, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                user.id,
                user.email,
                user.name,
                salt,
                password_hash,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        let found = self
            .conn()?
            .query_row(
                r#"
                SELECT id, email, name, created_at, salt, password_hash
                FROM users WHERE email = ?1
                "#,
                params![email],
                |row| {
                    Ok(Credentials {
                        user: map_user_row(row)?,
                        salt: row.get(4)?,
                        password_hash: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        let found = self
            .conn()?
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![id],
                map_user_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO sessions (token, user_id, expires_at, revoked, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session.token,
                session.user_id,
                session.expires_at.to_rfc3339(),
                session.revoked,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let found = self
            .conn()?
            .query_row(
                "SELECT token, user_id, expires_at, revoked FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(SessionRecord {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: parse_time(row, 2)?,
                        revoked: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Returns whether a live session was revoked
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE sessions SET revoked = 1 WHERE token = ?1 AND revoked = 0",
            params![token],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // Businesses
    // ========================================================================

    pub fn create_business(&self, user_id: &str, name: &str, profile: &Value) -> Result<Business> {
        let now = Utc::now();
        let business = Business {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            segment: profile_segment(profile),
            profile: profile.clone(),
            latest_analysis_id: None,
            status: BusinessStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.conn()?.execute(
            r#"
            INSERT INTO businesses (
                id, user_id, name, segment, profile, latest_analysis_id, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)
            "#,
            params![
                business.id,
                business.user_id,
                business.name,
                business.segment,
                serde_json::to_string(&business.profile)?,
                business.status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(business)
    }

    /// Active business owned by `user_id`
    pub fn get_business(&self, id: &str, user_id: &str) -> Result<Option<Business>> {
        let found = self
            .conn()?
            .query_row(
                r#"
                SELECT id, user_id, name, segment, profile, latest_analysis_id, status,
                       created_at, updated_at
                FROM businesses
                WHERE id = ?1 AND user_id = ?2 AND status = 'active'
                "#,
                params![id, user_id],
                map_business_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_businesses(&self, user_id: &str) -> Result<Vec<Business>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, name, segment, profile, latest_analysis_id, status,
                   created_at, updated_at
            FROM businesses
            WHERE user_id = ?1 AND status = 'active'
            ORDER BY updated_at DESC
            "#,
        )?;
        let businesses = stmt
            .query_map(params![user_id], map_business_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(businesses)
    }

    /// Soft delete; returns whether an active business was found
    pub fn soft_delete_business(&self, id: &str, user_id: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE businesses SET status = 'deleted', updated_at = ?3
            WHERE id = ?1 AND user_id = ?2 AND status = 'active'
            "#,
            params![id, user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // Analyses
    // ========================================================================

    /// Store an analysis and make it the business' latest
    ///
    /// Create-only: saving an id twice is an error. The business' current
    /// profile is replaced by the analysed one in the same transaction.
    pub fn save_analysis(&self, business_id: &str, analysis: &Analysis) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let profile = serde_json::to_value(&analysis.profile)?;

        tx.execute(
            r#"
            INSERT INTO analyses (id, business_id, overall, classification, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                analysis.id,
                business_id,
                analysis.score.overall,
                analysis.score.classification.label(),
                serde_json::to_string(analysis)?,
                analysis.created_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Analysis {} could not be created", analysis.id))?;

        let updated = tx.execute(
            r#"
            UPDATE businesses
            SET latest_analysis_id = ?2, profile = ?3, segment = ?4, updated_at = ?5
            WHERE id = ?1 AND status = 'active'
            "#,
            params![
                business_id,
                analysis.id,
                serde_json::to_string(&profile)?,
                analysis.profile.segment(),
                now,
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("Business {} not found", business_id));
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_analysis(&self, id: &str) -> Result<Option<Analysis>> {
        let data: Option<String> = self
            .conn()?
            .query_row("SELECT data FROM analyses WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d).context("Stored analysis is corrupt"))
            .transpose()
    }

    /// Analysis named by the business's `latest_analysis_id` pointer
    pub fn latest_analysis(&self, business_id: &str) -> Result<Option<Analysis>> {
        let data: Option<String> = self
            .conn()?
            .query_row(
                r#"
                SELECT a.data FROM businesses b
                JOIN analyses a ON a.id = b.latest_analysis_id
                WHERE b.id = ?1
                "#,
                params![business_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).context("Stored analysis is corrupt"))
            .transpose()
    }

    pub fn list_analyses(&self, business_id: &str) -> Result<Vec<AnalysisSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, business_id, overall, classification, created_at
            FROM analyses
            WHERE business_id = ?1
            ORDER BY created_at DESC, rowid DESC
            "#,
        )?;
        let analyses = stmt
            .query_map(params![business_id], |row| {
                Ok(AnalysisSummary {
                    id: row.get(0)?,
                    business_id: row.get(1)?,
                    overall: row.get(2)?,
                    classification: row.get(3)?,
                    created_at: parse_time(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    // ========================================================================
    // Task details
    // ========================================================================

    /// Insert unless `(plan_id, task_id)` already has a detail
    ///
    /// Returns whether this call wrote the row.
    pub fn insert_task_detail(&self, plan_id: &str, task_id: &str, data: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            r#"
            INSERT OR IGNORE INTO task_details (plan_id, task_id, data, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![plan_id, task_id, data, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn get_task_detail(&self, plan_id: &str, task_id: &str) -> Result<Option<String>> {
        let found = self
            .conn()?
            .query_row(
                "SELECT data FROM task_details WHERE plan_id = ?1 AND task_id = ?2",
                params![plan_id, task_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }

    /// Mark a task, or one of its subtasks, done or not done
    pub fn set_task_complete(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask_id: Option<&str>,
        completed: bool,
    ) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO task_completions (plan_id, task_id, subtask_id, completed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(plan_id, task_id, subtask_id)
            DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at
            "#,
            params![
                plan_id,
                task_id,
                subtask_id.unwrap_or_default(),
                completed,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn task_completion(&self, plan_id: &str, task_id: &str) -> Result<TaskCompletion> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT subtask_id FROM task_completions
            WHERE plan_id = ?1 AND task_id = ?2 AND completed = 1
            ORDER BY subtask_id
            "#,
        )?;
        let marked = stmt
            .query_map(params![plan_id, task_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut completion = TaskCompletion::default();
        for subtask_id in marked {
            if subtask_id.is_empty() {
                completion.completed = true;
            } else {
                completion.completed_subtasks.push(subtask_id);
            }
        }
        Ok(completion)
    }

    // ========================================================================
    // Transcripts
    // ========================================================================

    pub fn append_dimension_chat(
        &self,
        analysis_id: &str,
        dimension: Dimension,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO dimension_chats (analysis_id, dimension, role, content, sources, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for message in messages {
                stmt.execute(params![
                    analysis_id,
                    dimension.key(),
                    message.role.as_str(),
                    message.content,
                    serde_json::to_string(&message.sources)?,
                    Utc::now().to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn dimension_chat(&self, analysis_id: &str, dimension: Dimension) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT role, content, sources FROM dimension_chats
            WHERE analysis_id = ?1 AND dimension = ?2
            ORDER BY id ASC
            "#,
        )?;
        let messages = stmt
            .query_map(params![analysis_id, dimension.key()], map_chat_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn append_task_chat(&self, plan_id: &str, task_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO task_chats (plan_id, task_id, role, content, sources, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for message in messages {
                stmt.execute(params![
                    plan_id,
                    task_id,
                    message.role.as_str(),
                    message.content,
                    serde_json::to_string(&message.sources)?,
                    Utc::now().to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn task_chat(&self, plan_id: &str, task_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT role, content, sources FROM task_chats
            WHERE plan_id = ?1 AND task_id = ?2
            ORDER BY id ASC
            "#,
        )?;
        let messages = stmt
            .query_map(params![plan_id, task_id], map_chat_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

/// `segmento` from either profile shape
fn profile_segment(profile: &Value) -> String {
    profile
        .get("perfil")
        .and_then(|p| p.get("segmento"))
        .or_else(|| profile.get("segmento"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn map_user_row(row: &Row) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_time(row, 3)?,
    })
}

/// Map a database row to Business
fn map_business_row(row: &Row) -> rusqlite::Result<Business> {
    let profile_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;

    let profile = serde_json::from_str(&profile_str).map_err(|e| conversion_error(4, e))?;
    let status = BusinessStatus::parse(&status_str).map_err(|e| {
        conversion_error(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    })?;

    Ok(Business {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        segment: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        profile,
        latest_analysis_id: row.get(5)?,
        status,
        created_at: parse_time(row, 7)?,
        updated_at: parse_time(row, 8)?,
    })
}

fn map_chat_row(row: &Row) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(0)?;
    let sources_str: String = row.get(2)?;
    let role = ChatRole::parse(&role_str).ok_or_else(|| {
        conversion_error(
            0,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("Unknown role: {}", role_str)),
        )
    })?;
    Ok(ChatMessage {
        role,
        content: row.get(1)?,
        sources: serde_json::from_str(&sources_str).map_err(|e| conversion_error(2, e))?,
    })
}
