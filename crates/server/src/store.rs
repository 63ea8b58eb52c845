//! Read-only access to the theme and session tables.
//!
//! Two backends speak to the same tables: a direct Postgres pool, and the
//! PostgREST API that Supabase exposes in front of it.

use crate::config::{Config, StoreConfig};
use crate::models::{Session, Theme};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionQuery {
    pub min_id: i64,
    pub state: i32,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRows {
    pub rows: Vec<Session>,
    /// Rows matching the filters, ignoring offset and limit.
    pub total: i64,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn fetch_themes(&self) -> anyhow::Result<Vec<Theme>>;

    /// Rows with `id >= min_id` and `state == state`, newest `created_at`
    /// first, sliced by offset and limit.
    async fn fetch_sessions(&self, query: &SessionQuery) -> anyhow::Result<SessionRows>;

    async fn ping(&self) -> anyhow::Result<()>;

    fn backend(&self) -> &'static str;
}

pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn TableStore>> {
    let store: Arc<dyn TableStore> = match &config.store {
        StoreConfig::Postgres { database_url } => Arc::new(PgStore::connect_lazy(
            database_url,
            &config.themes_table,
            &config.sessions_table,
        )?),
        StoreConfig::Rest { url, key } => Arc::new(RestStore::new(
            url,
            key,
            &config.themes_table,
            &config.sessions_table,
        )),
        StoreConfig::Unconfigured => {
            tracing::warn!(
                "DATABASE_URL or SUPABASE_URL/SUPABASE_KEY not found in env vars, data requests will fail"
            );
            Arc::new(UnconfiguredStore)
        }
    };
    Ok(store)
}

// ===== Postgres =====

pub struct PgStore {
    db: PgPool,
    themes_sql: String,
    sessions_sql: String,
    count_sql: String,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl PgStore {
    /// No connection is opened until the first query.
    pub fn connect_lazy(
        database_url: &str,
        themes_table: &str,
        sessions_table: &str,
    ) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .context("invalid DATABASE_URL")?;

        let themes = quote_ident(themes_table);
        let sessions = quote_ident(sessions_table);

        Ok(Self {
            db,
            themes_sql: format!(
                "SELECT id::bigint AS id, COALESCE(name::text, '') AS name FROM {themes}"
            ),
            sessions_sql: format!(
                r#"
                SELECT
                    id::bigint AS id,
                    created_at::timestamptz AS created_at,
                    answered_at::timestamptz AS answered_at,
                    first_name::text AS first_name,
                    last_name::text AS last_name,
                    username::text AS username,
                    theme_id::bigint AS theme_id,
                    state::integer AS state,
                    result::text AS result,
                    user_answer::text AS user_answer
                FROM {sessions}
                WHERE id >= $1 AND state = $2
                ORDER BY created_at DESC
                OFFSET $3
                LIMIT $4
                "#
            ),
            count_sql: format!("SELECT COUNT(*) FROM {sessions} WHERE id >= $1 AND state = $2"),
        })
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn fetch_themes(&self) -> anyhow::Result<Vec<Theme>> {
        let themes = sqlx::query_as::<_, Theme>(&self.themes_sql)
            .fetch_all(&self.db)
            .await?;
        Ok(themes)
    }

    async fn fetch_sessions(&self, query: &SessionQuery) -> anyhow::Result<SessionRows> {
        let total: i64 = sqlx::query_scalar(&self.count_sql)
            .bind(query.min_id)
            .bind(query.state)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, Session>(&self.sessions_sql)
            .bind(query.min_id)
            .bind(query.state)
            .bind(query.offset)
            .bind(query.limit)
            .fetch_all(&self.db)
            .await?;

        Ok(SessionRows { rows, total })
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

// ===== PostgREST =====

pub struct RestStore {
    client: Client,
    key: String,
    themes_url: String,
    sessions_url: String,
}

impl RestStore {
    pub fn new(url: &str, key: &str, themes_table: &str, sessions_table: &str) -> Self {
        let base = url.trim_end_matches('/');
        Self {
            client: Client::new(),
            key: key.to_string(),
            themes_url: format!("{base}/rest/v1/{themes_table}"),
            sessions_url: format!("{base}/rest/v1/{sessions_table}"),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("apikey", &self.key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.key))
    }
}

async fn error_for_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    bail!("store API error ({}): {}", status, text)
}

/// Extracts `N` from a `Content-Range` value such as `0-19/57` or `*/0`.
pub fn parse_content_range_total(value: &str) -> Option<i64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl TableStore for RestStore {
    async fn fetch_themes(&self) -> anyhow::Result<Vec<Theme>> {
        let response = self
            .get(&self.themes_url)
            .query(&[("select", "id,name")])
            .send()
            .await?;
        let themes = error_for_status(response).await?.json().await?;
        Ok(themes)
    }

    async fn fetch_sessions(&self, query: &SessionQuery) -> anyhow::Result<SessionRows> {
        let response = self
            .get(&self.sessions_url)
            .header("Prefer", "count=exact")
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("gte.{}", query.min_id)),
                ("state", format!("eq.{}", query.state)),
                ("order", "created_at.desc".to_string()),
                ("offset", query.offset.to_string()),
                ("limit", query.limit.to_string()),
            ])
            .send()
            .await?;

        let total = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        // PostgREST answers 416 when the offset is past the last row.
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            if let Some(total) = total {
                return Ok(SessionRows {
                    rows: Vec::new(),
                    total,
                });
            }
        }

        let response = error_for_status(response).await?;
        let total = total.ok_or_else(|| anyhow!("store API response is missing an exact count"))?;
        let rows = response.json().await?;
        Ok(SessionRows { rows, total })
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let response = self
            .get(&self.themes_url)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "rest"
    }
}

// ===== Unconfigured =====

pub struct UnconfiguredStore;

const NOT_CONFIGURED: &str =
    "table store is not configured: set DATABASE_URL or SUPABASE_URL and SUPABASE_KEY";

#[async_trait]
impl TableStore for UnconfiguredStore {
    async fn fetch_themes(&self) -> anyhow::Result<Vec<Theme>> {
        bail!(NOT_CONFIGURED)
    }

    async fn fetch_sessions(&self, _query: &SessionQuery) -> anyhow::Result<SessionRows> {
        bail!(NOT_CONFIGURED)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        bail!(NOT_CONFIGURED)
    }

    fn backend(&self) -> &'static str {
        "unconfigured"
    }
}
