use crate::models::{DataPage, ResultItem, Session};
use crate::store::{SessionQuery, TableStore};
use crate::themes::{ThemeLookup, ThemeMap};
use anyhow::Context;
use std::sync::Arc;

/// Sessions below this id predate the current test format and are never shown.
pub const MIN_SESSION_ID: i64 = 45;
/// Session state for a finished, evaluated test.
pub const COMPLETED_STATE: i32 = 1;

pub const DEFAULT_OFFSET: i64 = 0;
pub const DEFAULT_LIMIT: i64 = 20;

pub const UNKNOWN_THEME: &str = "Неизвестная тема";
const NO_USER: &str = "no_user";

/// `"First Last (username)"`, with blanks collapsed when name parts are missing.
pub fn full_name(session: &Session) -> String {
    let first = session.first_name.as_deref().unwrap_or("");
    let last = session.last_name.as_deref().unwrap_or("");
    let username = session
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(NO_USER);

    let name = format!("{first} {last}");
    format!("{} ({username})", name.trim()).trim().to_string()
}

impl ResultItem {
    pub fn from_session(session: Session, themes: &ThemeMap) -> Self {
        let full_name = full_name(&session);
        let theme_name = session
            .theme_id
            .and_then(|id| themes.get(&id))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_THEME.to_string());

        Self {
            id: session.id,
            created_at: session.created_at,
            answered_at: session.answered_at,
            full_name,
            theme_name,
            result: session.result.unwrap_or_default(),
            user_answer: session.user_answer.unwrap_or_default(),
        }
    }
}

pub struct SessionPageFetcher {
    store: Arc<dyn TableStore>,
    themes: Arc<ThemeLookup>,
    max_limit: i64,
}

impl SessionPageFetcher {
    pub fn new(store: Arc<dyn TableStore>, themes: Arc<ThemeLookup>, max_limit: i64) -> Self {
        Self {
            store,
            themes,
            max_limit,
        }
    }

    /// Limits above the configured maximum are clamped, and the returned page
    /// reports the limit actually applied.
    pub fn effective_limit(&self, limit: i64) -> i64 {
        limit.min(self.max_limit)
    }

    pub async fn fetch_page(&self, offset: i64, limit: i64) -> anyhow::Result<DataPage> {
        let limit = self.effective_limit(limit);
        let themes = self.themes.theme_map().await?;

        let query = SessionQuery {
            min_id: MIN_SESSION_ID,
            state: COMPLETED_STATE,
            offset,
            limit,
        };
        let page = self
            .store
            .fetch_sessions(&query)
            .await
            .context("failed to fetch sessions")?;

        let data = page
            .rows
            .into_iter()
            .map(|session| ResultItem::from_session(session, &themes))
            .collect();

        Ok(DataPage {
            data,
            total: page.total,
            offset,
            limit,
        })
    }
}

#[cfg(test)]
pub mod fixtures {
    use crate::models::{Session, Theme};
    use chrono::{Duration, TimeZone, Utc};

    pub fn session(id: i64, state: i32, minutes: i64) -> Session {
        Session {
            id,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
                + Duration::minutes(minutes),
            answered_at: None,
            first_name: Some("Ann".into()),
            last_name: Some("Lee".into()),
            username: Some("ann_lee".into()),
            theme_id: Some(7),
            state,
            result: Some("Зачёт".into()),
            user_answer: Some("Предложу скидку".into()),
        }
    }

    pub fn themes() -> Vec<Theme> {
        vec![Theme {
            id: 7,
            name: "Pricing".into(),
        }]
    }

    /// Ids 40..=60, every third one unfinished, created in a shuffled order.
    pub fn sessions() -> Vec<Session> {
        (40..=60)
            .map(|id| {
                let state = if id % 3 == 0 { 0 } else { 1 };
                session(id, state, (id * 37) % 23)
            })
            .collect()
    }
}
