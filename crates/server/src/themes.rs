use crate::store::TableStore;
use anyhow::Context;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::Instant};

pub type ThemeMap = HashMap<i64, String>;

struct CachedThemes {
    fetched_at: Instant,
    map: Arc<ThemeMap>,
}

/// Resolves theme ids to names. The whole theme table is small, so it is read
/// at once and kept for `ttl`. A zero ttl reads it on every call.
pub struct ThemeLookup {
    store: Arc<dyn TableStore>,
    ttl: Duration,
    cache: RwLock<Option<CachedThemes>>,
}

impl ThemeLookup {
    pub fn new(store: Arc<dyn TableStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub async fn theme_map(&self) -> anyhow::Result<Arc<ThemeMap>> {
        if self.ttl.is_zero() {
            return self.fetch().await;
        }

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.map.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed it while we waited.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.map.clone());
            }
        }

        let map = self.fetch().await?;
        *cache = Some(CachedThemes {
            fetched_at: Instant::now(),
            map: map.clone(),
        });
        Ok(map)
    }

    async fn fetch(&self) -> anyhow::Result<Arc<ThemeMap>> {
        let themes = self
            .store
            .fetch_themes()
            .await
            .context("failed to fetch themes")?;
        tracing::debug!(count = themes.len(), "Loaded themes");
        Ok(Arc::new(
            themes.into_iter().map(|t| (t.id, t.name)).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Theme;
    use crate::store::memory::MemoryStore;

    fn theme(id: i64, name: &str) -> Theme {
        Theme {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn builds_id_to_name_map() {
        let store = Arc::new(MemoryStore::new(
            vec![theme(7, "Pricing"), theme(8, "Objections")],
            vec![],
        ));
        let lookup = ThemeLookup::new(store, Duration::ZERO);
        let map = lookup.theme_map().await.unwrap();
        assert_eq!(map.get(&7).map(String::as_str), Some("Pricing"));
        assert_eq!(map.get(&8).map(String::as_str), Some("Objections"));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn zero_ttl_refetches_every_call() {
        let store = Arc::new(MemoryStore::new(vec![theme(1, "A")], vec![]));
        let lookup = ThemeLookup::new(store.clone(), Duration::ZERO);
        lookup.theme_map().await.unwrap();
        lookup.theme_map().await.unwrap();
        assert_eq!(store.theme_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_until_ttl_expires() {
        let store = Arc::new(MemoryStore::new(vec![theme(1, "Old")], vec![]));
        let lookup = ThemeLookup::new(store.clone(), Duration::from_secs(60));

        assert_eq!(lookup.theme_map().await.unwrap()[&1], "Old");
        *store.themes.lock().unwrap() = vec![theme(1, "New")];
        assert_eq!(lookup.theme_map().await.unwrap()[&1], "Old");
        assert_eq!(store.theme_calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(lookup.theme_map().await.unwrap()[&1], "New");
        assert_eq!(store.theme_calls(), 2);
    }

    #[tokio::test]
    async fn store_failure_propagates_and_is_not_cached() {
        let store = Arc::new(MemoryStore::failing("connection refused"));
        let lookup = ThemeLookup::new(store.clone(), Duration::from_secs(60));
        let err = lookup.theme_map().await.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
        assert!(lookup.theme_map().await.is_err());
        assert_eq!(store.theme_calls(), 2);
    }
}
