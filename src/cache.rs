/// Module du cache de réponses
///
/// ARCHITECTURE:
/// Cache en mémoire borné (nombre d'entrées + TTL par entrée) de l'empreinte
/// de requête résolue vers la liste finale de chandelles. Une écriture dans
/// le dépôt pour une paire invalide toutes les entrées de cette paire. Le
/// cache est une optimisation pure: la justesse n'en dépend jamais.
///
/// moka balaie les entrées expirées au fil des insertions; l'éviction par
/// capacité est TinyLFU, largement suffisant au volume attendu.
use crate::candle::Candle;
use crate::timeframe::Timeframe;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Clé de cache: la paire + l'empreinte canonique de la requête résolue
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    pub market: String,
    pub timeframe: Timeframe,
    pub fingerprint: String,
}

/// Résultat mis en cache: la liste finale et son drapeau d'épuisement
/// (un épuisement resservi depuis le cache doit rester visible)
#[derive(Debug)]
pub struct CachedResult {
    pub candles: Vec<Candle>,
    pub exhausted: bool,
}

/// Cache des réponses de collecte
pub struct CandleCache {
    inner: Cache<CacheKey, Arc<CachedResult>>,
}

impl CandleCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        CandleCache { inner }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CachedResult>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, result: Arc<CachedResult>) {
        self.inner.insert(key, result).await;
    }

    /// Invalide toutes les entrées d'une paire (appelé après toute écriture
    /// dans le dépôt de cette paire)
    pub fn invalidate_pair(&self, market: &str, timeframe: Timeframe) {
        let market = market.to_string();
        // Le cache étant une optimisation, un échec d'invalidation de masse
        // se résout par le TTL
        let _ = self
            .inner
            .invalidate_entries_if(move |key, _| {
                key.market == market && key.timeframe == timeframe
            });
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn key(market: &str, timeframe: Timeframe, fingerprint: &str) -> CacheKey {
        CacheKey {
            market: market.to_string(),
            timeframe,
            fingerprint: fingerprint.to_string(),
        }
    }

    fn sample() -> Arc<CachedResult> {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        Arc::new(CachedResult {
            candles: vec![Candle::synthetic("KRW-BTC", Timeframe::M5, t, dec!(100))],
            exhausted: false,
        })
    }

    #[tokio::test]
    async fn aller_retour_par_empreinte() {
        let cache = CandleCache::new(10, Duration::from_secs(60));
        let k = key("KRW-BTC", Timeframe::M5, "KRW-BTC|5m|a|b|n=100|incl");
        assert!(cache.get(&k).await.is_none());
        cache.insert(k.clone(), sample()).await;
        let hit = cache.get(&k).await.unwrap();
        assert_eq!(hit.candles.len(), 1);
        assert!(!hit.exhausted);
    }

    #[tokio::test]
    async fn invalidation_par_paire_epargne_les_autres() {
        let cache = CandleCache::new(10, Duration::from_secs(60));
        let btc = key("KRW-BTC", Timeframe::M5, "btc");
        let btc_1m = key("KRW-BTC", Timeframe::M1, "btc1m");
        let eth = key("KRW-ETH", Timeframe::M5, "eth");
        cache.insert(btc.clone(), sample()).await;
        cache.insert(btc_1m.clone(), sample()).await;
        cache.insert(eth.clone(), sample()).await;

        cache.invalidate_pair("KRW-BTC", Timeframe::M5);

        assert!(cache.get(&btc).await.is_none());
        assert!(cache.get(&btc_1m).await.is_some());
        assert!(cache.get(&eth).await.is_some());
    }

    #[tokio::test]
    async fn les_entrees_expirent_au_ttl() {
        let cache = CandleCache::new(10, Duration::from_millis(100));
        let k = key("KRW-BTC", Timeframe::M5, "ttl");
        cache.insert(k.clone(), sample()).await;
        assert!(cache.get(&k).await.is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.get(&k).await.is_none());
    }
}
