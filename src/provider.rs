/// Module de la façade du fournisseur de chandelles
///
/// ARCHITECTURE:
/// Point d'entrée unique `get_candles`: validation, cache, réservation du
/// créneau de la paire, exécution du processeur de chunks sous délai, puis
/// publication dans le cache. Les erreurs ne remontent jamais en panique:
/// la réponse porte un bloc `error` structuré (kind + détail), et les
/// chandelles déjà collectées sont jointes sous `partial` quand la collecte
/// s'est arrêtée en route pour une autre raison que l'épuisement.
use crate::cache::{CacheKey, CachedResult, CandleCache};
use crate::candle::Candle;
use crate::chunk_processor::{
    ChunkProcessor, CollectionCoordinator, CollectionResult, ProgressEvent,
};
use crate::config::ProviderConfig;
use crate::database::DatabaseManager;
use crate::error::CoreError;
use crate::fetcher::{CandleSource, UpbitFetcher};
use crate::repository::CandleRepository;
use crate::request::{CandleRequest, ResolvedRequest};
use crate::timeframe::Timeframe;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// D'où vient la réponse servie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Api,
    Db,
    Mixed,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Api => "api",
            ResponseSource::Db => "db",
            ResponseSource::Mixed => "mixed",
        };
        f.write_str(token)
    }
}

/// Bloc d'erreur structuré de la réponse
#[derive(Debug, Clone, Serialize)]
pub struct ResponseError {
    pub kind: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_code: Option<&'static str>,
}

/// Réponse de `get_candles`
#[derive(Debug, Clone, Serialize)]
pub struct CandleResponse {
    pub success: bool,
    pub candles: Vec<Candle>,
    pub total_count: usize,
    pub source: ResponseSource,
    pub response_time_ms: i64,
    /// L'échange n'a plus de données plus anciennes (succès avec moins de
    /// chandelles que demandé)
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Chandelles collectées avant un arrêt en erreur (débogage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<Vec<Candle>>,
}

/// Façade du fournisseur de chandelles Upbit
pub struct CandleProvider {
    config: ProviderConfig,
    cache: CandleCache,
    source: Arc<dyn CandleSource>,
    coordinator: Arc<CollectionCoordinator>,
}

impl CandleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, CoreError> {
        let source: Arc<dyn CandleSource> = Arc::new(UpbitFetcher::new(&config)?);
        Ok(Self::with_source(config, source))
    }

    /// Construit la façade sur une source arbitraire (simulateurs, tests)
    pub fn with_source(config: ProviderConfig, source: Arc<dyn CandleSource>) -> Self {
        let cache = CandleCache::new(
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_seconds),
        );
        CandleProvider {
            cache,
            source,
            coordinator: CollectionCoordinator::new(),
            config,
        }
    }

    /// Dépôt d'une paire dans le fichier configuré
    pub fn repository(&self, market: &str, timeframe: Timeframe) -> CandleRepository {
        CandleRepository::new(&self.config.db_file, market, timeframe)
    }

    /// L'entrée publique unique
    pub async fn get_candles(&self, request: &CandleRequest) -> CandleResponse {
        self.get_candles_inner(request, None).await
    }

    /// Variante avec abonnement aux événements de progression
    pub async fn get_candles_with_progress(
        &self,
        request: &CandleRequest,
        progress: UnboundedSender<ProgressEvent>,
    ) -> CandleResponse {
        self.get_candles_inner(request, Some(progress)).await
    }

    async fn get_candles_inner(
        &self,
        request: &CandleRequest,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> CandleResponse {
        let started = Instant::now();

        // 1. Validation et résolution (toutes les violations d'un coup)
        let resolved = match request.validate_and_resolve(Utc::now()) {
            Ok(resolved) => resolved,
            Err(error) => return error_response(error, started, None),
        };

        // 2. Cache par empreinte canonique
        let key = CacheKey {
            market: resolved.market.clone(),
            timeframe: resolved.timeframe,
            fingerprint: resolved.fingerprint(),
        };
        if let Some(hit) = self.cache.get(&key).await {
            return CandleResponse {
                success: true,
                total_count: hit.candles.len(),
                candles: hit.candles.clone(),
                source: ResponseSource::Cache,
                response_time_ms: started.elapsed().as_millis() as i64,
                exhausted: hit.exhausted,
                error: None,
                partial: None,
            };
        }

        // 3. Créneau de la paire: refus immédiat en cas de contention
        let _slot = match self
            .coordinator
            .try_acquire(&resolved.market, resolved.timeframe)
        {
            Ok(slot) => slot,
            Err(error) => return error_response(error, started, None),
        };

        // 4. Collecte sous délai
        let repository = self.repository(&resolved.market, resolved.timeframe);
        let processor = ChunkProcessor::new(
            repository.clone(),
            Arc::clone(&self.source),
            &self.config,
        );
        let deadline = self.deadline_for(resolved.expected_total);

        match tokio::time::timeout(deadline, processor.execute(&resolved, progress, false)).await {
            Ok(Ok(result)) => {
                // 5. Cohérence du cache: purge de la paire puis entrée fraîche
                self.cache
                    .invalidate_pair(&resolved.market, resolved.timeframe);
                self.cache
                    .insert(
                        key,
                        Arc::new(CachedResult {
                            candles: result.candles.clone(),
                            exhausted: result.exhausted,
                        }),
                    )
                    .await;

                let source = if result.chunks_fetched == 0 {
                    ResponseSource::Db
                } else if result.chunks_from_db == 0 {
                    ResponseSource::Api
                } else {
                    ResponseSource::Mixed
                };
                CandleResponse {
                    success: true,
                    total_count: result.candles.len(),
                    candles: result.candles,
                    source,
                    response_time_ms: started.elapsed().as_millis() as i64,
                    exhausted: result.exhausted,
                    error: None,
                    partial: None,
                }
            }
            Ok(Err(error)) => {
                let partial = partial_window(&repository, &resolved).await;
                error_response(error, started, partial)
            }
            Err(_) => {
                let partial = partial_window(&repository, &resolved).await;
                error_response(
                    CoreError::Cancelled {
                        detail: format!("délai de {} ms dépassé", deadline.as_millis()),
                    },
                    started,
                    partial,
                )
            }
        }
    }

    /// Planifie la collecte sans récupération ni écriture (estimation de coût)
    pub async fn plan_collection(
        &self,
        request: &CandleRequest,
    ) -> Result<CollectionResult, CoreError> {
        let resolved = request.validate_and_resolve(Utc::now())?;
        let repository = self.repository(&resolved.market, resolved.timeframe);
        let processor = ChunkProcessor::new(repository, Arc::clone(&self.source), &self.config);
        processor.execute(&resolved, None, true).await
    }

    /// Séries (symbole, timeframe) déjà matérialisées dans le stockage
    pub fn list_available_series(&self) -> Result<Vec<String>, CoreError> {
        let db = DatabaseManager::new(&self.config.db_file)?;
        Ok(db.list_candle_tables()?)
    }

    /// Budget de délai: proportionnel au volume demandé
    fn deadline_for(&self, expected_total: i64) -> Duration {
        let total = expected_total.max(1);
        let blocks = (total + 1_000 - 1) / 1_000;
        Duration::from_millis(
            (blocks * self.config.per_request_deadline_ms_per_1000_candles).max(1) as u64,
        )
    }
}

fn error_response(
    error: CoreError,
    started: Instant,
    partial: Option<Vec<Candle>>,
) -> CandleResponse {
    CandleResponse {
        success: false,
        candles: Vec::new(),
        total_count: 0,
        source: ResponseSource::Db,
        response_time_ms: started.elapsed().as_millis() as i64,
        exhausted: false,
        error: Some(ResponseError {
            kind: error.kind().to_string(),
            detail: error.to_string(),
            detail_code: error.detail_code(),
        }),
        partial,
    }
}

/// Lecture best-effort de la fenêtre pour joindre un `partial` au débogage
async fn partial_window(
    repository: &CandleRepository,
    resolved: &ResolvedRequest,
) -> Option<Vec<Candle>> {
    let repo = repository.clone();
    let (start, end) = (resolved.window_start, resolved.window_end);
    let collected = tokio::task::spawn_blocking(move || repo.read_range(start, end, None))
        .await
        .ok()?
        .ok()?;
    (!collected.is_empty()).then_some(collected)
}
