/// Module du processeur de chunks
///
/// ARCHITECTURE:
/// Convertit une requête résolue en plan de collecte, puis déroule le plan
/// chunk par chunk, du plus récent vers le plus ancien (l'ordre natif de
/// l'échange, et celui qui maximise la localité pour « les N dernières »):
///   1. borne le chunk et interroge l'analyseur de chevauchement
///   2. selon le verdict: lecture seule, récupération restreinte, ou
///      récupération complète
///   3. densifie la réponse via le détecteur de chandelles vides puis écrit
///   4. recompte la fenêtre depuis le dépôt (jamais depuis l'API: c'est ce
///      qui absorbe les recouvrements) et avance l'ancre
///   5. vérifie les conditions de fin, émet un événement de progression
///
/// Une seule collecte à la fois par paire (symbole, timeframe): le
/// coordinateur refuse la seconde au lieu de la sérialiser.
use crate::candle::Candle;
use crate::config::ProviderConfig;
use crate::empty_candle::EmptyCandleDetector;
use crate::error::CoreError;
use crate::fetcher::CandleSource;
use crate::overlap::{OverlapAnalyzer, OverlapRequest};
use crate::repository::CandleRepository;
use crate::request::ResolvedRequest;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// États du plan de collecte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Planning,
    Fetching,
    Processing,
    Storing,
    Completed,
    Exhausted,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            CollectionStatus::Planning => "planning",
            CollectionStatus::Fetching => "fetching",
            CollectionStatus::Processing => "processing",
            CollectionStatus::Storing => "storing",
            CollectionStatus::Completed => "completed",
            CollectionStatus::Exhausted => "exhausted",
        };
        f.write_str(token)
    }
}

/// Événement de progression, publié sans jamais bloquer le processeur
/// (un abonné lent ou disparu perd des événements, pas la collecte)
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub status: CollectionStatus,
    pub collected_count: i64,
    pub chunks_done: i64,
    pub estimated_remaining_ms: Option<i64>,
}

/// Bilan d'une collecte menée à terme
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub success: bool,
    /// Fenêtre finale, ascendante (vide en dry-run)
    pub candles: Vec<Candle>,
    pub total_fetched: i64,
    pub total_stored: i64,
    pub api_calls: u32,
    pub elapsed_ms: i64,
    pub status: String,
    /// L'échange n'a plus rien de plus ancien (pas une erreur)
    pub exhausted: bool,
    pub chunks_fetched: i64,
    pub chunks_from_db: i64,
}

/// Coordinateur des collectes actives
///
/// Petite carte en mémoire (paire → collecte en cours); la deuxième
/// collecte concurrente d'une même paire échoue immédiatement avec
/// `ConcurrentCollectionInProgress`, l'appelant réessaiera une fois le
/// cache peuplé.
#[derive(Debug, Default)]
pub struct CollectionCoordinator {
    active: Mutex<HashSet<(String, Timeframe)>>,
}

impl CollectionCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(CollectionCoordinator::default())
    }

    /// Réserve le créneau de la paire; le créneau est rendu au drop du guard
    pub fn try_acquire(
        self: &Arc<Self>,
        market: &str,
        timeframe: Timeframe,
    ) -> Result<CollectionSlot, CoreError> {
        let key = (market.to_string(), timeframe);
        let mut active = self.active.lock().unwrap();
        if !active.insert(key.clone()) {
            return Err(CoreError::ConcurrentCollectionInProgress {
                market: market.to_string(),
                timeframe,
            });
        }
        Ok(CollectionSlot {
            coordinator: Arc::clone(self),
            key,
        })
    }
}

/// Guard RAII du créneau de collecte d'une paire
pub struct CollectionSlot {
    coordinator: Arc<CollectionCoordinator>,
    key: (String, Timeframe),
}

impl Drop for CollectionSlot {
    fn drop(&mut self) {
        self.coordinator.active.lock().unwrap().remove(&self.key);
    }
}

/// Processeur séquentiel d'une collecte
pub struct ChunkProcessor {
    repository: CandleRepository,
    source: Arc<dyn CandleSource>,
    detector: EmptyCandleDetector,
    chunk_size: i64,
    retry_max: u32,
    retry_base_delay_ms: u64,
}

impl ChunkProcessor {
    pub fn new(
        repository: CandleRepository,
        source: Arc<dyn CandleSource>,
        config: &ProviderConfig,
    ) -> Self {
        ChunkProcessor {
            repository,
            source,
            detector: EmptyCandleDetector::new(config.synthetic_cap_daily_and_above),
            chunk_size: config.chunk_size,
            retry_max: config.chunk_retry_max,
            retry_base_delay_ms: config.chunk_retry_base_delay_ms,
        }
    }

    /// Déroule la collecte jusqu'à complétion, épuisement ou erreur
    ///
    /// `dry_run = true`: planifie et annonce les chunks (analyse comprise)
    /// sans récupération ni écriture; sert à estimer le coût d'une requête
    pub async fn execute(
        &self,
        request: &ResolvedRequest,
        progress: Option<UnboundedSender<ProgressEvent>>,
        dry_run: bool,
    ) -> Result<CollectionResult, CoreError> {
        let started = Instant::now();
        let timeframe = request.timeframe;
        let window_start = request.window_start;
        let window_end = request.window_end;

        let mut current_to = window_end;
        let mut collected_count = 0i64;
        let mut chunks_done = 0i64;
        let mut chunks_fetched = 0i64;
        let mut chunks_from_db = 0i64;
        let mut total_fetched = 0i64;
        let mut total_stored = 0i64;
        let mut api_calls = 0u32;
        let mut exhausted = false;

        let expected_total = request.expected_total.max(1);
        // Plafond conservateur: jamais plus du double des chunks théoriques
        let max_iterations =
            2 * ((expected_total + self.chunk_size - 1) / self.chunk_size) + 4;

        emit(
            &progress,
            ProgressEvent {
                status: CollectionStatus::Planning,
                collected_count: 0,
                chunks_done: 0,
                estimated_remaining_ms: None,
            },
        );

        let mut iterations = 0i64;
        let mut completed = false;
        while !completed && !exhausted {
            iterations += 1;
            if iterations > max_iterations {
                return Err(CoreError::Cancelled {
                    detail: format!(
                        "plafond de sécurité atteint après {chunks_done} chunks \
                         ({collected_count}/{expected_total} chandelles)"
                    ),
                });
            }

            let chunk_end = current_to;
            let chunk_start = timeframe
                .advance(chunk_end, -(self.chunk_size - 1))?
                .max(window_start);
            let chunk_expected = timeframe.count_between(chunk_start, chunk_end)?;

            let overlap_request = OverlapRequest {
                target_start: chunk_start,
                target_end: chunk_end,
                expected_count: chunk_expected,
            };
            let analysis = self
                .run_repo(move |repo| OverlapAnalyzer::analyze(&repo, &overlap_request))
                .await?;

            if let (Some(fetch_from), Some(fetch_to)) = (analysis.fetch_from, analysis.fetch_to) {
                chunks_fetched += 1;
                emit(
                    &progress,
                    ProgressEvent {
                        status: CollectionStatus::Fetching,
                        collected_count,
                        chunks_done,
                        estimated_remaining_ms: None,
                    },
                );

                if !dry_run {
                    // L'ancre de l'échange est exclusive: un pas après la
                    // dernière borne incluse du chunk
                    let anchor = timeframe.step_forward(fetch_to)?;
                    let fetched = self
                        .fetch_with_retry(
                            &request.market,
                            timeframe,
                            anchor,
                            analysis.fetch_count,
                            &mut api_calls,
                        )
                        .await?;

                    if fetched.is_empty() {
                        // Plus rien de plus ancien côté échange
                        exhausted = true;
                        chunks_done += 1;
                        continue;
                    }

                    emit(
                        &progress,
                        ProgressEvent {
                            status: CollectionStatus::Processing,
                            collected_count,
                            chunks_done,
                            estimated_remaining_ms: None,
                        },
                    );
                    let previous_close = self
                        .run_repo(move |repo| repo.last_close_before(fetch_from))
                        .await?;
                    let dense = self.detector.fill(
                        &request.market,
                        timeframe,
                        &fetched,
                        fetch_from,
                        fetch_to,
                        previous_close,
                    )?;

                    emit(
                        &progress,
                        ProgressEvent {
                            status: CollectionStatus::Storing,
                            collected_count,
                            chunks_done,
                            estimated_remaining_ms: None,
                        },
                    );
                    let stored = self.run_repo(move |repo| repo.save(&dense)).await?;
                    total_fetched += fetched.len() as i64;
                    total_stored += stored;
                }
            } else {
                chunks_from_db += 1;
            }

            // Le décompte vient du dépôt, pas du retour API
            collected_count = if dry_run {
                collected_count + chunk_expected
            } else {
                self.run_repo(move |repo| repo.count_in_range(window_start, window_end))
                    .await?
            };
            current_to = timeframe.step_back(chunk_start)?;
            chunks_done += 1;

            // Conditions de fin, dans l'ordre du contrat
            if let Some(target) = request.target_count {
                if collected_count >= target {
                    completed = true;
                }
            }
            if !completed && current_to < window_start {
                completed = true;
            }

            let elapsed_ms = started.elapsed().as_millis() as i64;
            let remaining = (expected_total - collected_count).max(0);
            let remaining_chunks = (remaining + self.chunk_size - 1) / self.chunk_size;
            emit(
                &progress,
                ProgressEvent {
                    status: if completed {
                        CollectionStatus::Completed
                    } else {
                        CollectionStatus::Processing
                    },
                    collected_count,
                    chunks_done,
                    estimated_remaining_ms: (chunks_done > 0)
                        .then(|| elapsed_ms / chunks_done * remaining_chunks),
                },
            );
        }

        let final_status = if exhausted {
            CollectionStatus::Exhausted
        } else {
            CollectionStatus::Completed
        };
        if exhausted {
            emit(
                &progress,
                ProgressEvent {
                    status: final_status,
                    collected_count,
                    chunks_done,
                    estimated_remaining_ms: Some(0),
                },
            );
        }

        // Lecture finale: exactement la fenêtre demandée, ascendante
        let limit = request.target_count.map(|n| n as usize);
        let candles = if dry_run {
            Vec::new()
        } else {
            self.run_repo(move |repo| repo.read_range(window_start, window_end, limit))
                .await?
        };
        let final_count = if dry_run {
            collected_count
        } else {
            candles.len() as i64
        };

        Ok(CollectionResult {
            success: true,
            status: format!(
                "{final_status}: {final_count} chandelles en {chunks_done} chunks"
            ),
            candles,
            total_fetched,
            total_stored,
            api_calls,
            elapsed_ms: started.elapsed().as_millis() as i64,
            exhausted,
            chunks_fetched,
            chunks_from_db,
        })
    }

    /// Appel amont avec backoff exponentiel et gigue (±20 %)
    ///
    /// Seules les conditions amont transitoires sont retentées; après
    /// `retry_max` retries, l'erreur du chunk remonte telle quelle
    async fn fetch_with_retry(
        &self,
        market: &str,
        timeframe: Timeframe,
        anchor: DateTime<Utc>,
        count: i64,
        api_calls: &mut u32,
    ) -> Result<Vec<Candle>, CoreError> {
        let mut attempt = 0u32;
        loop {
            *api_calls += 1;
            match self
                .source
                .fetch_candles(market, timeframe, Some(anchor), count as u32)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(error) if error.is_upstream_transient() && attempt < self.retry_max => {
                    let backoff = self.retry_base_delay_ms * 2u64.pow(attempt);
                    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
                    tokio::time::sleep(Duration::from_millis((backoff as f64 * jitter) as u64))
                        .await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Déporte une opération rusqlite bloquante hors du runtime
    async fn run_repo<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        F: FnOnce(CandleRepository) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || operation(repository))
            .await
            .map_err(|join_error| CoreError::Cancelled {
                detail: format!("tâche de stockage interrompue: {join_error}"),
            })?
    }
}

fn emit(progress: &Option<UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(sender) = progress {
        // Abonné disparu: l'événement est perdu, la collecte continue
        let _ = sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::test_support::ExchangeSim;
    use crate::request::CandleRequest;

    fn test_config(name: &str) -> ProviderConfig {
        let path = std::env::temp_dir().join(format!("ucp_proc_{name}.db"));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
        ProviderConfig {
            db_file: path.to_string_lossy().into_owned(),
            chunk_retry_base_delay_ms: 10,
            ..ProviderConfig::default()
        }
    }

    fn processor(config: &ProviderConfig, sim: Arc<ExchangeSim>, tf: Timeframe) -> ChunkProcessor {
        let repo = CandleRepository::new(&config.db_file, "KRW-BTC", tf);
        ChunkProcessor::new(repo, sim, config)
    }

    #[tokio::test]
    async fn cent_dernieres_en_un_seul_appel() {
        let config = test_config("latest100");
        let sim = Arc::new(ExchangeSim::new(61000));
        let proc = processor(&config, Arc::clone(&sim), Timeframe::M5);
        let request = CandleRequest::latest("KRW-BTC", "5m", 100)
            .validate_and_resolve(Utc::now())
            .unwrap();

        let result = proc.execute(&request, None, false).await.unwrap();

        assert!(result.success);
        assert!(!result.exhausted);
        assert_eq!(result.api_calls, 1);
        assert_eq!(sim.call_count(), 1);
        assert_eq!(result.candles.len(), 100);
        assert_eq!(result.total_stored, 100);
        assert!(result.candles.iter().all(|c| !c.is_synthetic));
        // Ascendant, pas de 300 s, se terminant sur maintenant aligné
        for pair in result.candles.windows(2) {
            assert_eq!(
                (pair[1].open_time_utc - pair[0].open_time_utc).num_seconds(),
                300
            );
        }
        assert_eq!(
            result.candles.last().map(|c| c.open_time_utc),
            Some(request.window_end)
        );
    }

    #[tokio::test]
    async fn serie_epuisee_a_la_date_de_cotation() {
        let config = test_config("epuisement");
        let tf = Timeframe::D1;
        let today = tf.align_down(Utc::now());
        // Cotation il y a 300 jours: 500 demandées, 300 disponibles
        let listing = tf.advance(today, -299).unwrap();
        let sim = Arc::new(ExchangeSim::new(1000).with_history_start(listing));
        let proc = processor(&config, Arc::clone(&sim), tf);
        let request = CandleRequest::latest("KRW-BTC", "1d", 500)
            .validate_and_resolve(Utc::now())
            .unwrap();

        let result = proc.execute(&request, None, false).await.unwrap();

        assert!(result.success);
        assert!(result.exhausted);
        assert_eq!(result.candles.len(), 300);
        assert!(result.status.starts_with("exhausted"));
        // 2 chunks pleins + 1 chunk vide qui signe l'épuisement
        assert_eq!(result.api_calls, 3);
    }

    #[tokio::test]
    async fn chevauchement_partiel_ne_recupere_que_la_portion_ancienne() {
        let config = test_config("partial");
        let tf = Timeframe::M5;
        let sim = Arc::new(ExchangeSim::new(2000));
        let proc = processor(&config, Arc::clone(&sim), tf);

        let now = Utc::now();
        let end = tf.advance(tf.align_down(now), -10).unwrap();
        let start = tf.advance(end, -40).unwrap();
        // Le dépôt couvre déjà la moitié récente [start+21, end]
        let preseeded_from = tf.advance(start, 21).unwrap();
        let repo = CandleRepository::new(&config.db_file, "KRW-BTC", tf);
        let mut seeded = Vec::new();
        let mut t = preseeded_from;
        while t <= end {
            seeded.push(sim.candle_at("KRW-BTC", tf, t));
            t = tf.advance(t, 1).unwrap();
        }
        repo.save(&seeded).unwrap();

        let request = CandleRequest::window("KRW-BTC", "5m", start, end)
            .validate_and_resolve(now)
            .unwrap();
        let result = proc.execute(&request, None, false).await.unwrap();

        // Une seule récupération, restreinte aux 21 bornes manquantes
        assert_eq!(result.api_calls, 1);
        assert_eq!(result.total_fetched, 21);
        assert_eq!(result.total_stored, 21);
        assert_eq!(result.candles.len(), 41);
        assert_eq!(result.chunks_fetched, 1);
        for pair in result.candles.windows(2) {
            assert!(pair[0].open_time_utc < pair[1].open_time_utc);
        }
    }

    #[tokio::test]
    async fn couverture_complete_zero_appel_amont() {
        let config = test_config("complet");
        let tf = Timeframe::M5;
        let sim = Arc::new(ExchangeSim::new(3000));
        let proc = processor(&config, Arc::clone(&sim), tf);

        let now = Utc::now();
        let end = tf.advance(tf.align_down(now), -10).unwrap();
        let start = tf.advance(end, -19).unwrap();
        let repo = CandleRepository::new(&config.db_file, "KRW-BTC", tf);
        let mut seeded = Vec::new();
        let mut t = start;
        while t <= end {
            seeded.push(sim.candle_at("KRW-BTC", tf, t));
            t = tf.advance(t, 1).unwrap();
        }
        repo.save(&seeded).unwrap();

        let request = CandleRequest::window("KRW-BTC", "5m", start, end)
            .validate_and_resolve(now)
            .unwrap();
        let result = proc.execute(&request, None, false).await.unwrap();

        assert_eq!(sim.call_count(), 0);
        assert_eq!(result.api_calls, 0);
        assert_eq!(result.chunks_fetched, 0);
        assert!(result.chunks_from_db > 0);
        assert_eq!(result.candles.len(), 20);
    }

    #[tokio::test]
    async fn dry_run_n_appelle_rien_et_n_ecrit_rien() {
        let config = test_config("dryrun");
        let sim = Arc::new(ExchangeSim::new(4000));
        let proc = processor(&config, Arc::clone(&sim), Timeframe::M5);
        let request = CandleRequest::latest("KRW-BTC", "5m", 500)
            .validate_and_resolve(Utc::now())
            .unwrap();

        let result = proc.execute(&request, None, true).await.unwrap();

        assert_eq!(sim.call_count(), 0);
        assert_eq!(result.api_calls, 0);
        assert!(result.candles.is_empty());
        // 500 bornes à 200 par chunk: 3 chunks annoncés
        assert_eq!(result.chunks_fetched, 3);
        let repo = CandleRepository::new(&config.db_file, "KRW-BTC", Timeframe::M5);
        assert_eq!(repo.bounds().unwrap(), None);
    }

    #[tokio::test]
    async fn pannes_transitoires_retentees_puis_succes() {
        let config = test_config("retries");
        let sim = Arc::new(ExchangeSim::new(5000).with_failures(2));
        let proc = processor(&config, Arc::clone(&sim), Timeframe::M5);
        let request = CandleRequest::latest("KRW-BTC", "5m", 50)
            .validate_and_resolve(Utc::now())
            .unwrap();

        let result = proc.execute(&request, None, false).await.unwrap();

        // 2 pannes + 1 succès, bornés par retry_max
        assert_eq!(result.api_calls, 3);
        assert_eq!(result.candles.len(), 50);
    }

    #[tokio::test]
    async fn les_evenements_de_progression_arrivent() {
        let config = test_config("progression");
        let sim = Arc::new(ExchangeSim::new(6000));
        let proc = processor(&config, Arc::clone(&sim), Timeframe::M5);
        let request = CandleRequest::latest("KRW-BTC", "5m", 100)
            .validate_and_resolve(Utc::now())
            .unwrap();

        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        proc.execute(&request, Some(sender), false).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            statuses.push(event.status);
        }
        assert_eq!(statuses.first(), Some(&CollectionStatus::Planning));
        assert!(statuses.contains(&CollectionStatus::Fetching));
        assert!(statuses.contains(&CollectionStatus::Storing));
        assert_eq!(statuses.last(), Some(&CollectionStatus::Completed));
    }

    #[test]
    fn le_coordinateur_refuse_la_seconde_collecte() {
        let coordinator = CollectionCoordinator::new();
        let slot = coordinator.try_acquire("KRW-BTC", Timeframe::M1).unwrap();
        let refused = coordinator.try_acquire("KRW-BTC", Timeframe::M1);
        assert!(matches!(
            refused,
            Err(CoreError::ConcurrentCollectionInProgress { .. })
        ));
        // Paire différente: aucune contention
        assert!(coordinator.try_acquire("KRW-ETH", Timeframe::M1).is_ok());
        drop(slot);
        assert!(coordinator.try_acquire("KRW-BTC", Timeframe::M1).is_ok());
    }
}
