/// Module de récupération des chandelles depuis l'API Upbit
///
/// ARCHITECTURE SIMPLIFIÉE:
/// - Récupère UN chunk à la fois, borné par le plafond de l'échange
/// - Route la requête vers la famille d'endpoints du timeframe
/// - Inverse la réponse (l'échange émet en ordre descendant) UNE SEULE fois,
///   ici à la frontière: tout le reste du pipeline travaille en ascendant
/// - Ne déduplique pas, ne fusionne pas, n'interprète pas les OHLC
///
/// Le limiteur de débit est un seau à jetons global partagé par tous les
/// appels; l'attente d'un jeton est un point de suspension annulable.
use crate::candle::Candle;
use crate::config::ProviderConfig;
use crate::error::CoreError;
use crate::timeframe::Timeframe;
use crate::utils;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Source de chandelles par ancre exclusive
///
/// `to` est EXCLUSIF: la chandelle la plus récente retournée ouvre un pas de
/// grille avant l'ancre. La liste retournée est ascendante.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        to: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<Vec<Candle>, CoreError>;
}

/// Objet chandelle du contrat amont, noms de champs conservés mot pour mot
#[derive(Debug, Deserialize)]
struct UpbitCandleRaw {
    market: String,
    candle_date_time_utc: String,
    candle_date_time_kst: String,
    opening_price: Decimal,
    high_price: Decimal,
    low_price: Decimal,
    trade_price: Decimal,
    timestamp: i64,
    candle_acc_trade_price: Decimal,
    candle_acc_trade_volume: Decimal,
}

impl UpbitCandleRaw {
    /// Conversion vers le modèle interne; None si la date amont est illisible
    fn into_candle(self, timeframe: Timeframe) -> Option<Candle> {
        let parsed = utils::parse_stored_time(&self.candle_date_time_utc)?;
        Some(Candle {
            market: self.market,
            timeframe,
            // Les cas limites suivent toujours align_down
            open_time_utc: timeframe.align_down(parsed),
            open_time_kst: self.candle_date_time_kst,
            opening_price: self.opening_price,
            high_price: self.high_price,
            low_price: self.low_price,
            trade_price: self.trade_price,
            source_timestamp: self.timestamp,
            candle_acc_trade_price: self.candle_acc_trade_price,
            candle_acc_trade_volume: self.candle_acc_trade_volume,
            is_synthetic: false,
        })
    }
}

/// Client REST Upbit avec limiteur de débit global
pub struct UpbitFetcher {
    http: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl UpbitFetcher {
    pub fn new(config: &ProviderConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        // 600 jetons par minute = 10 par seconde
        let per_second = (config.rate_limit_tokens_per_minute / 60).max(1);
        let quota = Quota::per_second(
            NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN),
        );

        Ok(UpbitFetcher {
            http,
            base_url: config.base_url.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Famille d'endpoints pour un timeframe
    fn endpoint_path(timeframe: Timeframe) -> String {
        match timeframe {
            Timeframe::S1 => "candles/seconds".to_string(),
            Timeframe::M1 => "candles/minutes/1".to_string(),
            Timeframe::M3 => "candles/minutes/3".to_string(),
            Timeframe::M5 => "candles/minutes/5".to_string(),
            Timeframe::M10 => "candles/minutes/10".to_string(),
            Timeframe::M15 => "candles/minutes/15".to_string(),
            Timeframe::M30 => "candles/minutes/30".to_string(),
            Timeframe::M60 => "candles/minutes/60".to_string(),
            Timeframe::M240 => "candles/minutes/240".to_string(),
            Timeframe::D1 => "candles/days".to_string(),
            Timeframe::W1 => "candles/weeks".to_string(),
            Timeframe::Mo1 => "candles/months".to_string(),
            Timeframe::Y1 => "candles/years".to_string(),
        }
    }
}

#[async_trait]
impl CandleSource for UpbitFetcher {
    async fn fetch_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        to: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<Vec<Candle>, CoreError> {
        // Point de suspension annulable: attente d'un jeton
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v1/{}", self.base_url, Self::endpoint_path(timeframe));
        let mut query: Vec<(&str, String)> = vec![
            ("market", market.to_string()),
            ("count", count.to_string()),
        ];
        if let Some(anchor) = to {
            query.push(("to", anchor.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }

        let response = self.http.get(&url).query(&query).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CoreError::UpstreamRateLimited {
                detail: format!("HTTP 429 pour {market} {timeframe}"),
            });
        }
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable {
                detail: format!("HTTP {status} pour {market} {timeframe}"),
            });
        }

        let raws: Vec<UpbitCandleRaw> = response.json().await?;
        let mut candles: Vec<Candle> = raws
            .into_iter()
            .filter_map(|raw| raw.into_candle(timeframe))
            .collect();
        candles.sort_by_key(|candle| candle.open_time_utc);
        Ok(candles)
    }
}
