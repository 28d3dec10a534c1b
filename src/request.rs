/// Module des requêtes de collecte
///
/// Une requête immuable décrit ce que l'appelant veut: les N dernières
/// chandelles (avec ancre `to` optionnelle), N chandelles à partir d'une
/// date, ou une fenêtre fermée [start, end]. La validation liste toutes
/// les violations d'un coup, puis la résolution fige une fenêtre concrète
/// alignée sur la grille et son empreinte canonique (clé de cache).
use crate::error::CoreError;
use crate::timeframe::{ALL_TIMEFRAMES, Timeframe};
use crate::utils;
use chrono::{DateTime, Utc};

/// Borne dure sur le nombre de chandelles d'une requête
pub const MAX_REQUEST_COUNT: i64 = 10_000;

/// Spécification immuable d'une collecte
#[derive(Debug, Clone)]
pub struct CandleRequest {
    /// Symbole de marché (ex: KRW-BTC)
    pub market: String,
    /// Identifiant de timeframe (ensemble fermé, sensible à la casse)
    pub timeframe: String,
    /// Nombre de chandelles demandées
    pub count: Option<i64>,
    /// Ancre de fin pour une requête par nombre (ramenée à maintenant si future)
    pub to: Option<DateTime<Utc>>,
    /// Début de fenêtre ou point de départ
    pub start_time: Option<DateTime<Utc>>,
    /// Fin de fenêtre (fermée)
    pub end_time: Option<DateTime<Utc>>,
    /// start_time compte-t-il comme première chandelle retournée?
    pub inclusive_start: bool,
}

impl CandleRequest {
    /// Les N dernières chandelles d'une paire
    pub fn latest(market: &str, timeframe: &str, count: i64) -> Self {
        CandleRequest {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            count: Some(count),
            to: None,
            start_time: None,
            end_time: None,
            inclusive_start: true,
        }
    }

    /// N chandelles à partir de start_time
    pub fn from_start(
        market: &str,
        timeframe: &str,
        start_time: DateTime<Utc>,
        count: i64,
    ) -> Self {
        CandleRequest {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            count: Some(count),
            to: None,
            start_time: Some(start_time),
            end_time: None,
            inclusive_start: true,
        }
    }

    /// Toutes les chandelles de la fenêtre fermée [start_time, end_time]
    pub fn window(
        market: &str,
        timeframe: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        CandleRequest {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            count: None,
            to: None,
            start_time: Some(start_time),
            end_time: Some(end_time),
            inclusive_start: true,
        }
    }

    /// Fixe l'ancre de fin d'une requête par nombre
    pub fn with_to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Contrôle si start_time lui-même compte comme première chandelle
    pub fn with_inclusive_start(mut self, inclusive: bool) -> Self {
        self.inclusive_start = inclusive;
        self
    }

    /// Valide la requête et la résout en fenêtre concrète
    ///
    /// ALGORITHME:
    /// 1. Accumuler TOUTES les violations (jamais d'arrêt à la première)
    /// 2. Ramener une ancre `to` future à "maintenant aligné vers le bas"
    /// 3. Figer la fenêtre [window_start, window_end] alignée et le nombre
    ///    de bornes attendu
    pub fn validate_and_resolve(&self, now: DateTime<Utc>) -> Result<ResolvedRequest, CoreError> {
        let mut violations: Vec<String> = Vec::new();

        if self.market.trim().is_empty() {
            violations.push("symbole vide".to_string());
        } else if !self.market.contains('-') {
            violations.push(format!("symbole mal formé: {}", self.market));
        }

        let timeframe = match self.timeframe.parse::<Timeframe>() {
            Ok(tf) => Some(tf),
            Err(_) => {
                let known: Vec<&str> = ALL_TIMEFRAMES.iter().map(|tf| tf.code()).collect();
                violations.push(format!(
                    "timeframe inconnu: {} (reconnus: {})",
                    self.timeframe,
                    known.join(", ")
                ));
                None
            }
        };

        // Exactement une des trois formes: count, start+count, start+end
        match (self.count, self.start_time, self.end_time) {
            (Some(_), None, None) => {}
            (Some(_), Some(_), None) => {}
            (None, Some(_), Some(_)) => {}
            (Some(_), _, Some(_)) => {
                violations.push("count et end_time sont mutuellement exclusifs".to_string());
            }
            (None, _, _) => {
                violations.push(
                    "il faut count, start_time+count ou start_time+end_time".to_string(),
                );
            }
        }

        if let Some(count) = self.count {
            if count < 1 || count > MAX_REQUEST_COUNT {
                violations.push(format!(
                    "count hors bornes: {count} (attendu 1..={MAX_REQUEST_COUNT})"
                ));
            }
        }

        if self.to.is_some() && self.start_time.is_some() {
            violations.push("to n'est valable que pour une requête par nombre".to_string());
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                violations.push(format!(
                    "start_time doit précéder end_time ({} >= {})",
                    utils::format_timestamp(start),
                    utils::format_timestamp(end)
                ));
            }
        }

        // Les timestamps explicites ne peuvent pas être dans le futur;
        // seule l'ancre `to` est ramenée à maintenant au lieu d'échouer
        for (label, value) in [("start_time", self.start_time), ("end_time", self.end_time)] {
            if let Some(t) = value {
                if t > now {
                    violations.push(format!(
                        "{label} dans le futur: {}",
                        utils::format_timestamp(t)
                    ));
                }
            }
        }

        if !violations.is_empty() {
            return Err(CoreError::Validation { violations });
        }
        let timeframe = timeframe.expect("timeframe validé ci-dessus");

        let now_aligned = timeframe.align_down(now);
        let resolved = match (self.count, self.start_time, self.end_time) {
            // Les N dernières, ancrées à `to` ou à maintenant
            (Some(count), None, None) => {
                let anchor = match self.to {
                    Some(to) => timeframe.align_down(to).min(now_aligned),
                    None => now_aligned,
                };
                let window_start = timeframe.advance(anchor, -(count - 1))?;
                ResolvedRequest {
                    market: self.market.clone(),
                    timeframe,
                    window_start,
                    window_end: anchor,
                    target_count: Some(count),
                    expected_total: count,
                    inclusive_start: self.inclusive_start,
                }
            }
            // N chandelles à partir de start_time
            (Some(count), Some(start), None) => {
                let window_start = self.effective_start(timeframe, start);
                let natural_end = timeframe.advance(window_start, count - 1)?;
                let window_end = natural_end.min(now_aligned);
                ResolvedRequest {
                    market: self.market.clone(),
                    timeframe,
                    window_start,
                    window_end,
                    target_count: Some(count),
                    expected_total: count,
                    inclusive_start: self.inclusive_start,
                }
            }
            // Fenêtre fermée [start, end]
            (None, Some(start), Some(end)) => {
                let window_start = self.effective_start(timeframe, start);
                let window_end = timeframe.align_down(end).min(now_aligned);
                if window_end < window_start {
                    return Err(CoreError::Validation {
                        violations: vec!["fenêtre vide après alignement sur la grille".to_string()],
                    });
                }
                let expected = timeframe.count_between(window_start, window_end)?;
                ResolvedRequest {
                    market: self.market.clone(),
                    timeframe,
                    window_start,
                    window_end,
                    target_count: None,
                    expected_total: expected,
                    inclusive_start: self.inclusive_start,
                }
            }
            _ => unreachable!("formes invalides rejetées plus haut"),
        };

        Ok(resolved)
    }

    /// Première borne de grille de la fenêtre: au plus tôt à start_time,
    /// décalée d'un pas si start_time est exclu
    fn effective_start(&self, timeframe: Timeframe, start: DateTime<Utc>) -> DateTime<Utc> {
        let floor = timeframe.align_down(start);
        if floor == start {
            if self.inclusive_start {
                start
            } else {
                // align_down(start) == start, donc l'avance ne peut pas échouer
                timeframe.advance(start, 1).unwrap_or(start)
            }
        } else {
            // start non aligné: la première borne >= start est la suivante
            timeframe.advance(floor, 1).unwrap_or(floor)
        }
    }
}

/// Requête résolue: fenêtre concrète alignée + cible de collecte
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub market: String,
    pub timeframe: Timeframe,
    /// Première borne de la fenêtre (inclusive_start déjà appliqué)
    pub window_start: DateTime<Utc>,
    /// Dernière borne de la fenêtre (inclusive)
    pub window_end: DateTime<Utc>,
    /// Cible en nombre de chandelles (None pour une fenêtre pure)
    pub target_count: Option<i64>,
    /// Nombre de bornes attendu dans la fenêtre
    pub expected_total: i64,
    pub inclusive_start: bool,
}

impl ResolvedRequest {
    /// Empreinte canonique de la requête résolue (clé de cache)
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.market,
            self.timeframe,
            utils::stored_time(self.window_start),
            utils::stored_time(self.window_end),
            match self.target_count {
                Some(count) => format!("n={count}"),
                None => "fenetre".to_string(),
            },
            if self.inclusive_start { "incl" } else { "excl" }
        )
    }
}
