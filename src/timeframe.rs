/// Module de la grille temporelle
///
/// ARCHITECTURE:
/// Ensemble fermé de timeframes Upbit + fonctions pures sur la grille:
/// alignement vers le bas, avance de N pas, énumération et comptage des
/// bornes d'un intervalle. Tout est en UTC.
///
/// Les timeframes mensuels et annuels sont alignés sur le calendrier
/// (premier jour du mois/de l'année, minuit UTC); tous les autres sont des
/// bornes modulaires depuis l'epoch.
use crate::error::CoreError;
use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ensemble fermé des timeframes reconnus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    S1,
    M1,
    M3,
    M5,
    M10,
    M15,
    M30,
    M60,
    M240,
    D1,
    W1,
    Mo1,
    Y1,
}

/// Tous les timeframes, du plus fin au plus grossier
pub const ALL_TIMEFRAMES: [Timeframe; 13] = [
    Timeframe::S1,
    Timeframe::M1,
    Timeframe::M3,
    Timeframe::M5,
    Timeframe::M10,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::M60,
    Timeframe::M240,
    Timeframe::D1,
    Timeframe::W1,
    Timeframe::Mo1,
    Timeframe::Y1,
];

impl Timeframe {
    /// Identifiant de l'API ("5m", "1d", "1M", ...)
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::M60 => "60m",
            Timeframe::M240 => "240m",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
            Timeframe::Y1 => "1y",
        }
    }

    /// Suffixe utilisé dans les noms de tables SQLite
    ///
    /// IMPORTANT: SQLite compare les identifiants sans tenir compte de la
    /// casse, donc "1m" et "1M" entreraient en collision. Le mensuel devient
    /// "1mo" côté stockage; l'identifiant API reste "1M".
    pub fn table_code(&self) -> &'static str {
        match self {
            Timeframe::Mo1 => "1mo",
            other => other.code(),
        }
    }

    /// Intervalle exact en secondes pour les timeframes fixes
    ///
    /// RETOUR: None pour 1M et 1y (valeur symbolique, interdite en
    /// arithmétique: passer par les opérations calendaires)
    pub fn fixed_seconds(&self) -> Option<i64> {
        match self {
            Timeframe::S1 => Some(1),
            Timeframe::M1 => Some(60),
            Timeframe::M3 => Some(180),
            Timeframe::M5 => Some(300),
            Timeframe::M10 => Some(600),
            Timeframe::M15 => Some(900),
            Timeframe::M30 => Some(1_800),
            Timeframe::M60 => Some(3_600),
            Timeframe::M240 => Some(14_400),
            Timeframe::D1 => Some(86_400),
            Timeframe::W1 => Some(604_800),
            Timeframe::Mo1 | Timeframe::Y1 => None,
        }
    }

    /// Vrai pour journalier et au-delà (politique de plafond synthétique)
    pub fn is_daily_or_above(&self) -> bool {
        matches!(
            self,
            Timeframe::D1 | Timeframe::W1 | Timeframe::Mo1 | Timeframe::Y1
        )
    }

    /// Plus grande borne de grille <= t
    pub fn align_down(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self.fixed_seconds() {
            Some(step) => {
                let secs = t.timestamp();
                let rem = secs.rem_euclid(step);
                // Tronquer aussi les sous-secondes éventuelles
                t - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
                    - Duration::seconds(rem)
            }
            None => {
                let (year, month) = match self {
                    Timeframe::Mo1 => (t.year(), t.month()),
                    _ => (t.year(), 1),
                };
                // Toujours unique en UTC (pas d'ambiguïté de fuseau)
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
            }
        }
    }

    /// Vrai si t est exactement une borne de grille
    pub fn is_aligned(&self, t: DateTime<Utc>) -> bool {
        self.align_down(t) == t
    }

    /// Ajoute n pas de grille (n peut être négatif) à un timestamp aligné
    pub fn advance(&self, t: DateTime<Utc>, n: i64) -> Result<DateTime<Utc>, CoreError> {
        if !self.is_aligned(t) {
            return Err(CoreError::UnalignedTimestamp {
                timestamp: t,
                timeframe: *self,
            });
        }
        match self.fixed_seconds() {
            Some(step) => Ok(t + Duration::seconds(step * n)),
            None => {
                let months = match self {
                    Timeframe::Mo1 => n,
                    _ => n * 12,
                };
                let shifted = if months >= 0 {
                    t.checked_add_months(Months::new(months as u32))
                } else {
                    t.checked_sub_months(Months::new((-months) as u32))
                };
                // Hors de plage seulement pour des dates absurdes
                Ok(shifted.expect("dépassement de plage calendaire"))
            }
        }
    }

    /// Un pas de grille vers le futur
    pub fn step_forward(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
        self.advance(t, 1)
    }

    /// Un pas de grille vers le passé
    pub fn step_back(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
        self.advance(t, -1)
    }

    /// Toutes les bornes de grille dans [start, end], bornes incluses
    pub fn enumerate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, CoreError> {
        if !self.is_aligned(start) {
            return Err(CoreError::UnalignedTimestamp {
                timestamp: start,
                timeframe: *self,
            });
        }
        let mut boundaries = Vec::new();
        let mut current = start;
        while current <= end {
            boundaries.push(current);
            current = self.advance(current, 1)?;
        }
        Ok(boundaries)
    }

    /// Nombre de bornes dans [start, end], équivalent à enumerate().len()
    pub fn count_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        for t in [start, end] {
            if !self.is_aligned(t) {
                return Err(CoreError::UnalignedTimestamp {
                    timestamp: t,
                    timeframe: *self,
                });
            }
        }
        if end < start {
            return Ok(0);
        }
        match self.fixed_seconds() {
            Some(step) => Ok((end - start).num_seconds() / step + 1),
            None => {
                let months = i64::from(end.year() - start.year()) * 12
                    + i64::from(end.month()) - i64::from(start.month());
                match self {
                    Timeframe::Mo1 => Ok(months + 1),
                    _ => Ok(months / 12 + 1),
                }
            }
        }
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    /// Analyse stricte sur l'ensemble fermé (sensible à la casse: 1m != 1M)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_TIMEFRAMES
            .iter()
            .find(|tf| tf.code() == s)
            .copied()
            .ok_or_else(|| CoreError::InvalidTimeframe {
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn align_down_sur_grille_fixe() {
        let t = utc(2024, 1, 15, 10, 7, 42);
        assert_eq!(Timeframe::M5.align_down(t), utc(2024, 1, 15, 10, 5, 0));
        assert_eq!(Timeframe::M60.align_down(t), utc(2024, 1, 15, 10, 0, 0));
        assert_eq!(Timeframe::D1.align_down(t), utc(2024, 1, 15, 0, 0, 0));
        // Un timestamp déjà aligné est un point fixe
        let aligned = utc(2024, 1, 15, 10, 5, 0);
        assert_eq!(Timeframe::M5.align_down(aligned), aligned);
    }

    #[test]
    fn align_down_calendaire() {
        let t = utc(2024, 3, 17, 9, 30, 0);
        assert_eq!(Timeframe::Mo1.align_down(t), utc(2024, 3, 1, 0, 0, 0));
        assert_eq!(Timeframe::Y1.align_down(t), utc(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn advance_fixe_et_negatif() {
        let t = utc(2024, 1, 15, 10, 5, 0);
        assert_eq!(
            Timeframe::M5.advance(t, 3).unwrap(),
            utc(2024, 1, 15, 10, 20, 0)
        );
        assert_eq!(
            Timeframe::M5.advance(t, -2).unwrap(),
            utc(2024, 1, 15, 9, 55, 0)
        );
    }

    #[test]
    fn advance_calendaire() {
        let jan = utc(2024, 1, 1, 0, 0, 0);
        assert_eq!(Timeframe::Mo1.advance(jan, 1).unwrap(), utc(2024, 2, 1, 0, 0, 0));
        assert_eq!(
            Timeframe::Mo1.advance(jan, -1).unwrap(),
            utc(2023, 12, 1, 0, 0, 0)
        );
        assert_eq!(Timeframe::Y1.advance(jan, 2).unwrap(), utc(2026, 1, 1, 0, 0, 0));
    }

    #[test]
    fn advance_refuse_timestamp_non_aligne() {
        let t = utc(2024, 1, 15, 10, 7, 0);
        let err = Timeframe::M5.advance(t, 1).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn enumerate_coherent_avec_count_between() {
        let start = utc(2024, 1, 15, 0, 0, 0);
        let end = utc(2024, 1, 15, 1, 0, 0);
        let boundaries = Timeframe::M5.enumerate(start, end).unwrap();
        assert_eq!(boundaries.len(), 13);
        assert_eq!(
            Timeframe::M5.count_between(start, end).unwrap(),
            boundaries.len() as i64
        );
        assert_eq!(boundaries.first(), Some(&start));
        assert_eq!(boundaries.last(), Some(&end));

        let mo_start = utc(2023, 11, 1, 0, 0, 0);
        let mo_end = utc(2024, 2, 1, 0, 0, 0);
        assert_eq!(Timeframe::Mo1.count_between(mo_start, mo_end).unwrap(), 4);
        assert_eq!(Timeframe::Mo1.enumerate(mo_start, mo_end).unwrap().len(), 4);
    }

    #[test]
    fn count_between_fenetre_vide() {
        let start = utc(2024, 1, 15, 0, 5, 0);
        let end = utc(2024, 1, 15, 0, 0, 0);
        assert_eq!(Timeframe::M5.count_between(start, end).unwrap(), 0);
    }

    #[test]
    fn parse_ensemble_ferme() {
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::M5);
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::Mo1);
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert!("2h".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }
}
