/// Module du modèle de chandelle OHLCV
///
/// Une chandelle est une observation immuable alignée sur une borne de
/// grille; `open_time_utc` sert de clé naturelle au sein d'une paire
/// (symbole, timeframe). Les lignes synthétiques produites par le détecteur
/// de chandelles vides portent `is_synthetic = true`.
use crate::timeframe::Timeframe;
use crate::utils;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Chandelle OHLCV
///
/// DESIGN: les noms de champs sérialisés reprennent mot pour mot le contrat
/// amont Upbit (auditabilité); les prix sont des décimaux à précision fixe,
/// jamais des flottants binaires, pour que les valeurs fassent l'aller-retour
/// sans perte entre l'amont, la réponse et les comparaisons
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub market: String,
    #[serde(skip)]
    pub timeframe: Timeframe,
    #[serde(rename = "candle_date_time_utc", serialize_with = "serialize_grid_time")]
    pub open_time_utc: DateTime<Utc>,
    #[serde(rename = "candle_date_time_kst")]
    pub open_time_kst: String,
    pub opening_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub trade_price: Decimal,
    /// Epoch millisecondes fourni par l'amont (informationnel)
    #[serde(rename = "timestamp")]
    pub source_timestamp: i64,
    pub candle_acc_trade_price: Decimal,
    pub candle_acc_trade_volume: Decimal,
    pub is_synthetic: bool,
}

fn serialize_grid_time<S: Serializer>(
    t: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&utils::stored_time(*t))
}

impl Candle {
    /// Construit une chandelle synthétique pour une borne sans donnée amont
    ///
    /// OHLC = dernière clôture réelle connue, volumes à zéro,
    /// `source_timestamp` = borne en millisecondes
    pub fn synthetic(
        market: &str,
        timeframe: Timeframe,
        open_time_utc: DateTime<Utc>,
        close: Decimal,
    ) -> Self {
        Candle {
            market: market.to_string(),
            timeframe,
            open_time_utc,
            open_time_kst: utils::kst_display(open_time_utc),
            opening_price: close,
            high_price: close,
            low_price: close,
            trade_price: close,
            source_timestamp: open_time_utc.timestamp() * 1000,
            candle_acc_trade_price: Decimal::ZERO,
            candle_acc_trade_volume: Decimal::ZERO,
            is_synthetic: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn chandelle_synthetique_plate_et_marquee() {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 4, 20, 0).unwrap();
        let c = Candle::synthetic("KRW-BTC", Timeframe::M5, t, dec!(61000000.5));
        assert!(c.is_synthetic);
        assert_eq!(c.opening_price, dec!(61000000.5));
        assert_eq!(c.high_price, c.low_price);
        assert_eq!(c.trade_price, c.opening_price);
        assert_eq!(c.candle_acc_trade_volume, Decimal::ZERO);
        assert_eq!(c.candle_acc_trade_price, Decimal::ZERO);
        assert_eq!(c.source_timestamp, t.timestamp() * 1000);
        assert_eq!(c.open_time_kst, "2024-02-01T13:20:00");
    }

    #[test]
    fn serialisation_fidele_au_contrat_amont() {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 4, 20, 0).unwrap();
        let c = Candle::synthetic("KRW-BTC", Timeframe::M5, t, dec!(100));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["candle_date_time_utc"], "2024-02-01T04:20:00");
        assert_eq!(json["market"], "KRW-BTC");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("timeframe").is_none());
    }
}
