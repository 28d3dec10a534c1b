/// Module du détecteur de chandelles vides
///
/// L'échange omet les périodes sans volume: entre la réponse amont brute et
/// le dépôt, ce module densifie la séquence en insérant une ligne
/// synthétique pour chaque borne de grille manquante. OHLC = dernière
/// clôture réelle vue (ou l'ouverture réelle suivante si aucune clôture
/// n'est encore connue), volumes à zéro, `is_synthetic = true`.
///
/// POLITIQUE DE PLAFOND:
/// Intrajournalier: pas de limite. Journalier et au-delà: au plus
/// `synthetic_cap` lignes synthétiques consécutives entre deux réelles,
/// pour qu'une suspension de cotation ne fasse pas grossir la série sans
/// fin. Plafond atteint → le trou reste un vrai trou, et la continuité du
/// dépôt s'y arrête.
use crate::candle::Candle;
use crate::error::CoreError;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Détecteur de chandelles vides
#[derive(Debug, Clone)]
pub struct EmptyCandleDetector {
    synthetic_cap: i64,
}

impl EmptyCandleDetector {
    /// `synthetic_cap` ne s'applique qu'aux timeframes journaliers et au-delà
    pub fn new(synthetic_cap: i64) -> Self {
        EmptyCandleDetector { synthetic_cap }
    }

    /// Densifie une réponse amont sur la grille attendue [chunk_start, chunk_end]
    ///
    /// PARAMÈTRES:
    /// - fetched: chandelles réelles, triées par `open_time_utc` ascendant
    /// - previous_close: dernière clôture réelle déjà stockée avant le chunk
    ///
    /// Sans `previous_close` et quand la réponse commence après chunk_start,
    /// les bornes de tête ne sont PAS synthétisées: l'historique de l'échange
    /// commence là, il ne faut pas fabriquer d'avant-cotation.
    ///
    /// RETOUR: la séquence dense, ascendante; vide si fetched est vide
    pub fn fill(
        &self,
        market: &str,
        timeframe: Timeframe,
        fetched: &[Candle],
        chunk_start: DateTime<Utc>,
        chunk_end: DateTime<Utc>,
        previous_close: Option<Decimal>,
    ) -> Result<Vec<Candle>, CoreError> {
        if fetched.is_empty() {
            return Ok(Vec::new());
        }

        let effective_start = match previous_close {
            Some(_) => chunk_start,
            None => fetched[0].open_time_utc.max(chunk_start),
        };
        let cap = timeframe.is_daily_or_above().then_some(self.synthetic_cap);

        let mut dense = Vec::new();
        let mut last_close = previous_close;
        let mut consecutive_synthetic = 0i64;
        // Curseur sur la réponse réelle (les deux parcours sont ascendants)
        let mut next_real = 0usize;

        for boundary in timeframe.enumerate(effective_start, chunk_end)? {
            while next_real < fetched.len() && fetched[next_real].open_time_utc < boundary {
                next_real += 1;
            }

            if next_real < fetched.len() && fetched[next_real].open_time_utc == boundary {
                let candle = &fetched[next_real];
                last_close = Some(candle.trade_price);
                consecutive_synthetic = 0;
                dense.push(candle.clone());
                next_real += 1;
                continue;
            }

            if cap.is_some_and(|cap| consecutive_synthetic >= cap) {
                continue;
            }

            // Toujours Some ici: la grille effective commence soit après une
            // clôture déjà stockée, soit sur la première chandelle réelle
            if let Some(close) = last_close {
                dense.push(Candle::synthetic(market, timeframe, boundary, close));
                consecutive_synthetic += 1;
            }
        }

        Ok(dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn real(t: DateTime<Utc>, open: Decimal, close: Decimal) -> Candle {
        Candle {
            market: "KRW-BTC".to_string(),
            timeframe: Timeframe::M5,
            open_time_utc: t,
            open_time_kst: crate::utils::kst_display(t),
            opening_price: open,
            high_price: close.max(open),
            low_price: close.min(open),
            trade_price: close,
            source_timestamp: t.timestamp() * 1000,
            candle_acc_trade_price: dec!(1000),
            candle_acc_trade_volume: dec!(2),
            is_synthetic: false,
        }
    }

    #[test]
    fn trous_interieurs_combles_a_la_cloture_precedente() {
        let detector = EmptyCandleDetector::new(30);
        let start = utc(2024, 2, 1, 0, 0, 0);
        let tf = Timeframe::M5;
        // Grille de 8 bornes, 04:20-like: bornes 2 et 5 omises
        let mut fetched = Vec::new();
        for i in [0i64, 1, 3, 4, 6, 7] {
            let t = tf.advance(start, i).unwrap();
            fetched.push(real(t, dec!(100) + Decimal::from(i), dec!(110) + Decimal::from(i)));
        }
        let end = tf.advance(start, 7).unwrap();

        let dense = detector
            .fill("KRW-BTC", tf, &fetched, start, end, Some(dec!(95)))
            .unwrap();

        assert_eq!(dense.len(), 8);
        // Contiguïté stricte sur la grille
        for pair in dense.windows(2) {
            assert_eq!(
                tf.advance(pair[0].open_time_utc, 1).unwrap(),
                pair[1].open_time_utc
            );
        }
        let missing_a = &dense[2];
        assert!(missing_a.is_synthetic);
        // OHLC plat à la clôture de la borne 1
        assert_eq!(missing_a.trade_price, dec!(111));
        assert_eq!(missing_a.opening_price, dec!(111));
        assert_eq!(missing_a.candle_acc_trade_volume, Decimal::ZERO);
        assert_eq!(
            missing_a.source_timestamp,
            missing_a.open_time_utc.timestamp() * 1000
        );
        let missing_b = &dense[5];
        assert!(missing_b.is_synthetic);
        assert_eq!(missing_b.trade_price, dec!(114));
    }

    #[test]
    fn tete_de_chunk_comblee_avec_la_cloture_du_depot() {
        let detector = EmptyCandleDetector::new(30);
        let start = utc(2024, 2, 1, 0, 0, 0);
        let tf = Timeframe::M5;
        // La réponse ne commence qu'à la 3e borne
        let fetched = vec![real(tf.advance(start, 2).unwrap(), dec!(100), dec!(101))];

        let dense = detector
            .fill(
                "KRW-BTC",
                tf,
                &fetched,
                start,
                tf.advance(start, 2).unwrap(),
                Some(dec!(95)),
            )
            .unwrap();

        assert_eq!(dense.len(), 3);
        assert!(dense[0].is_synthetic);
        assert_eq!(dense[0].trade_price, dec!(95));
        assert!(dense[1].is_synthetic);
        assert!(!dense[2].is_synthetic);
    }

    #[test]
    fn sans_cloture_prealable_pas_de_fabrication_d_avant_cotation() {
        let detector = EmptyCandleDetector::new(30);
        let start = utc(2024, 2, 1, 0, 0, 0);
        let tf = Timeframe::M5;
        let listing = tf.advance(start, 5).unwrap();
        let fetched = vec![
            real(listing, dec!(100), dec!(101)),
            real(tf.advance(listing, 1).unwrap(), dec!(101), dec!(102)),
        ];
        let end = tf.advance(listing, 1).unwrap();

        let dense = detector
            .fill("KRW-BTC", tf, &fetched, start, end, None)
            .unwrap();

        // Rien avant la première chandelle réelle
        assert_eq!(dense.len(), 2);
        assert_eq!(dense[0].open_time_utc, listing);
    }

    #[test]
    fn les_trous_successifs_portent_la_meme_cloture() {
        let detector = EmptyCandleDetector::new(30);
        let start = utc(2024, 2, 1, 0, 0, 0);
        let tf = Timeframe::M5;
        // Réelles aux bornes 0 et 1, trou sur 2..=4, réelle à la borne 5
        let mut fetched = vec![
            real(start, dec!(100), dec!(101)),
            real(tf.advance(start, 1).unwrap(), dec!(101), dec!(102)),
        ];
        fetched.push(real(tf.advance(start, 5).unwrap(), dec!(110), dec!(111)));
        let end = tf.advance(start, 5).unwrap();

        let dense = detector
            .fill("KRW-BTC", tf, &fetched, start, end, None)
            .unwrap();

        assert_eq!(dense.len(), 6);
        for candle in &dense[2..=4] {
            assert!(candle.is_synthetic);
            assert_eq!(candle.trade_price, dec!(102));
        }
    }

    #[test]
    fn plafond_journalier_laisse_un_vrai_trou() {
        let detector = EmptyCandleDetector::new(3);
        let tf = Timeframe::D1;
        let start = utc(2024, 1, 1, 0, 0, 0);
        // Réelle au jour 0, trou de 9 jours, réelle au jour 10
        let fetched = vec![
            real_daily(start, dec!(100), dec!(101)),
            real_daily(tf.advance(start, 10).unwrap(), dec!(120), dec!(121)),
        ];
        let end = tf.advance(start, 10).unwrap();

        let dense = detector
            .fill("KRW-BTC", tf, &fetched, start, end, None)
            .unwrap();

        // 2 réelles + 3 synthétiques plafonnées
        assert_eq!(dense.len(), 5);
        let synthetic_count = dense.iter().filter(|c| c.is_synthetic).count();
        assert_eq!(synthetic_count, 3);
        // Les synthétiques suivent immédiatement la première réelle
        assert!(dense[1].is_synthetic && dense[2].is_synthetic && dense[3].is_synthetic);
        assert_eq!(dense[4].open_time_utc, end);
        // Le compteur repart après une réelle: pas de plafond intrajournalier
        let intraday = EmptyCandleDetector::new(3);
        let m5_fetched = vec![
            real(utc(2024, 1, 1, 0, 0, 0), dec!(1), dec!(2)),
            real(utc(2024, 1, 1, 1, 0, 0), dec!(3), dec!(4)),
        ];
        let m5_dense = intraday
            .fill(
                "KRW-BTC",
                Timeframe::M5,
                &m5_fetched,
                utc(2024, 1, 1, 0, 0, 0),
                utc(2024, 1, 1, 1, 0, 0),
                None,
            )
            .unwrap();
        assert_eq!(m5_dense.len(), 13);
    }

    fn real_daily(t: DateTime<Utc>, open: Decimal, close: Decimal) -> Candle {
        let mut candle = real(t, open, close);
        candle.timeframe = Timeframe::D1;
        candle
    }

    #[test]
    fn reponse_vide_sequence_vide() {
        let detector = EmptyCandleDetector::new(30);
        let dense = detector
            .fill(
                "KRW-BTC",
                Timeframe::M5,
                &[],
                utc(2024, 1, 1, 0, 0, 0),
                utc(2024, 1, 1, 1, 0, 0),
                Some(dec!(100)),
            )
            .unwrap();
        assert!(dense.is_empty());
    }
}
