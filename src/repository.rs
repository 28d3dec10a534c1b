/// Module du dépôt de chandelles par paire (symbole, timeframe)
///
/// ARCHITECTURE:
/// Un handle léger et clonable (chemin du fichier + paire) qui ouvre sa
/// connexion à chaque opération: c'est ce qui permet de déporter les appels
/// bloquants rusqlite dans des tâches `spawn_blocking` sans partager de
/// connexion entre threads. L'écrivain d'une paire est sérialisé par le
/// coordinateur de collecte; les lecteurs passent par WAL.
///
/// Le dépôt n'interprète jamais les valeurs OHLC et ne récupère jamais de
/// données lui-même: insertion idempotente, lectures ordonnées et prédicats
/// de couverture/continuité, rien d'autre.
use crate::candle::Candle;
use crate::database::{DatabaseManager, table_name};
use crate::error::CoreError;
use crate::timeframe::Timeframe;
use crate::utils;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Dépôt d'une paire (symbole, timeframe)
#[derive(Debug, Clone)]
pub struct CandleRepository {
    db_file: String,
    market: String,
    timeframe: Timeframe,
    table: String,
}

impl CandleRepository {
    pub fn new(db_file: &str, market: &str, timeframe: Timeframe) -> Self {
        CandleRepository {
            db_file: db_file.to_string(),
            market: market.to_string(),
            timeframe,
            table: table_name(market, timeframe),
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Ouvre une connexion et matérialise la table si besoin
    fn open(&self) -> Result<DatabaseManager, CoreError> {
        let db = DatabaseManager::new(&self.db_file)?;
        db.ensure_candles_table(&self.market, self.timeframe)?;
        Ok(db)
    }

    /// Insertion idempotente d'un lot de chandelles
    ///
    /// Les chandelles déjà présentes (même `open_time_utc`) sont ignorées,
    /// jamais écrasées. Les bornes plus récentes que l'horloge alignée sont
    /// refusées (invariant: pas d'écriture dans le futur).
    ///
    /// RETOUR: nombre de lignes réellement insérées (pas les doublons)
    pub fn save(&self, candles: &[Candle]) -> Result<i64, CoreError> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut db = self.open()?;
        let ceiling = self.timeframe.align_down(Utc::now());
        let created_at = utils::stored_time(Utc::now());

        let tx = db.connection_mut().transaction()?;
        let mut inserted = 0i64;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (
                    open_time_utc, market, open_time_kst,
                    opening_price, high_price, low_price, trade_price,
                    source_timestamp, candle_acc_trade_price,
                    candle_acc_trade_volume, is_synthetic, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                self.table
            ))?;

            for candle in candles {
                if candle.open_time_utc > ceiling {
                    continue;
                }
                let changes = stmt.execute(params![
                    utils::stored_time(candle.open_time_utc),
                    candle.market,
                    candle.open_time_kst,
                    candle.opening_price.to_f64().unwrap_or(0.0),
                    candle.high_price.to_f64().unwrap_or(0.0),
                    candle.low_price.to_f64().unwrap_or(0.0),
                    candle.trade_price.to_f64().unwrap_or(0.0),
                    candle.source_timestamp,
                    candle.candle_acc_trade_price.to_f64().unwrap_or(0.0),
                    candle.candle_acc_trade_volume.to_f64().unwrap_or(0.0),
                    candle.is_synthetic,
                    created_at,
                ])?;
                if changes > 0 {
                    inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Lecture ordonnée (ascendante) de l'intervalle fermé [start, end]
    pub fn read_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>, CoreError> {
        let db = self.open()?;
        let mut sql = format!(
            "SELECT open_time_utc, market, open_time_kst,
                    opening_price, high_price, low_price, trade_price,
                    source_timestamp, candle_acc_trade_price,
                    candle_acc_trade_volume, is_synthetic
             FROM {}
             WHERE open_time_utc >= ?1 AND open_time_utc <= ?2
             ORDER BY open_time_utc ASC",
            self.table
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let mut stmt = db.connection().prepare(&sql)?;
        let timeframe = self.timeframe;
        let candles = stmt
            .query_map(
                params![utils::stored_time(start), utils::stored_time(end)],
                |row| {
                    let stored: String = row.get(0)?;
                    Ok(Candle {
                        // Les lignes sont écrites par ce module; une date
                        // illisible se réduit à l'epoch plutôt que de casser
                        // toute la lecture
                        open_time_utc: utils::parse_stored_time(&stored)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        market: row.get(1)?,
                        open_time_kst: row.get(2)?,
                        timeframe,
                        opening_price: decimal_from(row.get(3)?),
                        high_price: decimal_from(row.get(4)?),
                        low_price: decimal_from(row.get(5)?),
                        trade_price: decimal_from(row.get(6)?),
                        source_timestamp: row.get(7)?,
                        candle_acc_trade_price: decimal_from(row.get(8)?),
                        candle_acc_trade_volume: decimal_from(row.get(9)?),
                        is_synthetic: row.get(10)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(candles)
    }

    /// Une chandelle existe-t-elle exactement à cette borne?
    pub fn has_data_at(&self, t: DateTime<Utc>) -> Result<bool, CoreError> {
        let db = self.open()?;
        let found: Option<i64> = db
            .connection()
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE open_time_utc = ?1 LIMIT 1",
                    self.table
                ),
                params![utils::stored_time(t)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Au moins une ligne dans [start, end]?
    pub fn has_any_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        Ok(self.find_data_start_in_range(start, end)?.is_some())
    }

    /// Nombre de lignes dans [start, end]
    pub fn count_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let db = self.open()?;
        let count: i64 = db.connection().query_row(
            &format!(
                "SELECT COUNT(*) FROM {}
                 WHERE open_time_utc >= ?1 AND open_time_utc <= ?2",
                self.table
            ),
            params![utils::stored_time(start), utils::stored_time(end)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Couverture complète: autant de lignes que de bornes attendues
    /// (permet au classifieur de conclure sans lire les lignes)
    pub fn is_range_complete(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        expected_count: i64,
    ) -> Result<bool, CoreError> {
        Ok(self.count_in_range(start, end)? == expected_count)
    }

    /// Plus petite borne présente dans [start, end]
    pub fn find_data_start_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        self.boundary_in_range(start, end, "MIN")
    }

    /// Plus grande borne présente dans [start, end]
    pub fn find_data_end_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        self.boundary_in_range(start, end, "MAX")
    }

    fn boundary_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        aggregate: &str,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let db = self.open()?;
        let stored: Option<String> = db.connection().query_row(
            &format!(
                "SELECT {aggregate}(open_time_utc) FROM {}
                 WHERE open_time_utc >= ?1 AND open_time_utc <= ?2",
                self.table
            ),
            params![utils::stored_time(start), utils::stored_time(end)],
            |row| row.get(0),
        )?;
        Ok(stored.as_deref().and_then(utils::parse_stored_time))
    }

    /// Plus grande borne t* telle que toutes les bornes de [start, t*] sont
    /// présentes; None si start lui-même est absent
    ///
    /// ALGORITHME:
    /// Lecture ascendante depuis start, puis marche le long de la grille en
    /// mémoire jusqu'au premier trou. Les lignes synthétiques comptent comme
    /// présentes: la continuité reflète ce que `save` a persisté.
    pub fn find_last_continuous_time_from(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let db = self.open()?;
        let mut stmt = db.connection().prepare(&format!(
            "SELECT open_time_utc FROM {}
             WHERE open_time_utc >= ?1
             ORDER BY open_time_utc ASC",
            self.table
        ))?;
        let stored = stmt
            .query_map(params![utils::stored_time(start)], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut last: Option<DateTime<Utc>> = None;
        let mut expected = start;
        for s in &stored {
            match utils::parse_stored_time(s) {
                Some(t) if t == expected => {
                    last = Some(t);
                    expected = self.timeframe.advance(t, 1)?;
                }
                _ => break,
            }
        }
        Ok(last)
    }

    /// Dernière clôture RÉELLE strictement antérieure à t
    /// (les lignes synthétiques sont ignorées: leur clôture n'est qu'une
    /// copie portée)
    pub fn last_close_before(&self, t: DateTime<Utc>) -> Result<Option<Decimal>, CoreError> {
        let db = self.open()?;
        let close: Option<f64> = db
            .connection()
            .query_row(
                &format!(
                    "SELECT trade_price FROM {}
                     WHERE open_time_utc < ?1 AND is_synthetic = 0
                     ORDER BY open_time_utc DESC LIMIT 1",
                    self.table
                ),
                params![utils::stored_time(t)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(close.map(decimal_from))
    }

    /// Bornes extrêmes de la série stockée (None si la table est vide)
    pub fn bounds(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, CoreError> {
        let db = self.open()?;
        let pair: (Option<String>, Option<String>) = db.connection().query_row(
            &format!(
                "SELECT MIN(open_time_utc), MAX(open_time_utc) FROM {}",
                self.table
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match pair {
            (Some(min), Some(max)) => Ok(utils::parse_stored_time(&min)
                .zip(utils::parse_stored_time(&max))),
            _ => Ok(None),
        }
    }
}

/// REAL (f64) du stockage → décimal; zéro si la valeur est inexploitable
fn decimal_from(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}
