/// Module de gestion de la base de données SQLite
///
/// ARCHITECTURE:
/// Une table par paire (symbole, timeframe), nommée par une règle
/// déterministe, matérialisée à la première écriture. La structure
/// DatabaseManager encapsule la connexion et l'initialisation du schéma.
use crate::timeframe::Timeframe;
use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;

/// Nom de table déterministe pour une paire (symbole, timeframe)
///
/// RÈGLE: ponctuation du symbole remplacée par des underscores, suffixe
/// timeframe, préfixe `candles_`
///
/// EXEMPLE: ("KRW-BTC", 5m) → "candles_KRW_BTC_5m"
pub fn table_name(market: &str, timeframe: Timeframe) -> String {
    let sanitized: String = market
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("candles_{}_{}", sanitized, timeframe.table_code())
}

/// Gestionnaire de la base de données SQLite
pub struct DatabaseManager {
    conn: Connection,
}

impl DatabaseManager {
    /// Ouvre la connexion et applique les pragmas de concurrence
    ///
    /// WAL: les lecteurs ne sont jamais bloqués par l'écrivain de la paire;
    /// busy_timeout absorbe les verrous courts entre collectes parallèles
    pub fn new(db_file: &str) -> SqlResult<Self> {
        let path = Path::new(db_file);
        let conn = Connection::open(path)?;

        // journal_mode renvoie le mode retenu: on le lit au lieu de l'exécuter
        conn.query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()))?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;

        Ok(DatabaseManager { conn })
    }

    /// Matérialise la table d'une paire si elle n'existe pas encore
    ///
    /// RETOUR: le nom de la table
    pub fn ensure_candles_table(
        &self,
        market: &str,
        timeframe: Timeframe,
    ) -> SqlResult<String> {
        let table = table_name(market, timeframe);

        // Schéma fidèle au contrat amont: les noms de colonnes reprennent
        // les champs Upbit mot pour mot
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    open_time_utc TEXT PRIMARY KEY,
                    market TEXT NOT NULL,
                    open_time_kst TEXT NOT NULL,
                    opening_price REAL NOT NULL,
                    high_price REAL NOT NULL,
                    low_price REAL NOT NULL,
                    trade_price REAL NOT NULL,
                    source_timestamp INTEGER NOT NULL,
                    candle_acc_trade_price REAL NOT NULL,
                    candle_acc_trade_volume REAL NOT NULL,
                    is_synthetic INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                )"
            ),
            [],
        )?;

        // Accélère les parcours descendants (ordre natif de l'échange)
        self.conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_source_ts
                 ON {table} (source_timestamp DESC)"
            ),
            [],
        )?;

        Ok(table)
    }

    /// Liste les tables de chandelles présentes dans le fichier
    pub fn list_candle_tables(&self) -> SqlResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE 'candles_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(names)
    }

    /// Retourne une référence à la connexion SQLite
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Retourne une référence mutable (nécessaire pour les transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nom_de_table_deterministe() {
        assert_eq!(table_name("KRW-BTC", Timeframe::M5), "candles_KRW_BTC_5m");
        assert_eq!(table_name("KRW-BTC", Timeframe::M1), "candles_KRW_BTC_1m");
        // Le mensuel ne doit pas entrer en collision avec 1m (SQLite est
        // insensible à la casse sur les identifiants)
        assert_eq!(table_name("KRW-BTC", Timeframe::Mo1), "candles_KRW_BTC_1mo");
        assert_eq!(table_name("USDT-ETH", Timeframe::D1), "candles_USDT_ETH_1d");
    }
}
