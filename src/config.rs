/// Module de configuration du fournisseur
///
/// Regroupe tous les réglages du cœur avec leurs valeurs par défaut
/// (plafond d'échange, TTL du cache, budget de débit, retries, délais).
/// Le binaire CLI surcharge les champs depuis ses arguments.

/// URL de base de l'API publique Upbit
pub const UPBIT_BASE_URL: &str = "https://api.upbit.com";

/// Configuration du fournisseur de chandelles
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Fichier SQLite hébergeant les tables par (symbole, timeframe)
    pub db_file: String,
    /// URL de base de l'API amont
    pub base_url: String,
    /// Taille maximale d'un chunk (plafond par appel de l'échange)
    pub chunk_size: i64,
    /// TTL des entrées du cache de réponses, en secondes
    pub cache_ttl_seconds: u64,
    /// Nombre maximal d'entrées du cache
    pub cache_max_entries: u64,
    /// Budget du limiteur de débit amont (jetons par minute)
    pub rate_limit_tokens_per_minute: u32,
    /// Plafond de lignes synthétiques consécutives pour journalier et au-delà
    /// (les timeframes intrajournaliers ne sont pas plafonnés)
    pub synthetic_cap_daily_and_above: i64,
    /// Nombre maximal de tentatives amont par chunk
    pub chunk_retry_max: u32,
    /// Délai de base du backoff exponentiel entre tentatives, en ms
    pub chunk_retry_base_delay_ms: u64,
    /// Budget de délai par tranche de 1000 chandelles demandées, en ms
    pub per_request_deadline_ms_per_1000_candles: i64,
    /// Timeout du client HTTP, en secondes
    pub http_timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            db_file: "candles.db".to_string(),
            base_url: UPBIT_BASE_URL.to_string(),
            chunk_size: 200,
            cache_ttl_seconds: 60,
            cache_max_entries: 1_000,
            rate_limit_tokens_per_minute: 600,
            synthetic_cap_daily_and_above: 30,
            chunk_retry_max: 3,
            chunk_retry_base_delay_ms: 1_000,
            per_request_deadline_ms_per_1000_candles: 30_000,
            http_timeout_seconds: 30,
        }
    }
}
