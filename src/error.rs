/// Module des erreurs du fournisseur de chandelles
///
/// ARCHITECTURE:
/// Un seul enum pour tout le cœur: chaque variante porte un `kind` lisible
/// par machine (stable, pour les appelants et le monitoring) et un détail
/// lisible par un humain via Display
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Paramètres d'appel invalides; toutes les violations sont listées
    #[error("requête invalide: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    /// Identifiant de timeframe hors de l'ensemble fermé
    #[error("timeframe inconnu: {value}")]
    InvalidTimeframe { value: String },

    /// Timestamp non aligné sur la grille du timeframe
    #[error("timestamp non aligné sur la grille {timeframe}: {timestamp}")]
    UnalignedTimestamp {
        timestamp: DateTime<Utc>,
        timeframe: Timeframe,
    },

    /// Transport ou 5xx côté Upbit (après épuisement des retries internes)
    #[error("API Upbit indisponible: {detail}")]
    UpstreamUnavailable { detail: String },

    /// 429 explicite ou budget du limiteur dépassé
    ///
    /// NOTE: exposé avec le kind `upstream_unavailable` et le code de détail
    /// `rate_limited` pour que l'appelant puisse distinguer les deux cas
    #[error("limite de débit Upbit dépassée: {detail}")]
    UpstreamRateLimited { detail: String },

    /// Erreur d'E/S du stockage SQLite
    #[error("stockage indisponible: {detail}")]
    StorageUnavailable { detail: String },

    /// Une collecte est déjà en cours pour cette paire (symbole, timeframe)
    #[error("collecte déjà en cours pour {market}/{timeframe}")]
    ConcurrentCollectionInProgress { market: String, timeframe: Timeframe },

    /// Délai dépassé ou annulation explicite
    #[error("requête annulée: {detail}")]
    Cancelled { detail: String },
}

impl CoreError {
    /// Identifiant machine stable de la famille d'erreur
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation { .. }
            | CoreError::InvalidTimeframe { .. }
            | CoreError::UnalignedTimestamp { .. } => "validation_error",
            CoreError::UpstreamUnavailable { .. } | CoreError::UpstreamRateLimited { .. } => {
                "upstream_unavailable"
            }
            CoreError::StorageUnavailable { .. } => "storage_unavailable",
            CoreError::ConcurrentCollectionInProgress { .. } => {
                "concurrent_collection_in_progress"
            }
            CoreError::Cancelled { .. } => "cancelled",
        }
    }

    /// Code de détail optionnel, quand la variante en porte un
    pub fn detail_code(&self) -> Option<&'static str> {
        match self {
            CoreError::UpstreamRateLimited { .. } => Some("rate_limited"),
            _ => None,
        }
    }

    /// Vrai pour les conditions amont transitoires (candidates au retry)
    pub fn is_upstream_transient(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable { .. } | CoreError::UpstreamRateLimited { .. }
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::StorageUnavailable {
            detail: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::UpstreamUnavailable {
            detail: e.to_string(),
        }
    }
}
