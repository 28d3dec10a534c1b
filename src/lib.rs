/// Bibliothèque principale du fournisseur de chandelles Upbit
///
/// Cette bibliothèque expose tous les modules nécessaires pour récupérer,
/// stocker et densifier des séries OHLCV depuis Upbit: grille temporelle,
/// dépôt par paire, analyse de chevauchement, détecteur de chandelles vides,
/// processeur de chunks, cache de réponses et façade publique
// Déclaration des modules publics
pub mod cache;
pub mod candle;
pub mod chunk_processor;
pub mod config;
pub mod database;
pub mod empty_candle;
pub mod error;
pub mod fetcher;
pub mod overlap;
pub mod provider;
pub mod repository;
pub mod request;
pub mod timeframe;
pub mod utils;
pub mod verify;
