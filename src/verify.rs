// ============================================================================
// MODULE DE VÉRIFICATION DE L'INTÉGRITÉ DES SÉRIES STOCKÉES
// ============================================================================
//
// Vérifie qu'une série (symbole, timeframe) est continue et correctement
// espacée sur sa grille. Il détecte:
// - Les GAPS (trous): bornes de grille manquantes entre deux lignes
// - Les OVERLAPS (anomalies): lignes hors grille ou intervalles trop courts
// - Les statistiques globales: total, part synthétique, plage couverte

use crate::error::CoreError;
use crate::repository::CandleRepository;
use crate::utils;
use chrono::{DateTime, Utc};

/// Bilan d'une vérification d'espacement
#[derive(Debug, Default)]
pub struct SpacingReport {
    pub total: i64,
    pub synthetic: i64,
    /// (borne avant le trou, nombre de bornes manquantes)
    pub gaps: Vec<(DateTime<Utc>, i64)>,
    /// Lignes dont l'espacement est plus court qu'un pas de grille
    pub overlaps: Vec<DateTime<Utc>>,
}

impl SpacingReport {
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.overlaps.is_empty()
    }
}

/// Vérifie l'espacement d'une série et affiche un rapport détaillé
///
/// ALGORITHME:
/// 1. Borne la série (MIN/MAX stockés)
/// 2. Parcourt les lignes séquentiellement en comparant chaque borne à la
///    borne attendue (un pas de grille après la précédente)
/// 3. Classe les anomalies et calcule les statistiques
pub fn verify_data_spacing(repository: &CandleRepository) -> Result<SpacingReport, CoreError> {
    let timeframe = repository.timeframe();
    println!(
        "\n=== Vérification de l'espacement pour {}/{} ===",
        repository.market(),
        timeframe
    );

    let Some((first, last)) = repository.bounds()? else {
        println!("Aucune donnée stockée pour cette paire.");
        return Ok(SpacingReport::default());
    };

    let candles = repository.read_range(first, last, None)?;
    let mut report = SpacingReport {
        total: candles.len() as i64,
        ..SpacingReport::default()
    };

    let mut previous: Option<DateTime<Utc>> = None;
    for candle in &candles {
        if candle.is_synthetic {
            report.synthetic += 1;
        }
        if let Some(prev) = previous {
            let expected = timeframe.advance(prev, 1)?;
            if candle.open_time_utc > expected {
                let missing = timeframe.count_between(prev, candle.open_time_utc)? - 2;
                report.gaps.push((prev, missing));
            } else if candle.open_time_utc < expected {
                report.overlaps.push(candle.open_time_utc);
            }
        }
        previous = Some(candle.open_time_utc);
    }

    println!("\n--- Statistiques ---");
    println!("Nombre total de chandelles: {}", report.total);
    println!(
        "Dont synthétiques: {} ({:.1} %)",
        report.synthetic,
        if report.total > 0 {
            report.synthetic as f64 * 100.0 / report.total as f64
        } else {
            0.0
        }
    );
    println!("Première chandelle: {}", utils::format_timestamp(first));
    println!("Dernière chandelle: {}", utils::format_timestamp(last));
    let expected_count = timeframe.count_between(first, last)?;
    println!("Nombre de bornes attendu: {expected_count}");
    println!("Différence: {}", report.total - expected_count);

    if report.gaps.is_empty() {
        println!("\n✓ Aucun gap détecté - la série est continue!");
    } else {
        println!("\n--- GAPS DÉTECTÉS ({} gaps) ---", report.gaps.len());
        for (i, (boundary, missing)) in report.gaps.iter().enumerate() {
            if i < 10 {
                println!(
                    "  Gap après {}: {} bornes manquantes",
                    utils::format_timestamp(*boundary),
                    missing
                );
            }
        }
        if report.gaps.len() > 10 {
            println!("  ... et {} autres gaps", report.gaps.len() - 10);
        }
    }

    if report.overlaps.is_empty() {
        println!("✓ Aucune anomalie d'espacement!");
    } else {
        println!(
            "--- ANOMALIES D'ESPACEMENT ({}) ---",
            report.overlaps.len()
        );
        for (i, boundary) in report.overlaps.iter().enumerate() {
            if i < 10 {
                println!("  Ligne hors grille à {}", utils::format_timestamp(*boundary));
            }
        }
    }

    println!("\n{:=<60}\n", "");
    Ok(report)
}
