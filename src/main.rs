// ============================================================================
// COLLECTEUR DE CHANDELLES UPBIT — BINAIRE PRINCIPAL
// ============================================================================
//
// Collecte les chandelles demandées pour un symbole, tous timeframes en
// parallèle (une collecte par paire au maximum, le coordinateur s'en assure),
// puis affiche un bilan par timeframe. --dry-run planifie sans rien écrire,
// --verify contrôle l'espacement des séries après la collecte.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use futures_util::future;
use std::sync::Arc;

use upbit_candles_provider::config::ProviderConfig;
use upbit_candles_provider::provider::{CandleProvider, CandleResponse};
use upbit_candles_provider::request::CandleRequest;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::verify;

/// Arguments CLI du collecteur
#[derive(Parser, Debug)]
#[command(author, version, about = "Collecteur de chandelles Upbit", long_about = None)]
struct Args {
    /// Le symbole de marché à collecter (ex: KRW-BTC)
    #[arg(short, long)]
    symbol: String,

    /// Timeframes à collecter, séparés par des virgules (ex: 5m,15m,1d)
    #[arg(short, long, default_value = "5m,15m,60m,1d")]
    timeframes: String,

    /// Nombre de chandelles à collecter par timeframe
    #[arg(short = 'n', long, default_value_t = 200)]
    count: i64,

    /// Optionnel: début de fenêtre au format YYYY-MM-DD (avec --end-date)
    #[arg(long)]
    start_date: Option<String>,

    /// Optionnel: fin de fenêtre au format YYYY-MM-DD
    #[arg(long)]
    end_date: Option<String>,

    /// Fichier SQLite de stockage
    #[arg(long, default_value = "candles.db")]
    db_file: String,

    /// Planifier et annoncer les chunks sans récupérer ni écrire
    #[arg(long)]
    dry_run: bool,

    /// Vérifier l'espacement des données après la récupération
    #[arg(short = 'v', long)]
    verify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let symbol = args.symbol.to_uppercase();

    println!("🔄 Démarrage de la collecte pour: {}", symbol);

    let config = ProviderConfig {
        db_file: args.db_file.clone(),
        ..ProviderConfig::default()
    };
    let provider = Arc::new(CandleProvider::new(config)?);
    println!("  ✓ Base de données: {}", args.db_file);

    let timeframes: Vec<String> = args
        .timeframes
        .split(',')
        .map(|tf| tf.trim().to_string())
        .filter(|tf| !tf.is_empty())
        .collect();

    let window = match (&args.start_date, &args.end_date) {
        (Some(start), Some(end)) => Some((parse_date(start)?, parse_date(end)?)),
        (None, None) => None,
        _ => anyhow::bail!("--start-date et --end-date vont ensemble"),
    };

    if args.dry_run {
        println!("  ═══ Mode plan (aucune récupération, aucune écriture) ═══");
        for tf in &timeframes {
            let request = build_request(&symbol, tf, args.count, window);
            match provider.plan_collection(&request).await {
                Ok(plan) => println!(
                    "    ✓ {} : {} chunks à récupérer, {} déjà couverts",
                    tf, plan.chunks_fetched, plan.chunks_from_db
                ),
                Err(e) => eprintln!("    ⚠ {} : {}", tf, e),
            }
        }
        return Ok(());
    }

    // Une tâche par timeframe: les paires sont indépendantes et le
    // coordinateur garantit une seule collecte par paire
    let mut tasks = Vec::new();
    for tf in timeframes.clone() {
        let provider = Arc::clone(&provider);
        let request = build_request(&symbol, &tf, args.count, window);
        tasks.push(tokio::spawn(async move {
            let response = provider.get_candles(&request).await;
            (tf, response)
        }));
    }

    let results = future::join_all(tasks).await;
    let mut had_error = false;

    for result in results {
        match result {
            Ok((tf, response)) => report_timeframe(&tf, &response, &mut had_error),
            Err(e) => {
                had_error = true;
                eprintln!("    ⚠ Erreur de tâche: {}", e);
            }
        }
    }

    if args.verify {
        println!("\n========================================");
        println!("VÉRIFICATION DE L'ESPACEMENT DES DONNÉES");
        println!("========================================");
        for tf in &timeframes {
            match tf.parse::<Timeframe>() {
                Ok(timeframe) => {
                    let repository = provider.repository(&symbol, timeframe);
                    if let Err(e) = verify::verify_data_spacing(&repository) {
                        eprintln!("Erreur lors de la vérification pour {}: {}", tf, e);
                    }
                }
                Err(e) => eprintln!("Timeframe ignoré pour la vérification: {}", e),
            }
        }
    }

    if had_error {
        anyhow::bail!("au moins un timeframe a échoué");
    }
    println!("✅ Collecte terminée pour {}", symbol);
    Ok(())
}

fn report_timeframe(tf: &str, response: &CandleResponse, had_error: &mut bool) {
    if response.success {
        println!(
            "    ✓ {} : {} chandelles (source: {}, {} ms){}",
            tf,
            response.total_count,
            response.source,
            response.response_time_ms,
            if response.exhausted {
                " 🏁 historique épuisé"
            } else {
                ""
            }
        );
    } else {
        *had_error = true;
        let detail = response
            .error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind, e.detail))
            .unwrap_or_else(|| "erreur inconnue".to_string());
        let partial = response
            .partial
            .as_ref()
            .map(|candles| format!(" ({} chandelles partielles)", candles.len()))
            .unwrap_or_default();
        eprintln!("    ⚠ {} : {}{}", tf, detail, partial);
    }
}

fn build_request(
    symbol: &str,
    timeframe: &str,
    count: i64,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> CandleRequest {
    match window {
        Some((start, end)) => CandleRequest::window(symbol, timeframe, start, end),
        None => CandleRequest::latest(symbol, timeframe, count),
    }
}

/// Parse une date au format YYYY-MM-DD en minuit UTC
fn parse_date(date: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(
        &(date.to_string() + " 00:00:00"),
        "%Y-%m-%d %H:%M:%S",
    )?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
