/// Vérification autonome de l'intégrité d'un fichier de chandelles
///
/// Contrôle l'espacement et la part synthétique d'une ou plusieurs séries
/// stockées, sans aucune récupération réseau.
use anyhow::Result;
use clap::Parser;
use upbit_candles_provider::repository::CandleRepository;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::verify;

#[derive(Parser, Debug)]
#[command(author, version, about = "Vérifie l'espacement des séries stockées", long_about = None)]
struct Args {
    /// Le symbole de marché à vérifier (ex: KRW-BTC)
    #[arg(short, long)]
    symbol: String,

    /// Timeframes à vérifier, séparés par des virgules
    #[arg(short, long, default_value = "5m,15m,60m,1d")]
    timeframes: String,

    /// Fichier SQLite de stockage
    #[arg(long, default_value = "candles.db")]
    db_file: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let symbol = args.symbol.to_uppercase();
    let mut dirty = 0;

    for tf in args.timeframes.split(',').map(str::trim).filter(|tf| !tf.is_empty()) {
        let timeframe: Timeframe = match tf.parse() {
            Ok(timeframe) => timeframe,
            Err(e) => {
                eprintln!("⚠ {tf} ignoré: {e}");
                continue;
            }
        };
        let repository = CandleRepository::new(&args.db_file, &symbol, timeframe);
        match verify::verify_data_spacing(&repository) {
            Ok(report) if !report.is_clean() => dirty += 1,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Erreur lors de la vérification pour {tf}: {e}");
                dirty += 1;
            }
        }
    }

    if dirty > 0 {
        anyhow::bail!("{dirty} série(s) avec anomalies");
    }
    Ok(())
}
