/// Programme de test pour démontrer la densification par chandelles vides
///
/// Scénario: un chunk 5m de 200 bornes dont l'échange omet deux périodes
/// sans volume; après densification et écriture, la série stockée doit être
/// contiguë, les deux bornes omises synthétiques et plates sur la clôture
/// précédente. Second scénario: plafond synthétique sur un timeframe
/// journalier.
use anyhow::Result;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use upbit_candles_provider::candle::Candle;
use upbit_candles_provider::empty_candle::EmptyCandleDetector;
use upbit_candles_provider::repository::CandleRepository;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::utils;

fn main() -> Result<()> {
    let db_file = "test_empty_candles.db";
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{db_file}{suffix}"));
    }

    println!("=== TEST DE DENSIFICATION PAR CHANDELLES VIDES ===\n");
    let mut failures = 0;

    // ------------------------------------------------------------------
    // Scénario 1: chunk 5m de 200 bornes, deux périodes omises
    // ------------------------------------------------------------------
    let tf = Timeframe::M5;
    let chunk_start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let chunk_end = tf.advance(chunk_start, 199)?;
    let omitted = [
        Utc.with_ymd_and_hms(2024, 2, 1, 4, 20, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 1, 11, 5, 0).unwrap(),
    ];

    println!("Réponse simulée: 198 chandelles réelles sur 200 bornes");
    println!(
        "Bornes omises: {} et {}\n",
        utils::format_timestamp(omitted[0]),
        utils::format_timestamp(omitted[1])
    );

    let mut fetched = Vec::new();
    let mut t = chunk_start;
    let mut price = 61_000_000i64;
    while t <= chunk_end {
        if !omitted.contains(&t) {
            fetched.push(real_candle(tf, t, price));
        }
        price += 1_000;
        t = tf.advance(t, 1)?;
    }
    check(
        &mut failures,
        "la réponse simulée compte 198 chandelles",
        fetched.len() == 198,
    );

    let detector = EmptyCandleDetector::new(30);
    let dense = detector.fill("KRW-BTC", tf, &fetched, chunk_start, chunk_end, None)?;

    let repo = CandleRepository::new(db_file, "KRW-BTC", tf);
    let inserted = repo.save(&dense)?;
    println!("✓ {} lignes écrites dans {}\n", inserted, db_file);

    check(&mut failures, "200 lignes présentes", inserted == 200);
    let stored = repo.read_range(chunk_start, chunk_end, None)?;
    check(&mut failures, "lecture de 200 lignes", stored.len() == 200);

    let mut contiguous = true;
    for pair in stored.windows(2) {
        if tf.advance(pair[0].open_time_utc, 1)? != pair[1].open_time_utc {
            contiguous = false;
        }
    }
    check(&mut failures, "série strictement contiguë sur la grille", contiguous);

    for boundary in omitted {
        let row = stored
            .iter()
            .find(|c| c.open_time_utc == boundary)
            .expect("borne omise absente de la lecture");
        let previous = stored
            .iter()
            .find(|c| c.open_time_utc == tf.step_back(boundary).unwrap())
            .expect("borne précédente absente");
        check(
            &mut failures,
            &format!("{} est synthétique", utils::format_timestamp(boundary)),
            row.is_synthetic,
        );
        check(
            &mut failures,
            "OHLC plat sur la clôture précédente",
            row.opening_price == previous.trade_price
                && row.high_price == previous.trade_price
                && row.low_price == previous.trade_price
                && row.trade_price == previous.trade_price,
        );
        check(
            &mut failures,
            "volumes à zéro",
            row.candle_acc_trade_volume == Decimal::ZERO
                && row.candle_acc_trade_price == Decimal::ZERO,
        );
    }
    check(
        &mut failures,
        "exactement 2 lignes synthétiques",
        stored.iter().filter(|c| c.is_synthetic).count() == 2,
    );

    // ------------------------------------------------------------------
    // Scénario 2: plafond synthétique en journalier
    // ------------------------------------------------------------------
    println!("\n=== PLAFOND SYNTHÉTIQUE (journalier) ===\n");
    let tf = Timeframe::D1;
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let end = tf.advance(start, 40)?;
    // Suspension de cotation: 39 jours sans donnée entre deux réelles
    let fetched = vec![real_candle(tf, start, 1_000), real_candle(tf, end, 2_000)];
    let capped = EmptyCandleDetector::new(30).fill("KRW-BTC", tf, &fetched, start, end, None)?;

    check(
        &mut failures,
        "30 synthétiques au plus entre les deux réelles",
        capped.iter().filter(|c| c.is_synthetic).count() == 30,
    );
    check(&mut failures, "32 lignes au total", capped.len() == 32);

    println!();
    if failures == 0 {
        println!("✓ Test terminé sans échec! Base de données: {}", db_file);
        println!("  Vous pouvez inspecter la base avec: sqlite3 {}", db_file);
        Ok(())
    } else {
        println!("❌ {} vérifications en échec", failures);
        std::process::exit(1);
    }
}

fn real_candle(tf: Timeframe, t: chrono::DateTime<Utc>, price: i64) -> Candle {
    let price = Decimal::from(price);
    Candle {
        market: "KRW-BTC".to_string(),
        timeframe: tf,
        open_time_utc: t,
        open_time_kst: utils::kst_display(t),
        opening_price: price,
        high_price: price + Decimal::from(500),
        low_price: price - Decimal::from(500),
        trade_price: price + Decimal::from(250),
        source_timestamp: t.timestamp() * 1000,
        candle_acc_trade_price: price * Decimal::from(3),
        candle_acc_trade_volume: Decimal::from(3),
        is_synthetic: false,
    }
}

fn check(failures: &mut i32, label: &str, ok: bool) {
    if ok {
        println!("  ✓ {}", label);
    } else {
        *failures += 1;
        println!("  ❌ {}", label);
    }
}
