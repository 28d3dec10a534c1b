/// Module utilitaire pour les fonctions partagées
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Asia::Seoul;

/// Format des timestamps stockés et échangés avec l'API Upbit
/// (ISO-8601 sans fuseau; largeur fixe, donc l'ordre lexicographique
/// des chaînes est l'ordre chronologique)
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Formate un timestamp UTC en format lisible
///
/// EXEMPLE:
/// 2023-11-14T22:13:20Z → "2023-11-14 22:13:20"
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Représentation stockée (TEXT) d'une borne de grille UTC
pub fn stored_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Relit une représentation stockée; None si la chaîne est corrompue
pub fn parse_stored_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Copie d'affichage KST (Asia/Seoul) d'une borne UTC, au format Upbit
pub fn kst_display(t: DateTime<Utc>) -> String {
    t.with_timezone(&Seoul).format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn aller_retour_du_format_stocke() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 5, 0).unwrap();
        assert_eq!(stored_time(t), "2024-01-15T10:05:00");
        assert_eq!(parse_stored_time("2024-01-15T10:05:00"), Some(t));
        assert_eq!(parse_stored_time("pas une date"), None);
    }

    #[test]
    fn copie_kst_a_neuf_heures_d_avance() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(kst_display(t), "2024-01-15T09:00:00");
    }
}
