/// Module d'analyse de chevauchement
///
/// ARCHITECTURE:
/// Le classifieur compare un intervalle cible [target_start, target_end]
/// avec la couverture déjà stockée et décide du sous-intervalle minimal à
/// récupérer en amont. Il ne fait aucune E/S au-delà des prédicats du dépôt
/// et ne modifie aucun état.
///
/// Seul PARTIAL_START restreint la plage de récupération: un bloc continu
/// colle au bord récent de l'intervalle, il ne manque que la portion
/// ancienne. Les blocs du milieu ne valent pas la peine d'être découpés:
/// relire des lignes déjà stockées coûte moins cher que de suivre deux
/// sous-plages de récupération, et `save` déduplique de toute façon.
use crate::error::CoreError;
use crate::repository::CandleRepository;
use chrono::{DateTime, Utc};

/// Les cinq états de chevauchement possibles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapState {
    /// Aucune ligne présente dans l'intervalle
    NoOverlap,
    /// Toutes les bornes attendues sont présentes
    CompleteOverlap,
    /// Données continues d'un point intérieur jusqu'à target_end;
    /// seule la portion ancienne manque
    PartialStart,
    /// Un bloc contigu au milieu, qui ne touche aucun des deux bords
    PartialMiddleContinuous,
    /// Lignes éparses, aucun bloc exploitable
    PartialMiddleFragment,
}

/// Intervalle cible soumis au classifieur
#[derive(Debug, Clone)]
pub struct OverlapRequest {
    pub target_start: DateTime<Utc>,
    pub target_end: DateTime<Utc>,
    /// Nombre de bornes de grille attendu dans l'intervalle
    pub expected_count: i64,
}

/// Verdict du classifieur
#[derive(Debug, Clone)]
pub struct OverlapResult {
    pub state: OverlapState,
    /// Plage concrète à récupérer (None si aucune récupération n'est utile)
    pub fetch_from: Option<DateTime<Utc>>,
    pub fetch_to: Option<DateTime<Utc>>,
    pub fetch_count: i64,
}

impl OverlapResult {
    fn no_fetch(state: OverlapState) -> Self {
        OverlapResult {
            state,
            fetch_from: None,
            fetch_to: None,
            fetch_count: 0,
        }
    }

    fn fetch(
        state: OverlapState,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        count: i64,
    ) -> Self {
        OverlapResult {
            state,
            fetch_from: Some(from),
            fetch_to: Some(to),
            fetch_count: count,
        }
    }

    /// Une récupération amont est-elle nécessaire?
    pub fn needs_fetch(&self) -> bool {
        self.fetch_from.is_some()
    }
}

/// Classifieur de chevauchement
pub struct OverlapAnalyzer;

impl OverlapAnalyzer {
    /// Classe l'intervalle cible contre la couverture stockée
    ///
    /// ALGORITHME (ordre pensé pour terminer tôt):
    /// 1. Rien dans l'intervalle → NO_OVERLAP, tout récupérer
    /// 2. Autant de lignes que de bornes attendues → COMPLETE_OVERLAP
    /// 3. Le bord récent est présent et le bloc qui commence à la première
    ///    borne stockée atteint target_end → PARTIAL_START, ne récupérer
    ///    que [target_start, début du bloc - 1 pas]
    /// 4. Sinon, bloc intérieur: continu → PARTIAL_MIDDLE_CONTINUOUS,
    ///    épars → PARTIAL_MIDDLE_FRAGMENT; les deux récupèrent tout
    pub fn analyze(
        repository: &CandleRepository,
        request: &OverlapRequest,
    ) -> Result<OverlapResult, CoreError> {
        let timeframe = repository.timeframe();
        let (start, end) = (request.target_start, request.target_end);

        if !repository.has_any_in_range(start, end)? {
            return Ok(OverlapResult::fetch(
                OverlapState::NoOverlap,
                start,
                end,
                request.expected_count,
            ));
        }

        if repository.is_range_complete(start, end, request.expected_count)? {
            return Ok(OverlapResult::no_fetch(OverlapState::CompleteOverlap));
        }

        // Première borne présente: point d'ancrage intérieur du bloc
        let data_start = match repository.find_data_start_in_range(start, end)? {
            Some(t) => t,
            // has_any_in_range a dit vrai: une ligne a disparu entre les deux
            // prédicats, on retombe sur la récupération complète
            None => {
                return Ok(OverlapResult::fetch(
                    OverlapState::NoOverlap,
                    start,
                    end,
                    request.expected_count,
                ));
            }
        };
        let continuous_until = repository.find_last_continuous_time_from(data_start)?;

        if repository.has_data_at(end)? {
            // L'intervalle serait complet si le bloc touchait target_start:
            // ce cas est déjà sorti à l'étape 2. Ici le bloc commence donc
            // strictement à l'intérieur.
            if continuous_until.is_some_and(|t| t >= end) {
                let fetch_to = timeframe.step_back(data_start)?;
                let fetch_count = timeframe.count_between(start, fetch_to)?;
                return Ok(OverlapResult::fetch(
                    OverlapState::PartialStart,
                    start,
                    fetch_to,
                    fetch_count,
                ));
            }
        }

        // Bord ancien: le bloc commence-t-il à l'intérieur et couvre-t-il
        // d'une traite tout ce qui est stocké dans l'intervalle?
        let data_end = repository
            .find_data_end_in_range(start, end)?
            .unwrap_or(data_start);
        let state = if data_start > start && continuous_until.is_some_and(|t| t >= data_end) {
            OverlapState::PartialMiddleContinuous
        } else {
            OverlapState::PartialMiddleFragment
        };
        Ok(OverlapResult::fetch(
            state,
            start,
            end,
            request.expected_count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::timeframe::Timeframe;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn test_repo(name: &str) -> CandleRepository {
        let path = std::env::temp_dir().join(format!("ucp_overlap_{name}.db"));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
        CandleRepository::new(path.to_str().unwrap(), "KRW-BTC", Timeframe::M5)
    }

    fn seed(repo: &CandleRepository, start: DateTime<Utc>, n: i64) {
        let mut candles = Vec::new();
        let mut t = start;
        for i in 0..n {
            let price = dec!(1000) + rust_decimal::Decimal::from(i);
            let mut candle = Candle::synthetic("KRW-BTC", Timeframe::M5, t, price);
            candle.is_synthetic = false;
            candles.push(candle);
            t = Timeframe::M5.advance(t, 1).unwrap();
        }
        repo.save(&candles).unwrap();
    }

    fn analyze(repo: &CandleRepository, start: DateTime<Utc>, end: DateTime<Utc>) -> OverlapResult {
        let expected = Timeframe::M5.count_between(start, end).unwrap();
        OverlapAnalyzer::analyze(
            repo,
            &OverlapRequest {
                target_start: start,
                target_end: end,
                expected_count: expected,
            },
        )
        .unwrap()
    }

    #[test]
    fn intervalle_vide_tout_recuperer() {
        let repo = test_repo("vide");
        let start = utc(2024, 1, 10, 0, 0, 0);
        let end = utc(2024, 1, 10, 1, 0, 0);
        let result = analyze(&repo, start, end);
        assert_eq!(result.state, OverlapState::NoOverlap);
        assert_eq!(result.fetch_from, Some(start));
        assert_eq!(result.fetch_to, Some(end));
        assert_eq!(result.fetch_count, 13);
    }

    #[test]
    fn couverture_complete_aucune_recuperation() {
        let repo = test_repo("complet");
        let start = utc(2024, 1, 10, 0, 0, 0);
        seed(&repo, start, 13);
        let result = analyze(&repo, start, utc(2024, 1, 10, 1, 0, 0));
        assert_eq!(result.state, OverlapState::CompleteOverlap);
        assert!(!result.needs_fetch());
    }

    #[test]
    fn bloc_collant_au_bord_recent_restreint_la_plage() {
        let repo = test_repo("partial_start");
        let start = utc(2024, 1, 10, 0, 0, 0);
        let end = utc(2024, 1, 10, 2, 0, 0);
        // Données de 01:00 à 02:00 (bord récent couvert, portion ancienne vide)
        seed(&repo, utc(2024, 1, 10, 1, 0, 0), 13);

        let result = analyze(&repo, start, end);
        assert_eq!(result.state, OverlapState::PartialStart);
        assert_eq!(result.fetch_from, Some(start));
        assert_eq!(result.fetch_to, Some(utc(2024, 1, 10, 0, 55, 0)));
        assert_eq!(result.fetch_count, 12);
    }

    #[test]
    fn bloc_du_milieu_continu() {
        let repo = test_repo("milieu_continu");
        let start = utc(2024, 1, 10, 0, 0, 0);
        let end = utc(2024, 1, 10, 2, 0, 0);
        // Bloc continu 00:30..=01:00, ne touchant aucun bord
        seed(&repo, utc(2024, 1, 10, 0, 30, 0), 7);

        let result = analyze(&repo, start, end);
        assert_eq!(result.state, OverlapState::PartialMiddleContinuous);
        // Récupération complète malgré le bloc présent
        assert_eq!(result.fetch_from, Some(start));
        assert_eq!(result.fetch_to, Some(end));
    }

    #[test]
    fn lignes_eparses_fragmentees() {
        let repo = test_repo("fragments");
        let start = utc(2024, 1, 10, 0, 0, 0);
        let end = utc(2024, 1, 10, 2, 0, 0);
        seed(&repo, utc(2024, 1, 10, 0, 30, 0), 2);
        seed(&repo, utc(2024, 1, 10, 1, 30, 0), 2);

        let result = analyze(&repo, start, end);
        assert_eq!(result.state, OverlapState::PartialMiddleFragment);
        assert_eq!(result.fetch_from, Some(start));
        assert_eq!(result.fetch_to, Some(end));
    }

    #[test]
    fn determinisme_a_etat_fixe() {
        let repo = test_repo("determinisme");
        let start = utc(2024, 1, 10, 0, 0, 0);
        let end = utc(2024, 1, 10, 2, 0, 0);
        seed(&repo, utc(2024, 1, 10, 1, 0, 0), 13);
        let first = analyze(&repo, start, end);
        let second = analyze(&repo, start, end);
        assert_eq!(first.state, second.state);
        assert_eq!(first.fetch_from, second.fetch_from);
        assert_eq!(first.fetch_to, second.fetch_to);
        assert_eq!(first.fetch_count, second.fetch_count);
    }
}
