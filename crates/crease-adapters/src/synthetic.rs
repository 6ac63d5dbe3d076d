//! Synthetic fallback data. Everything produced here is tagged
//! [`Sourced::Synthesized`].

use chrono::{DateTime, Duration, Utc};
use crease_core::{
    derive_match_external_id, derive_player_external_id, CandidateBatch, MatchCandidate,
    MatchFormat, MatchStatus, PlayerCandidate, PlayerRole, PlayerStats, Sourced, TeamCandidate,
};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::extract::Outcome;
use crate::reference::{
    reference_team_candidates, venues_for, KnownTeam, KNOWN_TEAMS, ROSTER, SYNTHETIC_TEAM_POOL,
};

const SCENARIOS: [(MatchStatus, &str, MatchFormat); 5] = [
    (MatchStatus::Live, "ICC T20 World Cup", MatchFormat::T20),
    (MatchStatus::Completed, "ICC World Cup", MatchFormat::Odi),
    (MatchStatus::Scheduled, "Ashes", MatchFormat::Test),
    (MatchStatus::Live, "Indian Premier League", MatchFormat::T20),
    (MatchStatus::Completed, "Asia Cup", MatchFormat::Odi),
];

pub(crate) fn random_pair<R: Rng + ?Sized>(
    rng: &mut R,
) -> (&'static KnownTeam, &'static KnownTeam) {
    let picked = rand::seq::index::sample(rng, SYNTHETIC_TEAM_POOL, 2);
    (&KNOWN_TEAMS[picked.index(0)], &KNOWN_TEAMS[picked.index(1)])
}

pub(crate) fn random_score<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}/{}", rng.gen_range(150..=350), rng.gen_range(1..=10))
}

pub(crate) fn random_outcome<R: Rng + ?Sized>(rng: &mut R, team1: &str, team2: &str) -> Outcome {
    let winner = if rng.gen_bool(0.5) { team1 } else { team2 };
    let margin = rng.gen_range(1..=100);
    let unit = if rng.gen_bool(0.5) { "runs" } else { "wickets" };
    Outcome {
        winner: Some(winner.to_string()),
        result: format!("{winner} won by {margin} {unit}"),
    }
}

fn start_time_for<R: Rng + ?Sized>(
    rng: &mut R,
    status: MatchStatus,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match status {
        MatchStatus::Completed | MatchStatus::Cancelled => {
            now - Duration::days(rng.gen_range(1..=30))
        }
        MatchStatus::Live => now - Duration::hours(rng.gen_range(1..=8)),
        MatchStatus::Scheduled => now + Duration::days(rng.gen_range(1..=30)),
    }
}

/// Career aggregates in a plausible band for the role.
pub fn generate_stats<R: Rng + ?Sized>(rng: &mut R, role: PlayerRole) -> PlayerStats {
    let (runs, wickets, matches, highest, bbi_wickets, bbi_runs) = match role {
        PlayerRole::Batsman => (2000..=15000, 0..=30, 50..=300, 100..=250, 1..=3, 10..=50),
        PlayerRole::Bowler => (100..=800, 100..=500, 50..=200, 20..=60, 4..=7, 10..=40),
        PlayerRole::AllRounder => (1000..=8000, 50..=300, 80..=250, 80..=150, 3..=6, 10..=40),
        PlayerRole::WicketKeeper => (1500..=10000, 0..=10, 60..=250, 80..=180, 0..=2, 10..=50),
    };
    PlayerStats {
        total_runs: rng.gen_range(runs),
        total_wickets: rng.gen_range(wickets),
        total_matches: rng.gen_range(matches),
        highest_score: rng.gen_range(highest),
        best_bowling: Some(format!(
            "{}/{}",
            rng.gen_range(bbi_wickets),
            rng.gen_range(bbi_runs)
        )),
    }
}

pub fn reference_teams() -> Vec<Sourced<TeamCandidate>> {
    reference_team_candidates()
        .into_iter()
        .map(Sourced::Synthesized)
        .collect()
}

pub fn roster_players<R: Rng + ?Sized>(rng: &mut R) -> Vec<Sourced<PlayerCandidate>> {
    ROSTER
        .iter()
        .map(|entry| {
            Sourced::Synthesized(PlayerCandidate {
                external_id: Some(derive_player_external_id(entry.full_name, Some(entry.team))),
                full_name: entry.full_name.to_string(),
                role: entry.role,
                batting_style: entry.batting_style.map(ToString::to_string),
                bowling_style: entry.bowling_style.map(ToString::to_string),
                team_name: Some(entry.team.to_string()),
                stats: generate_stats(rng, entry.role),
            })
        })
        .collect()
}

/// One match per fixed scenario, between two distinct dictionary teams.
/// Ids depend only on the pairing and competition, so a repeated pairing
/// updates the earlier row instead of adding another.
pub fn synthetic_matches<R: Rng + ?Sized>(
    rng: &mut R,
    now: DateTime<Utc>,
) -> Vec<Sourced<MatchCandidate>> {
    SCENARIOS
        .iter()
        .map(|(status, competition, format)| {
            let (a, b) = random_pair(rng);
            let (team1, team2) = (a.name.to_string(), b.name.to_string());

            let in_play = matches!(status, MatchStatus::Live | MatchStatus::Completed);
            let (team1_score, team2_score) = if in_play {
                (Some(random_score(rng)), Some(random_score(rng)))
            } else {
                (None, None)
            };
            let (winner, result) = if *status == MatchStatus::Completed {
                let outcome = random_outcome(rng, &team1, &team2);
                (outcome.winner, Some(outcome.result))
            } else {
                (None, None)
            };

            Sourced::Synthesized(MatchCandidate {
                external_id: derive_match_external_id(&team1, &team2, competition, "synthetic"),
                status: Some(*status),
                format: Some(*format),
                venue: venues_for(competition).choose(rng).map(|v| v.to_string()),
                competition: Some(competition.to_string()),
                start_time: Some(start_time_for(rng, *status, now)),
                team1,
                team2,
                winner,
                team1_score,
                team2_score,
                result,
            })
        })
        .collect()
}

/// Reference teams, the roster and a full set of synthetic fixtures.
pub fn synthetic_batch<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> CandidateBatch {
    CandidateBatch {
        teams: reference_teams(),
        players: roster_players(rng),
        matches: synthetic_matches(rng, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn same_seed_same_batch() {
        let now = Utc::now();
        let a = synthetic_batch(&mut StdRng::seed_from_u64(42), now);
        let b = synthetic_batch(&mut StdRng::seed_from_u64(42), now);
        assert_eq!(a, b);
        assert_eq!(a.teams.len(), 14);
        assert_eq!(a.players.len(), 26);
        assert_eq!(a.matches.len(), 5);
        assert_eq!(a.synthesized_count(), a.len());
    }

    #[test]
    fn synthetic_matches_follow_their_scenario() {
        let now = Utc::now();
        let matches = synthetic_matches(&mut StdRng::seed_from_u64(3), now);
        for sourced in &matches {
            let m = sourced.record();
            assert_ne!(m.team1, m.team2);
            let pool: Vec<_> = KNOWN_TEAMS[..SYNTHETIC_TEAM_POOL].iter().map(|t| t.name).collect();
            assert!(pool.contains(&m.team1.as_str()));
            let start = m.start_time.expect("start time");
            match m.status {
                Some(MatchStatus::Completed) => {
                    assert!(start < now);
                    let winner = m.winner.as_deref().expect("winner");
                    assert!(winner == m.team1 || winner == m.team2);
                    assert!(m.result.as_deref().unwrap().starts_with(winner));
                }
                Some(MatchStatus::Live) => {
                    assert!(start < now && now - start <= Duration::hours(8));
                    assert!(m.team1_score.is_some());
                    assert!(m.winner.is_none());
                }
                Some(MatchStatus::Scheduled) => {
                    assert!(start > now);
                    assert!(m.team1_score.is_none());
                }
                other => panic!("unexpected status {other:?}"),
            }
        }
    }

    #[test]
    fn generated_stats_stay_in_role_bands() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let bowler = generate_stats(&mut rng, PlayerRole::Bowler);
            assert!((100..=500).contains(&bowler.total_wickets));
            let keeper = generate_stats(&mut rng, PlayerRole::WicketKeeper);
            assert!(keeper.total_wickets <= 10);
        }
    }

    #[test]
    fn roster_ids_match_derived_player_ids() {
        let players = roster_players(&mut StdRng::seed_from_u64(1));
        let kohli = players
            .iter()
            .map(Sourced::record)
            .find(|p| p.full_name == "Virat Kohli")
            .unwrap();
        assert_eq!(
            kohli.external_id,
            Some(derive_player_external_id("Virat Kohli", Some("India")))
        );
    }
}
