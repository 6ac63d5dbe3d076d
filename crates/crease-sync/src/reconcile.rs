//! Merges a candidate batch into the canonical store.
//!
//! Teams, players and matches are each written in their own transaction, in
//! that order. A failure rolls back the stage in progress and stops the
//! merge; stages already committed stay committed. Within a batch,
//! candidates sharing a key are applied in order, so the last one wins.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use crease_core::{
    CandidateBatch, MatchCandidate, MatchStatus, PlayerCandidate, Sourced, TeamCandidate,
};
use serde::Serialize;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub teams: EntityCounts,
    pub players: EntityCounts,
    pub matches: EntityCounts,
    /// Candidates in the batch that came from a fallback rather than a page.
    pub synthesized: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStage {
    Teams,
    Players,
    Matches,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeStage::Teams => "teams",
            MergeStage::Players => "players",
            MergeStage::Matches => "matches",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("persisting {stage} failed: {source}")]
    Persistence {
        stage: MergeStage,
        /// Counts for the stages committed before the failure.
        partial: MergeOutcome,
        #[source]
        source: sqlx::Error,
    },
}

impl ReconcileError {
    fn persistence(stage: MergeStage, partial: &MergeOutcome, source: sqlx::Error) -> Self {
        ReconcileError::Persistence {
            stage,
            partial: *partial,
            source,
        }
    }
}

/// Lowercased team name to row id, loaded once per merge and grown as
/// teams are created.
#[derive(Debug, Default)]
struct TeamIndex(HashMap<String, i64>);

impl TeamIndex {
    fn key(name: &str) -> String {
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    fn get(&self, name: &str) -> Option<i64> {
        self.0.get(&Self::key(name)).copied()
    }

    fn insert(&mut self, name: &str, id: i64) {
        self.0.insert(Self::key(name), id);
    }
}

pub async fn merge(
    pool: &SqlitePool,
    batch: &CandidateBatch,
) -> Result<MergeOutcome, ReconcileError> {
    let now = Utc::now();
    let mut outcome = MergeOutcome {
        synthesized: batch.synthesized_count(),
        ..Default::default()
    };

    let mut teams = load_team_index(pool)
        .await
        .map_err(|err| ReconcileError::persistence(MergeStage::Teams, &outcome, err))?;

    let mut tx = begin(pool, MergeStage::Teams, &outcome).await?;
    let result = merge_teams(&mut tx, &batch.teams, &mut teams, now).await;
    outcome.teams = settle(tx, result)
        .await
        .map_err(|err| ReconcileError::persistence(MergeStage::Teams, &outcome, err))?;

    let mut tx = begin(pool, MergeStage::Players, &outcome).await?;
    let result = merge_players(&mut tx, &batch.players, &teams, now).await;
    outcome.players = settle(tx, result)
        .await
        .map_err(|err| ReconcileError::persistence(MergeStage::Players, &outcome, err))?;

    let mut tx = begin(pool, MergeStage::Matches, &outcome).await?;
    let result = merge_matches(&mut tx, &batch.matches, &teams, now).await;
    outcome.matches = settle(tx, result)
        .await
        .map_err(|err| ReconcileError::persistence(MergeStage::Matches, &outcome, err))?;

    info!(
        teams_created = outcome.teams.created,
        players_created = outcome.players.created,
        players_updated = outcome.players.updated,
        players_skipped = outcome.players.skipped,
        matches_created = outcome.matches.created,
        matches_updated = outcome.matches.updated,
        matches_skipped = outcome.matches.skipped,
        synthesized = outcome.synthesized,
        "batch merged"
    );
    Ok(outcome)
}

async fn begin(
    pool: &SqlitePool,
    stage: MergeStage,
    outcome: &MergeOutcome,
) -> Result<Transaction<'static, Sqlite>, ReconcileError> {
    pool.begin()
        .await
        .map_err(|err| ReconcileError::persistence(stage, outcome, err))
}

/// Commits on success, rolls back on failure.
async fn settle(
    tx: Transaction<'static, Sqlite>,
    result: sqlx::Result<EntityCounts>,
) -> sqlx::Result<EntityCounts> {
    match result {
        Ok(counts) => {
            tx.commit().await?;
            Ok(counts)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn load_team_index(pool: &SqlitePool) -> sqlx::Result<TeamIndex> {
    let rows = sqlx::query("SELECT id, name FROM teams").fetch_all(pool).await?;
    let mut index = TeamIndex::default();
    for row in rows {
        let name: String = row.try_get("name")?;
        index.insert(&name, row.try_get("id")?);
    }
    Ok(index)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn merge_teams(
    conn: &mut SqliteConnection,
    candidates: &[Sourced<TeamCandidate>],
    index: &mut TeamIndex,
    now: DateTime<Utc>,
) -> sqlx::Result<EntityCounts> {
    let mut counts = EntityCounts::default();
    for candidate in candidates {
        let team = candidate.record();
        let name = team.name.trim();
        if name.is_empty() {
            counts.skipped += 1;
            continue;
        }

        if let Some(id) = index.get(name) {
            // Existing teams only gain values for fields that are still null.
            let filled = sqlx::query(
                r#"
                UPDATE teams
                   SET short_name = COALESCE(short_name, ?2),
                       country = COALESCE(country, ?3),
                       founded_year = COALESCE(founded_year, ?4),
                       updated_at = ?5
                 WHERE id = ?1
                   AND ((short_name IS NULL AND ?2 IS NOT NULL)
                     OR (country IS NULL AND ?3 IS NOT NULL)
                     OR (founded_year IS NULL AND ?4 IS NOT NULL))
                "#,
            )
            .bind(id)
            .bind(non_empty(&team.short_name))
            .bind(non_empty(&team.country))
            .bind(team.founded_year)
            .bind(now)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            if filled > 0 {
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
            continue;
        }

        let id = sqlx::query(
            r#"
            INSERT INTO teams (name, short_name, country, founded_year, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(name)
        .bind(non_empty(&team.short_name))
        .bind(non_empty(&team.country))
        .bind(team.founded_year)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
        debug!(team = name, id, "team created");
        index.insert(name, id);
        counts.created += 1;
    }
    Ok(counts)
}

async fn find_player(
    conn: &mut SqliteConnection,
    player: &PlayerCandidate,
    team_id: Option<i64>,
) -> sqlx::Result<Option<i64>> {
    if let Some(external_id) = non_empty(&player.external_id) {
        return sqlx::query_scalar("SELECT id FROM players WHERE external_id = ?1")
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await;
    }
    let Some(team_id) = team_id else {
        return Ok(None);
    };
    sqlx::query_scalar(
        "SELECT id FROM players \
         WHERE external_id IS NULL AND full_name = ?1 AND team_id = ?2 LIMIT 1",
    )
    .bind(player.full_name.trim())
    .bind(team_id)
    .fetch_optional(&mut *conn)
    .await
}

async fn merge_players(
    conn: &mut SqliteConnection,
    candidates: &[Sourced<PlayerCandidate>],
    index: &TeamIndex,
    now: DateTime<Utc>,
) -> sqlx::Result<EntityCounts> {
    let mut counts = EntityCounts::default();
    for candidate in candidates {
        let player = candidate.record();
        if player.full_name.trim().is_empty() {
            counts.skipped += 1;
            continue;
        }
        let team_id = player.team_name.as_deref().and_then(|name| index.get(name));

        if let Some(id) = find_player(&mut *conn, player, team_id).await? {
            sqlx::query(
                r#"
                UPDATE players
                   SET role = ?2,
                       batting_style = COALESCE(?3, batting_style),
                       bowling_style = COALESCE(?4, bowling_style),
                       team_id = COALESCE(?5, team_id),
                       total_runs = ?6,
                       total_wickets = ?7,
                       total_matches = ?8,
                       highest_score = ?9,
                       best_bowling = COALESCE(?10, best_bowling),
                       updated_at = ?11
                 WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(player.role.as_str())
            .bind(non_empty(&player.batting_style))
            .bind(non_empty(&player.bowling_style))
            .bind(team_id)
            .bind(player.stats.total_runs)
            .bind(player.stats.total_wickets)
            .bind(player.stats.total_matches)
            .bind(player.stats.highest_score)
            .bind(non_empty(&player.stats.best_bowling))
            .bind(now)
            .execute(&mut *conn)
            .await?;
            counts.updated += 1;
            continue;
        }

        let Some(team_id) = team_id else {
            debug!(
                player = %player.full_name,
                team = ?player.team_name,
                "team unresolved; player skipped"
            );
            counts.skipped += 1;
            continue;
        };

        sqlx::query(
            r#"
            INSERT INTO players (external_id, full_name, role, batting_style, bowling_style,
                                 team_id, total_runs, total_wickets, total_matches,
                                 highest_score, best_bowling, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(non_empty(&player.external_id))
        .bind(player.full_name.trim())
        .bind(player.role.as_str())
        .bind(non_empty(&player.batting_style))
        .bind(non_empty(&player.bowling_style))
        .bind(team_id)
        .bind(player.stats.total_runs)
        .bind(player.stats.total_wickets)
        .bind(player.stats.total_matches)
        .bind(player.stats.highest_score)
        .bind(non_empty(&player.stats.best_bowling))
        .bind(now)
        .execute(&mut *conn)
        .await?;
        counts.created += 1;
    }
    Ok(counts)
}

async fn merge_matches(
    conn: &mut SqliteConnection,
    candidates: &[Sourced<MatchCandidate>],
    index: &TeamIndex,
    now: DateTime<Utc>,
) -> sqlx::Result<EntityCounts> {
    let mut counts = EntityCounts::default();
    for candidate in candidates {
        let m = candidate.record();
        let winner_id = m.winner.as_deref().and_then(|name| index.get(name));

        let existing = sqlx::query("SELECT id, status FROM matches WHERE external_id = ?1")
            .bind(&m.external_id)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            let raw_status: String = row.try_get("status")?;
            let current = raw_status
                .parse::<MatchStatus>()
                .map_err(|err| sqlx::Error::ColumnDecode {
                    index: "status".to_string(),
                    source: Box::new(err),
                })?;
            let status = match m.status {
                Some(next) if current.can_transition_to(next) => next,
                Some(next) => {
                    debug!(match_id = id, %current, %next, "status regression ignored");
                    current
                }
                None => current,
            };

            sqlx::query(
                r#"
                UPDATE matches
                   SET status = ?2,
                       team1_score = COALESCE(?3, team1_score),
                       team2_score = COALESCE(?4, team2_score),
                       result = COALESCE(?5, result),
                       winner_id = COALESCE(?6, winner_id),
                       venue = COALESCE(venue, ?7),
                       competition = COALESCE(competition, ?8),
                       updated_at = ?9
                 WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(status.as_str())
            .bind(non_empty(&m.team1_score))
            .bind(non_empty(&m.team2_score))
            .bind(non_empty(&m.result))
            .bind(winner_id)
            .bind(non_empty(&m.venue))
            .bind(non_empty(&m.competition))
            .bind(now)
            .execute(&mut *conn)
            .await?;
            counts.updated += 1;
            continue;
        }

        let (Some(team1_id), Some(team2_id)) = (index.get(&m.team1), index.get(&m.team2)) else {
            debug!(
                external_id = %m.external_id,
                team1 = %m.team1,
                team2 = %m.team2,
                "team unresolved; match skipped"
            );
            counts.skipped += 1;
            continue;
        };
        if team1_id == team2_id {
            debug!(external_id = %m.external_id, "both sides resolve to one team; match skipped");
            counts.skipped += 1;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO matches (external_id, status, format, team1_id, team2_id, winner_id,
                                 team1_score, team2_score, result, venue, competition, start_time,
                                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
        )
        .bind(&m.external_id)
        .bind(m.status.unwrap_or(MatchStatus::Scheduled).as_str())
        .bind(m.format.unwrap_or_default().as_str())
        .bind(team1_id)
        .bind(team2_id)
        .bind(winner_id)
        .bind(non_empty(&m.team1_score))
        .bind(non_empty(&m.team2_score))
        .bind(non_empty(&m.result))
        .bind(non_empty(&m.venue))
        .bind(non_empty(&m.competition))
        .bind(m.start_time.unwrap_or(now))
        .bind(now)
        .execute(&mut *conn)
        .await?;
        counts.created += 1;
    }
    Ok(counts)
}
