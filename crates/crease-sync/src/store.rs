//! Canonical store over SQLite: schema, sample data, read models, run
//! history and the consistency sweep. Merging lives in [`crate::reconcile`].

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use crease_adapters::known_team;
use crease_core::{
    derive_player_external_id, Match, MatchFormat, MatchStatus, Player, PlayerMetric, PlayerRole,
    PlayerStats, Team,
};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::reconcile::MergeOutcome;

pub const DEFAULT_MATCH_LIMIT: i64 = 50;
pub const DEFAULT_PLAYER_LIMIT: i64 = 100;
pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
const TEAM_LEADERS: i64 = 3;

const MATCH_SELECT: &str = r#"
    SELECT m.id, m.external_id, m.status, m.format,
           m.team1_id, m.team2_id, m.winner_id,
           t1.name AS team1_name, t2.name AS team2_name, w.name AS winner_name,
           m.team1_score, m.team2_score, m.result, m.venue, m.competition,
           m.start_time, m.updated_at
      FROM matches m
      JOIN teams t1 ON t1.id = m.team1_id
      JOIN teams t2 ON t2.id = m.team2_id
      LEFT JOIN teams w ON w.id = m.winner_id
"#;

const PLAYER_SELECT: &str = r#"
    SELECT p.id, p.external_id, p.full_name, p.role, p.batting_style, p.bowling_style,
           p.team_id, t.name AS team_name,
           p.total_runs, p.total_wickets, p.total_matches, p.highest_score, p.best_bowling,
           p.updated_at
      FROM players p
      LEFT JOIN teams t ON t.id = p.team_id
"#;

const TEAM_SELECT: &str = r#"
    SELECT id, name, short_name, country, founded_year, created_at, updated_at
      FROM teams
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub teams: i64,
    pub players: i64,
    pub matches: i64,
    pub live: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    #[serde(flatten)]
    pub team: Team,
    pub player_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStats {
    pub team: Team,
    pub matches_played: i64,
    pub matches_won: i64,
    pub matches_lost: i64,
    pub win_percentage: f64,
    pub total_runs: i64,
    pub total_wickets: i64,
    pub top_batsmen: Vec<Player>,
    pub top_bowlers: Vec<Player>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }
}

/// Final bookkeeping for one `ingest_runs` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFinish {
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub error: Option<String>,
    pub outcome: MergeOutcome,
    pub swept: usize,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parsing database url {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        Ok(Self { pool })
    }

    /// Private in-memory database. One connection that never idles out,
    /// otherwise the data would vanish with it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database url")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("opening in-memory database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")?;
        Ok(())
    }

    /// Seeds a small demonstration dataset when the store has no teams yet.
    /// Returns whether anything was written.
    pub async fn seed_sample_data(&self) -> Result<bool> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(&self.pool)
            .await
            .context("counting teams")?;
        if existing > 0 {
            debug!(existing, "teams present; skipping sample data");
            return Ok(false);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("starting sample data transaction")?;

        let mut team_ids = Vec::new();
        let sample_teams = [
            ("India", "IND"),
            ("Australia", "AUS"),
            ("England", "ENG"),
            ("Pakistan", "PAK"),
        ];
        for (name, code) in sample_teams {
            let founded = known_team(name).map(|t| t.founded_year);
            let id = sqlx::query(
                r#"
                INSERT INTO teams (name, short_name, country, founded_year, created_at, updated_at)
                VALUES (?1, ?2, ?1, ?3, ?4, ?4)
                "#,
            )
            .bind(name)
            .bind(code)
            .bind(founded)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting sample team {name}"))?
            .last_insert_rowid();
            team_ids.push((name, id));
        }
        let team_id = |name: &str| team_ids.iter().find(|(n, _)| *n == name).map(|(_, id)| *id);

        let (rhb, rf) = (Some("Right-hand bat"), Some("Right-arm fast"));
        let players = [
            ("Virat Kohli", "India", PlayerRole::Batsman, rhb, None, 12898, 0, 265),
            ("Rohit Sharma", "India", PlayerRole::Batsman, rhb, None, 10123, 0, 248),
            ("Pat Cummins", "Australia", PlayerRole::Bowler, None, rf, 0, 216, 77),
            ("Joe Root", "England", PlayerRole::Batsman, rhb, None, 9278, 0, 152),
        ];
        for (name, team, role, batting, bowling, runs, wickets, matches) in players {
            sqlx::query(
                r#"
                INSERT INTO players (external_id, full_name, role, batting_style, bowling_style,
                                     team_id, total_runs, total_wickets, total_matches,
                                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
            )
            .bind(derive_player_external_id(name, Some(team)))
            .bind(name)
            .bind(role.as_str())
            .bind(batting)
            .bind(bowling)
            .bind(team_id(team))
            .bind(runs as i64)
            .bind(wickets as i64)
            .bind(matches as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting sample player {name}"))?;
        }

        let start = Utc
            .with_ymd_and_hms(2023, 10, 15, 14, 30, 0)
            .single()
            .context("building sample match date")?;
        sqlx::query(
            r#"
            INSERT INTO matches (external_id, status, format, team1_id, team2_id, winner_id,
                                 team1_score, team2_score, result, venue, competition, start_time,
                                 created_at, updated_at)
            VALUES (NULL, ?1, ?2, ?3, ?4, ?3, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
        )
        .bind(MatchStatus::Completed.as_str())
        .bind(MatchFormat::Odi.as_str())
        .bind(team_id("India"))
        .bind(team_id("Australia"))
        .bind("326/5 (50 ov)")
        .bind("289/10 (48.2 ov)")
        .bind("India won by 37 runs")
        .bind("Wankhede Stadium, Mumbai")
        .bind("ICC Cricket World Cup 2023")
        .bind(start)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("inserting sample match")?;

        tx.commit().await.context("committing sample data")?;
        info!(teams = team_ids.len(), "sample data created");
        Ok(true)
    }

    pub async fn list_matches(
        &self,
        status: Option<MatchStatus>,
        limit: i64,
    ) -> sqlx::Result<Vec<Match>> {
        let sql = format!(
            "{MATCH_SELECT} WHERE (?1 IS NULL OR m.status = ?1) \
             ORDER BY m.start_time DESC, m.id DESC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(match_from_row).collect()
    }

    pub async fn get_match(&self, id: i64) -> sqlx::Result<Option<Match>> {
        let sql = format!("{MATCH_SELECT} WHERE m.id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(match_from_row).transpose()
    }

    pub async fn get_match_by_external_id(&self, external_id: &str) -> sqlx::Result<Option<Match>> {
        let sql = format!("{MATCH_SELECT} WHERE m.external_id = ?1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    pub async fn get_team(&self, id: i64) -> sqlx::Result<Option<Team>> {
        let sql = format!("{TEAM_SELECT} WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(team_from_row).transpose()
    }

    pub async fn list_teams(&self) -> sqlx::Result<Vec<TeamSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.name, t.short_name, t.country, t.founded_year,
                   t.created_at, t.updated_at,
                   (SELECT COUNT(*) FROM players p WHERE p.team_id = t.id) AS player_count
              FROM teams t
             ORDER BY t.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TeamSummary {
                    team: team_from_row(row)?,
                    player_count: row.try_get("player_count")?,
                })
            })
            .collect()
    }

    /// Results over completed matches plus squad aggregates.
    pub async fn team_stats(&self, id: i64) -> sqlx::Result<Option<TeamStats>> {
        let Some(team) = self.get_team(id).await? else {
            return Ok(None);
        };

        let record = sqlx::query(
            r#"
            SELECT COUNT(*) AS played,
                   COALESCE(SUM(CASE WHEN winner_id = ?1 THEN 1 ELSE 0 END), 0) AS won,
                   COALESCE(SUM(CASE WHEN winner_id IS NOT NULL AND winner_id <> ?1
                                     THEN 1 ELSE 0 END), 0) AS lost
              FROM matches
             WHERE status = 'completed' AND (team1_id = ?1 OR team2_id = ?1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let played: i64 = record.try_get("played")?;
        let won: i64 = record.try_get("won")?;
        let lost: i64 = record.try_get("lost")?;

        let totals = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_runs), 0) AS runs, COALESCE(SUM(total_wickets), 0) AS wickets
              FROM players
             WHERE team_id = ?1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let top_batsmen = self
            .ranked_players(Some(id), PlayerMetric::Runs, TEAM_LEADERS)
            .await?;
        let top_bowlers = self
            .ranked_players(Some(id), PlayerMetric::Wickets, TEAM_LEADERS)
            .await?;

        Ok(Some(TeamStats {
            team,
            matches_played: played,
            matches_won: won,
            matches_lost: lost,
            win_percentage: win_percentage(won, played),
            total_runs: totals.try_get("runs")?,
            total_wickets: totals.try_get("wickets")?,
            top_batsmen,
            top_bowlers,
        }))
    }

    /// Leaderboard across every team, highest `metric` first.
    pub async fn top_players(&self, metric: PlayerMetric, limit: i64) -> sqlx::Result<Vec<Player>> {
        self.ranked_players(None, metric, limit).await
    }

    async fn ranked_players(
        &self,
        team_id: Option<i64>,
        metric: PlayerMetric,
        limit: i64,
    ) -> sqlx::Result<Vec<Player>> {
        let order_column = match metric {
            PlayerMetric::Runs => "p.total_runs",
            PlayerMetric::Wickets => "p.total_wickets",
            PlayerMetric::Matches => "p.total_matches",
        };
        let sql = format!(
            "{PLAYER_SELECT} WHERE (?1 IS NULL OR p.team_id = ?1) \
             ORDER BY {order_column} DESC, p.full_name, p.id LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(team_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(player_from_row).collect()
    }

    pub async fn list_players(
        &self,
        team_id: Option<i64>,
        limit: i64,
    ) -> sqlx::Result<Vec<Player>> {
        let sql = format!(
            "{PLAYER_SELECT} WHERE (?1 IS NULL OR p.team_id = ?1) \
             ORDER BY p.full_name, p.id LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(team_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(player_from_row).collect()
    }

    pub async fn get_player(&self, id: i64) -> sqlx::Result<Option<Player>> {
        let sql = format!("{PLAYER_SELECT} WHERE p.id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(player_from_row).transpose()
    }

    pub async fn counts(&self) -> sqlx::Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM teams) AS teams,
                   (SELECT COUNT(*) FROM players) AS players,
                   (SELECT COUNT(*) FROM matches) AS matches,
                   (SELECT COUNT(*) FROM matches WHERE status = 'live') AS live
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreCounts {
            teams: row.try_get("teams")?,
            players: row.try_get("players")?,
            matches: row.try_get("matches")?,
            live: row.try_get("live")?,
        })
    }

    /// Closes live matches that started more than `stale_after` before `now`,
    /// in a single transaction. Returns the ids that were closed.
    pub async fn sweep_stale_live(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> sqlx::Result<Vec<i64>> {
        let cutoff = now - stale_after;
        let rows = sqlx::query("SELECT id, start_time FROM matches WHERE status = 'live'")
            .fetch_all(&self.pool)
            .await?;

        let mut stale = Vec::new();
        for row in &rows {
            let start_time: DateTime<Utc> = row.try_get("start_time")?;
            if start_time < cutoff {
                stale.push(row.try_get::<i64, _>("id")?);
            }
        }
        if stale.is_empty() {
            return Ok(stale);
        }

        let mut tx = self.pool.begin().await?;
        for id in &stale {
            sqlx::query(
                "UPDATE matches SET status = 'completed', updated_at = ?1 \
                 WHERE id = ?2 AND status = 'live'",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(stale)
    }

    pub async fn record_run_started(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO ingest_runs (id, started_at, status) VALUES (?1, ?2, ?3)")
            .bind(run_id.to_string())
            .bind(started_at)
            .bind(RunState::Running.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_run_finished(&self, run_id: Uuid, finish: &RunFinish) -> sqlx::Result<()> {
        let o = &finish.outcome;
        sqlx::query(
            r#"
            UPDATE ingest_runs
               SET finished_at = ?2, status = ?3, error = ?4,
                   teams_created = ?5, teams_updated = ?6,
                   players_created = ?7, players_updated = ?8, players_skipped = ?9,
                   matches_created = ?10, matches_updated = ?11, matches_skipped = ?12,
                   swept = ?13, used_fallback = ?14
             WHERE id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .bind(finish.finished_at)
        .bind(finish.state.as_str())
        .bind(finish.error.as_deref())
        .bind(o.teams.created as i64)
        .bind(o.teams.updated as i64)
        .bind(o.players.created as i64)
        .bind(o.players.updated as i64)
        .bind(o.players.skipped as i64)
        .bind(o.matches.created as i64)
        .bind(o.matches.updated as i64)
        .bind(o.matches.skipped as i64)
        .bind(finish.swept as i64)
        .bind(finish.used_fallback)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_successful_run(&self) -> sqlx::Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            r#"
            SELECT finished_at
              FROM ingest_runs
             WHERE status = 'succeeded' AND finished_at IS NOT NULL
             ORDER BY finished_at DESC
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn run_state(&self, run_id: Uuid) -> sqlx::Result<Option<(String, Option<String>)>> {
        let row = sqlx::query("SELECT status, error FROM ingest_runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok((r.try_get("status")?, r.try_get("error")?)))
            .transpose()
    }
}

pub(crate) fn win_percentage(won: i64, played: i64) -> f64 {
    if played == 0 {
        return 0.0;
    }
    (won as f64 / played as f64 * 10_000.0).round() / 100.0
}

fn decode<T>(row: &SqliteRow, column: &str) -> sqlx::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    })
}

fn team_from_row(row: &SqliteRow) -> sqlx::Result<Team> {
    Ok(Team {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        short_name: row.try_get("short_name")?,
        country: row.try_get("country")?,
        founded_year: row.try_get("founded_year")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn player_from_row(row: &SqliteRow) -> sqlx::Result<Player> {
    let role = row
        .try_get::<Option<String>, _>("role")?
        .map(|raw| {
            raw.parse::<PlayerRole>().map_err(|err| sqlx::Error::ColumnDecode {
                index: "role".to_string(),
                source: Box::new(err),
            })
        })
        .transpose()?;
    Ok(Player {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        full_name: row.try_get("full_name")?,
        role,
        batting_style: row.try_get("batting_style")?,
        bowling_style: row.try_get("bowling_style")?,
        team_id: row.try_get("team_id")?,
        team_name: row.try_get("team_name")?,
        stats: PlayerStats {
            total_runs: row.try_get("total_runs")?,
            total_wickets: row.try_get("total_wickets")?,
            total_matches: row.try_get("total_matches")?,
            highest_score: row.try_get("highest_score")?,
            best_bowling: row.try_get("best_bowling")?,
        },
        updated_at: row.try_get("updated_at")?,
    })
}

fn match_from_row(row: &SqliteRow) -> sqlx::Result<Match> {
    Ok(Match {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        status: decode(row, "status")?,
        format: decode(row, "format")?,
        team1_id: row.try_get("team1_id")?,
        team2_id: row.try_get("team2_id")?,
        winner_id: row.try_get("winner_id")?,
        team1_name: row.try_get("team1_name")?,
        team2_name: row.try_get("team2_name")?,
        winner_name: row.try_get("winner_name")?,
        team1_score: row.try_get("team1_score")?,
        team2_score: row.try_get("team2_score")?,
        result: row.try_get("result")?,
        venue: row.try_get("venue")?,
        competition: row.try_get("competition")?,
        start_time: row.try_get("start_time")?,
        updated_at: row.try_get("updated_at")?,
    })
}
