//! Core domain model and provenance types for Crease.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "crease-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} value {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Closed set of player roles. Anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerRole {
    Batsman,
    Bowler,
    AllRounder,
    WicketKeeper,
}

impl PlayerRole {
    pub const ALL: [PlayerRole; 4] = [
        PlayerRole::Batsman,
        PlayerRole::Bowler,
        PlayerRole::AllRounder,
        PlayerRole::WicketKeeper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerRole::Batsman => "batsman",
            PlayerRole::Bowler => "bowler",
            PlayerRole::AllRounder => "all-rounder",
            PlayerRole::WicketKeeper => "wicket-keeper",
        }
    }
}

impl FromStr for PlayerRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        PlayerRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("player role", s))
    }
}

impl fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }

    /// A finished or cancelled match never goes back to scheduled/live.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        !self.is_terminal() || next.is_terminal()
    }
}

impl FromStr for MatchStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(MatchStatus::Scheduled),
            "live" => Ok(MatchStatus::Live),
            "completed" => Ok(MatchStatus::Completed),
            "cancelled" => Ok(MatchStatus::Cancelled),
            _ => Err(ParseEnumError::new("match status", s)),
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchFormat {
    T20,
    #[default]
    #[serde(rename = "ODI")]
    Odi,
    Test,
}

impl MatchFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchFormat::T20 => "T20",
            MatchFormat::Odi => "ODI",
            MatchFormat::Test => "Test",
        }
    }
}

impl FromStr for MatchFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t20" => Ok(MatchFormat::T20),
            "odi" => Ok(MatchFormat::Odi),
            "test" => Ok(MatchFormat::Test),
            _ => Err(ParseEnumError::new("match format", s)),
        }
    }
}

impl fmt::Display for MatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Career aggregate a player leaderboard is ranked by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerMetric {
    #[default]
    Runs,
    Wickets,
    Matches,
}

impl PlayerMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerMetric::Runs => "runs",
            PlayerMetric::Wickets => "wickets",
            PlayerMetric::Matches => "matches",
        }
    }
}

impl FromStr for PlayerMetric {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "runs" => Ok(PlayerMetric::Runs),
            "wickets" => Ok(PlayerMetric::Wickets),
            "matches" => Ok(PlayerMetric::Matches),
            _ => Err(ParseEnumError::new("player metric", s)),
        }
    }
}

impl fmt::Display for PlayerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted team row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub country: Option<String>,
    pub founded_year: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_runs: i64,
    pub total_wickets: i64,
    pub total_matches: i64,
    pub highest_score: i64,
    pub best_bowling: Option<String>,
}

/// Persisted player row, with the owning team's name joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub external_id: Option<String>,
    pub full_name: String,
    pub role: Option<PlayerRole>,
    pub batting_style: Option<String>,
    pub bowling_style: Option<String>,
    pub team_id: Option<i64>,
    pub team_name: Option<String>,
    pub stats: PlayerStats,
    pub updated_at: DateTime<Utc>,
}

/// Persisted match row, with team names joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: i64,
    pub external_id: Option<String>,
    pub status: MatchStatus,
    pub format: MatchFormat,
    pub team1_id: i64,
    pub team2_id: i64,
    pub winner_id: Option<i64>,
    pub team1_name: String,
    pub team2_name: String,
    pub winner_name: Option<String>,
    pub team1_score: Option<String>,
    pub team2_score: Option<String>,
    pub result: Option<String>,
    pub venue: Option<String>,
    pub competition: Option<String>,
    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCandidate {
    pub name: String,
    pub short_name: Option<String>,
    pub country: Option<String>,
    pub founded_year: Option<i32>,
}

impl TeamCandidate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            country: None,
            founded_year: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCandidate {
    pub external_id: Option<String>,
    pub full_name: String,
    pub role: PlayerRole,
    pub batting_style: Option<String>,
    pub bowling_style: Option<String>,
    pub team_name: Option<String>,
    pub stats: PlayerStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub external_id: String,
    pub status: Option<MatchStatus>,
    pub format: Option<MatchFormat>,
    pub team1: String,
    pub team2: String,
    pub winner: Option<String>,
    pub team1_score: Option<String>,
    pub team2_score: Option<String>,
    pub result: Option<String>,
    pub venue: Option<String>,
    pub competition: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Candidate {
    Team(TeamCandidate),
    Player(PlayerCandidate),
    Match(MatchCandidate),
}

/// Provenance tag for a candidate: parsed from source text, or filled in by
/// a fallback. Both are accepted downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provenance", content = "record", rename_all = "snake_case")]
pub enum Sourced<T> {
    Extracted(T),
    Synthesized(T),
}

impl<T> Sourced<T> {
    pub fn record(&self) -> &T {
        match self {
            Sourced::Extracted(record) | Sourced::Synthesized(record) => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Sourced::Extracted(record) | Sourced::Synthesized(record) => record,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, Sourced::Synthesized(_))
    }
}

/// One ingestion run's worth of candidates, grouped by entity type in the
/// order the reconciler processes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBatch {
    pub teams: Vec<Sourced<TeamCandidate>>,
    pub players: Vec<Sourced<PlayerCandidate>>,
    pub matches: Vec<Sourced<MatchCandidate>>,
}

impl CandidateBatch {
    pub fn push(&mut self, candidate: Sourced<Candidate>) {
        let synthesized = candidate.is_synthesized();
        match candidate.into_record() {
            Candidate::Team(team) => self.teams.push(retag(synthesized, team)),
            Candidate::Player(player) => self.players.push(retag(synthesized, player)),
            Candidate::Match(m) => self.matches.push(retag(synthesized, m)),
        }
    }

    pub fn extend(&mut self, other: CandidateBatch) {
        self.teams.extend(other.teams);
        self.players.extend(other.players);
        self.matches.extend(other.matches);
    }

    pub fn len(&self) -> usize {
        self.teams.len() + self.players.len() + self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn synthesized_count(&self) -> usize {
        self.teams.iter().filter(|c| c.is_synthesized()).count()
            + self.players.iter().filter(|c| c.is_synthesized()).count()
            + self.matches.iter().filter(|c| c.is_synthesized()).count()
    }
}

fn retag<T>(synthesized: bool, record: T) -> Sourced<T> {
    if synthesized {
        Sourced::Synthesized(record)
    } else {
        Sourced::Extracted(record)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic match identifier for sources that carry no native id.
/// The same teams, competition and leading text always hash to the same key.
pub fn derive_match_external_id(
    team1: &str,
    team2: &str,
    competition: &str,
    snippet: &str,
) -> String {
    let snippet: String = snippet.chars().take(50).collect();
    let key = format!("{team1}_{team2}_{competition}_{snippet}");
    format!("cb_{}", &sha256_hex(key.as_bytes())[..16])
}

pub fn derive_player_external_id(full_name: &str, team_name: Option<&str>) -> String {
    let key = format!(
        "{}|{}",
        normalize_name(full_name),
        team_name.map(normalize_name).unwrap_or_default()
    );
    format!("pl_{}", &sha256_hex(key.as_bytes())[..16])
}

fn normalize_name(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
