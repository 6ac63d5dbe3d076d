//! Static reference data: the known-team dictionary, the player roster and
//! venue pools used by the synthetic fallback.

use crease_core::{PlayerRole, TeamCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownTeam {
    pub name: &'static str,
    pub code: &'static str,
    pub demonym: Option<&'static str>,
    pub founded_year: i32,
}

impl KnownTeam {
    pub fn candidate(&self) -> TeamCandidate {
        TeamCandidate {
            name: self.name.to_string(),
            short_name: Some(self.code.to_string()),
            country: Some(self.name.to_string()),
            founded_year: Some(self.founded_year),
        }
    }

    pub fn is_major(&self) -> bool {
        MAJOR_TEAMS.contains(&self.name)
    }
}

const fn team(
    name: &'static str,
    code: &'static str,
    demonym: Option<&'static str>,
    founded_year: i32,
) -> KnownTeam {
    KnownTeam {
        name,
        code,
        demonym,
        founded_year,
    }
}

pub static KNOWN_TEAMS: [KnownTeam; 14] = [
    team("India", "IND", Some("Indian"), 1932),
    team("Australia", "AUS", Some("Australian"), 1905),
    team("England", "ENG", Some("English"), 1877),
    team("Pakistan", "PAK", Some("Pakistani"), 1952),
    team("New Zealand", "NZ", None, 1934),
    team("South Africa", "SA", Some("South African"), 1889),
    team("West Indies", "WI", Some("West Indian"), 1928),
    team("Bangladesh", "BAN", Some("Bangladeshi"), 1972),
    team("Sri Lanka", "SL", Some("Sri Lankan"), 1981),
    team("Afghanistan", "AFG", Some("Afghan"), 1995),
    team("Zimbabwe", "ZIM", Some("Zimbabwean"), 1992),
    team("Ireland", "IRE", Some("Irish"), 1855),
    team("Scotland", "SCO", Some("Scottish"), 1909),
    team("Netherlands", "NED", Some("Dutch"), 1883),
];

/// Synthetic fixtures draw their sides from the first eight dictionary teams.
pub const SYNTHETIC_TEAM_POOL: usize = 8;

pub const MAJOR_TEAMS: [&str; 4] = ["India", "Australia", "England", "Pakistan"];

/// Case-insensitive lookup by full name or short code.
pub fn known_team(name: &str) -> Option<&'static KnownTeam> {
    let needle = name.trim();
    KNOWN_TEAMS
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(needle) || t.code.eq_ignore_ascii_case(needle))
}

pub fn reference_team_candidates() -> Vec<TeamCandidate> {
    KNOWN_TEAMS.iter().map(KnownTeam::candidate).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub full_name: &'static str,
    pub team: &'static str,
    pub role: PlayerRole,
    pub batting_style: Option<&'static str>,
    pub bowling_style: Option<&'static str>,
}

const fn player(
    full_name: &'static str,
    team: &'static str,
    role: PlayerRole,
    batting_style: Option<&'static str>,
    bowling_style: Option<&'static str>,
) -> RosterEntry {
    RosterEntry {
        full_name,
        team,
        role,
        batting_style,
        bowling_style,
    }
}

const RHB: Option<&str> = Some("Right-hand bat");
const LHB: Option<&str> = Some("Left-hand bat");

pub static ROSTER: [RosterEntry; 26] = [
    player("Virat Kohli", "India", PlayerRole::Batsman, RHB, None),
    player("Rohit Sharma", "India", PlayerRole::Batsman, RHB, None),
    player("Jasprit Bumrah", "India", PlayerRole::Bowler, None, Some("Right-arm fast")),
    player("Ravindra Jadeja", "India", PlayerRole::AllRounder, LHB, Some("Left-arm orthodox")),
    player("KL Rahul", "India", PlayerRole::WicketKeeper, RHB, None),
    player("Steve Smith", "Australia", PlayerRole::Batsman, RHB, None),
    player("Pat Cummins", "Australia", PlayerRole::Bowler, None, Some("Right-arm fast")),
    player("David Warner", "Australia", PlayerRole::Batsman, LHB, None),
    player("Glenn Maxwell", "Australia", PlayerRole::AllRounder, RHB, Some("Right-arm offbreak")),
    player("Mitchell Starc", "Australia", PlayerRole::Bowler, None, Some("Left-arm fast")),
    player("Joe Root", "England", PlayerRole::Batsman, RHB, None),
    player("Ben Stokes", "England", PlayerRole::AllRounder, LHB, Some("Right-arm fast-medium")),
    player("Jos Buttler", "England", PlayerRole::WicketKeeper, RHB, None),
    player("Jofra Archer", "England", PlayerRole::Bowler, None, Some("Right-arm fast")),
    player("Jonny Bairstow", "England", PlayerRole::WicketKeeper, RHB, None),
    player("Babar Azam", "Pakistan", PlayerRole::Batsman, RHB, None),
    player("Shaheen Afridi", "Pakistan", PlayerRole::Bowler, None, Some("Left-arm fast")),
    player("Mohammad Rizwan", "Pakistan", PlayerRole::WicketKeeper, RHB, None),
    player("Shadab Khan", "Pakistan", PlayerRole::AllRounder, RHB, Some("Right-arm legbreak")),
    player("Haris Rauf", "Pakistan", PlayerRole::Bowler, None, Some("Right-arm fast")),
    player("Kane Williamson", "New Zealand", PlayerRole::Batsman, RHB, None),
    player("Trent Boult", "New Zealand", PlayerRole::Bowler, None, Some("Left-arm fast-medium")),
    player("Tim Southee", "New Zealand", PlayerRole::Bowler, None, Some("Right-arm fast-medium")),
    player("Quinton de Kock", "South Africa", PlayerRole::WicketKeeper, LHB, None),
    player("Kagiso Rabada", "South Africa", PlayerRole::Bowler, None, Some("Right-arm fast")),
    player("Dasun Shanaka", "Sri Lanka", PlayerRole::AllRounder, RHB, Some("Right-arm medium")),
];

pub fn venues_for(competition: &str) -> &'static [&'static str] {
    match competition {
        "ICC World Cup" => &[
            "Wankhede Stadium, Mumbai",
            "Eden Gardens, Kolkata",
            "Melbourne Cricket Ground",
            "Lord's, London",
        ],
        "Indian Premier League" => &[
            "Wankhede Stadium, Mumbai",
            "M. Chinnaswamy Stadium, Bengaluru",
            "Arun Jaitley Stadium, Delhi",
            "MA Chidambaram Stadium, Chennai",
        ],
        "Ashes" => &[
            "Lord's, London",
            "The Oval, London",
            "Melbourne Cricket Ground",
            "Sydney Cricket Ground",
        ],
        "International Series" => &[
            "Dubai International Stadium",
            "Sharjah Cricket Stadium",
            "Gaddafi Stadium, Lahore",
            "National Stadium, Karachi",
        ],
        _ => &[
            "Wankhede Stadium, Mumbai",
            "Eden Gardens, Kolkata",
            "Lord's, London",
            "Melbourne Cricket Ground",
            "Sydney Cricket Ground",
            "Dubai International Stadium",
        ],
    }
}
