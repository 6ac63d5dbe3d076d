//! Heuristic extraction: one card of source text in, at most one candidate out.
//!
//! Every function here is pure. Randomness is only consulted by the
//! `*_with_fallback` entry points, and anything it fills in tags the
//! resulting candidate as [`Sourced::Synthesized`].

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use crease_core::{
    derive_match_external_id, derive_player_external_id, Candidate, MatchCandidate, MatchFormat,
    MatchStatus, PlayerCandidate, PlayerRole, PlayerStats, Sourced,
};
use rand::rngs::StdRng;
use rand::Rng;
use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::reference::{known_team, venues_for, KnownTeam, KNOWN_TEAMS};
use crate::synthetic::{random_outcome, random_pair, random_score};
use crate::AdapterError;

pub const MIN_CARD_CHARS: usize = 20;
pub const MAX_CARDS_PER_PAGE: usize = 15;
const VS_CARD_MAX_CHARS: usize = 500;
const EXTERNAL_ID_SNIPPET_CHARS: usize = 50;

static VS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\s+[Vv][Ss]\.?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)")
        .expect("vs pattern compiles")
});

// runs/wickets, runs-wickets, runs (overs)
static SCORE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\b(\d{1,3}/\d{1,2})\b").expect("slash score compiles"),
        Regex::new(r"\b(\d{1,3}-\d{1,2})\b").expect("dash score compiles"),
        Regex::new(r"(?:^|[\s,;])(\d{1,3}\s*\(\d{1,3}(?:\.\d)?\s*ov(?:ers)?\))")
            .expect("overs score compiles"),
    ]
});

static STAT_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bruns\s*:?\s*(\d{1,6})\b").expect("runs label compiles"));
static STAT_WICKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:wickets|wkts)\s*:?\s*(\d{1,4})\b").expect("wickets label compiles")
});
static STAT_MATCHES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:matches|mat)\s*:?\s*(\d{1,4})\b").expect("matches label compiles")
});
static STAT_HIGHEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bHS\s*:?\s*(\d{1,3})\*?").expect("HS label compiles"));
static STAT_BEST_BOWLING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bBBI\s*:?\s*(\d{1,2}/\d{1,3})\b").expect("BBI label compiles")
});
static BATTING_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:right|left)-hand(?:ed)? bat)\b").expect("batting style compiles")
});
static BOWLING_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:right|left)-arm\s+(?:fast-medium|medium-fast|fast|medium|offbreak|off-?spin|legbreak|leg-?spin|orthodox|chinaman)(?:\s+googly)?)",
    )
    .expect("bowling style compiles")
});

const STATUS_RULES: [(MatchStatus, &[&str]); 3] = [
    (MatchStatus::Live, &["live", "innings", "overs", "wicket", "wickets", "balls"]),
    (MatchStatus::Completed, &["won", "beat", "result"]),
    (MatchStatus::Scheduled, &["tomorrow", "scheduled", "upcoming"]),
];

const FORMAT_RULES: [(&[&str], MatchFormat); 5] = [
    (&["test"], MatchFormat::Test),
    (&["odi", "one day", "one-day"], MatchFormat::Odi),
    (&["t20", "t20i", "twenty20"], MatchFormat::T20),
    (&["world cup"], MatchFormat::Odi),
    (&["ipl", "premier league"], MatchFormat::T20),
];

// More specific names first: "t20 world cup" must win over "world cup".
const COMPETITIONS: [(&str, &[&str]); 12] = [
    ("ICC T20 World Cup", &["t20 world cup"]),
    ("ICC World Cup", &["world cup"]),
    ("World Test Championship", &["world test championship", "wtc"]),
    ("Asia Cup", &["asia cup"]),
    ("Ashes", &["ashes"]),
    ("Border-Gavaskar Trophy", &["border-gavaskar", "border gavaskar"]),
    ("Indian Premier League", &["indian premier league", "ipl"]),
    ("Big Bash League", &["big bash", "bbl"]),
    ("Pakistan Super League", &["pakistan super league", "psl"]),
    ("Caribbean Premier League", &["caribbean premier league", "cpl"]),
    ("The Hundred", &["the hundred"]),
    ("County Championship", &["county"]),
];

const ROLE_KEYWORDS: [(&str, PlayerRole); 9] = [
    ("all-rounder", PlayerRole::AllRounder),
    ("allrounder", PlayerRole::AllRounder),
    ("all rounder", PlayerRole::AllRounder),
    ("wicket-keeper", PlayerRole::WicketKeeper),
    ("wicketkeeper", PlayerRole::WicketKeeper),
    ("wicket keeper", PlayerRole::WicketKeeper),
    ("bowler", PlayerRole::Bowler),
    ("batsman", PlayerRole::Batsman),
    ("batter", PlayerRole::Batsman),
];

/// Known team named in a card, with the byte offset of its first mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamMention {
    pub team: &'static KnownTeam,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub winner: Option<String>,
    pub result: String,
}

struct Sides<'a> {
    team1: &'a str,
    team2: &'a str,
}

impl<'a> Sides<'a> {
    fn both(&self) -> [&'a str; 2] {
        [self.team1, self.team2]
    }
}

type ResultHandler = fn(&Captures<'_>, &Sides<'_>, &str) -> Option<Outcome>;

struct ResultRule {
    name: &'static str,
    pattern: Regex,
    handler: ResultHandler,
}

fn result_rule(name: &'static str, pattern: &str, handler: ResultHandler) -> ResultRule {
    ResultRule {
        name,
        pattern: Regex::new(pattern).expect("result pattern compiles"),
        handler,
    }
}

/// Evaluated in order; the first rule whose handler yields an outcome wins.
static RESULT_RULES: LazyLock<Vec<ResultRule>> = LazyLock::new(|| {
    vec![
        result_rule(
            "winner_won_by",
            r"(?i)\b(\w+)\s+won\s+by\s+(\d+)\s+(runs?|wickets?)\b",
            named_winner_by_margin,
        ),
        result_rule(
            "winner_beat_loser",
            r"(?i)\b(\w+)\s+beat\s+(\w+)\s+by\s+(\d+)\s+(runs?|wickets?)\b",
            beat_by_margin,
        ),
        result_rule(
            "generic_won_by",
            r"(?i)\bwon\s+by\s+(\d+)\s+(runs?|wickets?)\b",
            nearest_winner_by_margin,
        ),
        result_rule(
            "winner_won_match",
            r"(?i)\b(\w+)\s+won\s+the\s+match\b",
            named_winner_of_match,
        ),
    ]
});

fn named_winner_by_margin(caps: &Captures<'_>, sides: &Sides<'_>, _text: &str) -> Option<Outcome> {
    let winner = resolve_winner_token(&caps[1], sides)?;
    Some(margin_outcome(winner, &caps[2], &caps[3]))
}

fn beat_by_margin(caps: &Captures<'_>, sides: &Sides<'_>, _text: &str) -> Option<Outcome> {
    let winner = resolve_winner_token(&caps[1], sides)?;
    Some(margin_outcome(winner, &caps[3], &caps[4]))
}

fn nearest_winner_by_margin(caps: &Captures<'_>, sides: &Sides<'_>, text: &str) -> Option<Outcome> {
    let phrase_start = caps.get(0)?.start();
    let before = &text[..phrase_start];
    let winner = sides
        .both()
        .into_iter()
        .filter_map(|side| last_team_mention(before, side).map(|pos| (pos, side)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, side)| side)?;
    Some(margin_outcome(winner, &caps[1], &caps[2]))
}

fn named_winner_of_match(caps: &Captures<'_>, sides: &Sides<'_>, _text: &str) -> Option<Outcome> {
    let winner = resolve_winner_token(&caps[1], sides)?;
    Some(Outcome {
        winner: Some(winner.to_string()),
        result: format!("{winner} won the match"),
    })
}

fn margin_outcome(winner: &str, margin: &str, unit: &str) -> Outcome {
    Outcome {
        winner: Some(winner.to_string()),
        result: format!("{winner} won by {margin} {}", unit.to_ascii_lowercase()),
    }
}

/// Maps a single captured word onto one of the two sides: whole-word
/// containment first, then short code or demonym, then a close fuzzy match.
fn resolve_winner_token<'a>(token: &str, sides: &Sides<'a>) -> Option<&'a str> {
    let token = token.to_ascii_lowercase();
    if token.len() < 2 {
        return None;
    }

    let contained = sides.both().into_iter().find(|side| {
        let side = side.to_ascii_lowercase();
        side == token || side.split_whitespace().any(|word| word == token)
    });
    if contained.is_some() {
        return contained;
    }

    let aliased = sides.both().into_iter().find(|side| {
        known_team(side).is_some_and(|team| {
            team.code.eq_ignore_ascii_case(&token)
                || team.demonym.is_some_and(|d| d.eq_ignore_ascii_case(&token))
        })
    });
    if aliased.is_some() {
        return aliased;
    }

    sides
        .both()
        .into_iter()
        .map(|side| (strsim::jaro_winkler(&token, &side.to_ascii_lowercase()), side))
        .filter(|(score, _)| *score >= 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, side)| side)
}

pub fn normalize_card_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_texts(
    document: &Html,
    selector: &str,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<String>, AdapterError> {
    let sel = Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))?;
    let mut out: Vec<String> = Vec::new();
    for text in document.select(&sel).map(element_text) {
        if text.is_empty() || !keep(&text) || out.contains(&text) {
            continue;
        }
        out.push(text);
        if out.len() == MAX_CARDS_PER_PAGE {
            break;
        }
    }
    Ok(out)
}

/// Splits a page into card texts. Tries the match-list containers, then the
/// live-score anchors, then any short `div` mentioning "vs".
pub fn select_cards(html: &str) -> Result<Vec<String>, AdapterError> {
    let document = Html::parse_document(html);
    let strategies = [
        r#"div[class*="cb-mtch-lst"], div[class*="cb-plyr-tbody"]"#,
        r#"a[class*="cb-lv-main"]"#,
    ];
    for selector in strategies {
        let cards = select_texts(&document, selector, |_| true)?;
        if !cards.is_empty() {
            return Ok(cards);
        }
    }
    select_texts(&document, "div", |text| {
        text.contains("vs") && text.chars().count() < VS_CARD_MAX_CHARS
    })
}

/// True when the page title carries an error signature.
pub fn is_error_page(html: &str) -> bool {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("title") else {
        return false;
    };
    document
        .select(&sel)
        .next()
        .map(|title| {
            let title = element_text(title).to_ascii_lowercase();
            title.contains("error") || title.contains("page not found")
        })
        .unwrap_or(false)
}

fn is_word_boundary(haystack: &str, start: usize, end: usize) -> bool {
    let before = haystack[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric());
    let after = haystack[end..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_alphanumeric());
    before && after
}

fn phrase_positions<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    haystack
        .match_indices(needle)
        .map(|(i, _)| i)
        .filter(move |&i| is_word_boundary(haystack, i, i + needle.len()))
}

fn find_phrase(haystack: &str, needle: &str) -> Option<usize> {
    phrase_positions(haystack, needle).next()
}

fn contains_phrase(haystack: &str, needle: &str) -> bool {
    find_phrase(haystack, needle).is_some()
}

/// Demonyms only count when used on their own: "Indian" names India, but
/// "Indian Premier League" does not.
fn find_demonym(text: &str, lower: &str, demonym: &str) -> Option<usize> {
    let needle = demonym.to_ascii_lowercase();
    let found = phrase_positions(lower, &needle).find(|&i| {
        !text[i + needle.len()..]
            .trim_start()
            .starts_with(|c: char| c.is_uppercase())
    });
    found
}

fn first_mention(text: &str, lower: &str, team: &KnownTeam) -> Option<usize> {
    let by_name = find_phrase(lower, &team.name.to_ascii_lowercase());
    let by_code = find_phrase(text, team.code);
    let by_demonym = team.demonym.and_then(|d| find_demonym(text, lower, d));
    [by_name, by_code, by_demonym].into_iter().flatten().min()
}

fn last_team_mention(text: &str, side: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let by_name = phrase_positions(&lower, &side.to_ascii_lowercase()).last();
    let by_code = known_team(side).and_then(|team| phrase_positions(text, team.code).last());
    by_name.into_iter().chain(by_code).max()
}

/// Known teams in order of first appearance.
pub fn recognize_teams(text: &str) -> Vec<TeamMention> {
    let lower = text.to_ascii_lowercase();
    let mut mentions: Vec<TeamMention> = KNOWN_TEAMS
        .iter()
        .filter_map(|team| {
            first_mention(text, &lower, team).map(|position| TeamMention { team, position })
        })
        .collect();
    mentions.sort_by_key(|m| m.position);
    mentions
}

fn canonical_team_name(raw: &str) -> String {
    known_team(raw)
        .map(|team| team.name.to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Dictionary teams first, then the "<A> vs <B>" pattern.
fn resolve_sides(text: &str, mentions: &[TeamMention]) -> Option<(String, String)> {
    if let [first, second, ..] = mentions {
        return Some((first.team.name.to_string(), second.team.name.to_string()));
    }
    let caps = VS_PATTERN.captures(text)?;
    let team1 = canonical_team_name(&caps[1]);
    let team2 = canonical_team_name(&caps[2]);
    if team1.eq_ignore_ascii_case(&team2) {
        return None;
    }
    Some((team1, team2))
}

/// Live-state words beat result words beat future-state words.
pub fn classify_status(text: &str) -> Option<MatchStatus> {
    let lower = text.to_ascii_lowercase();
    STATUS_RULES
        .iter()
        .find(|(_, words)| words.iter().any(|w| contains_phrase(&lower, w)))
        .map(|(status, _)| *status)
}

/// Up to two distinct scores. Patterns are tried in order and each one adds
/// its matches in text order until two scores are held.
pub fn extract_scores(text: &str) -> Vec<String> {
    let mut scores: Vec<String> = Vec::new();
    for pattern in SCORE_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(found) = caps.get(1) else {
                continue;
            };
            if is_date_fragment(text, found.start(), found.end()) {
                continue;
            }
            let score = found.as_str().to_string();
            if !scores.contains(&score) {
                scores.push(score);
            }
            if scores.len() == 2 {
                return scores;
            }
        }
    }
    scores
}

/// A score-shaped token glued to further digits by `-` or `/` is part of a
/// date such as `2023-11-28` or `28/11/2023`.
fn is_date_fragment(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let glued_before = start >= 2
        && matches!(bytes[start - 1], b'-' | b'/')
        && bytes[start - 2].is_ascii_digit();
    let glued_after = end + 1 < bytes.len()
        && matches!(bytes[end], b'-' | b'/')
        && bytes[end + 1].is_ascii_digit();
    glued_before || glued_after
}

pub fn extract_result(text: &str, team1: &str, team2: &str) -> Option<Outcome> {
    let sides = Sides { team1, team2 };
    RESULT_RULES.iter().find_map(|rule| {
        let caps = rule.pattern.captures(text)?;
        let outcome = (rule.handler)(&caps, &sides, text)?;
        debug!(rule = rule.name, result = %outcome.result, "result pattern matched");
        Some(outcome)
    })
}

pub fn classify_format(text: &str) -> Option<MatchFormat> {
    let lower = text.to_ascii_lowercase();
    FORMAT_RULES
        .iter()
        .find(|(words, _)| words.iter().any(|w| contains_phrase(&lower, w)))
        .map(|(_, format)| *format)
}

pub fn classify_competition(text: &str, teams: &[&str]) -> String {
    let lower = text.to_ascii_lowercase();
    if let Some((name, _)) = COMPETITIONS
        .iter()
        .find(|(_, keys)| keys.iter().any(|k| contains_phrase(&lower, k)))
    {
        return (*name).to_string();
    }
    if teams
        .iter()
        .any(|t| known_team(t).is_some_and(KnownTeam::is_major))
    {
        "International Series".to_string()
    } else {
        "Domestic Tournament".to_string()
    }
}

/// Stable part of a card for id derivation: everything before the first
/// score, so score updates on a live card keep the same id.
fn id_snippet(text: &str) -> String {
    let cut = SCORE_PATTERNS
        .iter()
        .filter_map(|p| p.find(text).map(|m| m.start()))
        .min()
        .unwrap_or(text.len());
    text[..cut].trim().chars().take(EXTERNAL_ID_SNIPPET_CHARS).collect()
}

fn labelled_number(pattern: &Regex, text: &str) -> Option<i64> {
    pattern.captures(text).and_then(|caps| caps[1].parse().ok())
}

fn labelled_text(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|caps| caps[1].to_string())
}

fn extract_player(text: &str, mentions: &[TeamMention]) -> Option<PlayerCandidate> {
    let lower = text.to_ascii_lowercase();
    let (role_pos, role) = ROLE_KEYWORDS
        .iter()
        .filter_map(|(keyword, role)| find_phrase(&lower, keyword).map(|pos| (pos, *role)))
        .min_by_key(|(pos, _)| *pos)?;

    let runs = labelled_number(&STAT_RUNS, text);
    let wickets = labelled_number(&STAT_WICKETS, text);
    let matches = labelled_number(&STAT_MATCHES, text);
    if runs.is_none() && wickets.is_none() && matches.is_none() {
        return None;
    }

    let first_digit = text.find(|c: char| c.is_ascii_digit());
    let batting_pos = BATTING_STYLE.find(text).map(|m| m.start());
    let cutoff = [Some(role_pos), mentions.first().map(|m| m.position), first_digit, batting_pos]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
    let name = text[..cutoff]
        .trim()
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .trim();
    let words = name.split_whitespace().count();
    if words == 0 || words > 5 || !name.starts_with(|c: char| c.is_uppercase()) {
        return None;
    }

    let team_name = mentions.first().map(|m| m.team.name.to_string());
    Some(PlayerCandidate {
        external_id: Some(derive_player_external_id(name, team_name.as_deref())),
        full_name: name.to_string(),
        role,
        batting_style: labelled_text(&BATTING_STYLE, text),
        bowling_style: labelled_text(&BOWLING_STYLE, text),
        team_name,
        stats: PlayerStats {
            total_runs: runs.unwrap_or(0),
            total_wickets: wickets.unwrap_or(0),
            total_matches: matches.unwrap_or(0),
            highest_score: labelled_number(&STAT_HIGHEST, text).unwrap_or(0),
            best_bowling: labelled_text(&STAT_BEST_BOWLING, text),
        },
    })
}

/// Home ground of a competition: the first entry of its venue pool.
pub fn venue_for_competition(competition: &str) -> Option<String> {
    venues_for(competition).first().map(|v| (*v).to_string())
}

/// Start time implied by a card's status, relative to `now`. Finished games
/// are placed a day back, live ones two hours back and upcoming ones a day
/// ahead.
pub fn estimate_start_time(
    status: Option<MatchStatus>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match status? {
        MatchStatus::Completed => Some(now - Duration::days(1)),
        MatchStatus::Live => Some(now - Duration::hours(2)),
        MatchStatus::Scheduled => Some(now + Duration::days(1)),
        MatchStatus::Cancelled => None,
    }
}

/// Strict extraction: returns `None` rather than inventing anything.
pub fn extract_card(text: &str, now: DateTime<Utc>) -> Option<Sourced<Candidate>> {
    extract_card_inner(text, now, None::<&mut StdRng>)
}

/// Like [`extract_card`], but fills missing teams, scores and results from
/// `rng`. Any filled field tags the candidate as synthesized.
pub fn extract_card_with_fallback<R: Rng + ?Sized>(
    text: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Option<Sourced<Candidate>> {
    extract_card_inner(text, now, Some(rng))
}

fn extract_card_inner<R: Rng + ?Sized>(
    raw: &str,
    now: DateTime<Utc>,
    mut rng: Option<&mut R>,
) -> Option<Sourced<Candidate>> {
    let text = normalize_card_text(raw);
    if text.chars().count() < MIN_CARD_CHARS {
        return None;
    }
    let lower = text.to_ascii_lowercase();
    let mentions = recognize_teams(&text);

    if mentions.len() < 2 {
        if let Some(player) = extract_player(&text, &mentions) {
            return Some(Sourced::Extracted(Candidate::Player(player)));
        }
    }

    let status = classify_status(&text);
    let scores = extract_scores(&text);
    let match_like = status.is_some() || !scores.is_empty() || contains_phrase(&lower, "vs");
    if !match_like {
        return match mentions.as_slice() {
            [only] => Some(Sourced::Extracted(Candidate::Team(only.team.candidate()))),
            _ => None,
        };
    }

    let mut synthesized = false;
    let (team1, team2) = match resolve_sides(&text, &mentions) {
        Some(sides) => sides,
        None => {
            let rng = rng.as_deref_mut()?;
            synthesized = true;
            let (a, b) = random_pair(rng);
            (a.name.to_string(), b.name.to_string())
        }
    };

    let mut scores = scores.into_iter();
    let mut team1_score = scores.next();
    let mut team2_score = scores.next();
    let in_play = matches!(status, Some(MatchStatus::Live | MatchStatus::Completed));
    if team1_score.is_none() && in_play {
        if let Some(rng) = rng.as_deref_mut() {
            team1_score = Some(random_score(rng));
            team2_score = Some(random_score(rng));
            synthesized = true;
        }
    }

    let mut outcome = None;
    if status != Some(MatchStatus::Scheduled) {
        outcome = extract_result(&text, &team1, &team2);
    }
    if outcome.is_none() && status == Some(MatchStatus::Completed) {
        if let Some(rng) = rng.as_deref_mut() {
            outcome = Some(random_outcome(rng, &team1, &team2));
            synthesized = true;
        }
    }
    let (winner, result) = match outcome {
        Some(Outcome { winner, result }) => (winner, Some(result)),
        None => (None, None),
    };

    let competition = classify_competition(&text, &[team1.as_str(), team2.as_str()]);
    let candidate = Candidate::Match(MatchCandidate {
        external_id: derive_match_external_id(&team1, &team2, &competition, &id_snippet(&text)),
        status,
        format: classify_format(&text),
        team1,
        team2,
        winner,
        team1_score,
        team2_score,
        result,
        venue: venue_for_competition(&competition),
        competition: Some(competition),
        start_time: estimate_start_time(status, now),
    });

    Some(if synthesized {
        Sourced::Synthesized(candidate)
    } else {
        Sourced::Extracted(candidate)
    })
}

/// Strict page extraction. Selection failures yield an empty list.
pub fn extract_page(html: &str, now: DateTime<Utc>) -> Vec<Sourced<Candidate>> {
    let cards = match select_cards(html) {
        Ok(cards) => cards,
        Err(err) => {
            debug!(error = %err, "card selection failed");
            return Vec::new();
        }
    };
    cards
        .iter()
        .filter_map(|card| extract_card(card, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn as_match(candidate: Sourced<Candidate>) -> (bool, MatchCandidate) {
        let synthesized = candidate.is_synthesized();
        match candidate.into_record() {
            Candidate::Match(m) => (synthesized, m),
            other => panic!("expected match candidate, got {other:?}"),
        }
    }

    #[test]
    fn live_keywords_take_priority_over_result_words() {
        assert_eq!(
            classify_status("LIVE: India won the toss and elected to bat"),
            Some(MatchStatus::Live)
        );
        assert_eq!(
            classify_status("Australia beat England, result confirmed"),
            Some(MatchStatus::Completed)
        );
        assert_eq!(
            classify_status("India vs Pakistan scheduled for tomorrow"),
            Some(MatchStatus::Scheduled)
        );
        assert_eq!(classify_status("India vs Pakistan at Eden Gardens"), None);
        assert_eq!(classify_status("An olive branch was delivered"), None);
    }

    #[test]
    fn slash_scores_win_and_keep_team_order() {
        assert_eq!(
            extract_scores("India 175/4 (20 ov), Australia 160/8 (20 ov)"),
            vec!["175/4".to_string(), "160/8".to_string()]
        );
        assert_eq!(
            extract_scores("England 210-6 vs Ireland 180-9"),
            vec!["210-6".to_string(), "180-9".to_string()]
        );
        assert_eq!(
            extract_scores("Scotland 143 (19.4 ov) chasing"),
            vec!["143 (19.4 ov)".to_string()]
        );
    }

    #[test]
    fn date_fragments_are_not_scores() {
        let scheduled = "India vs Australia, 1st ODI, starts 2023-11-28 at Wankhede";
        assert!(extract_scores(scheduled).is_empty());
        assert!(extract_scores("England vs Ireland on 28/11/2023, Lord's").is_empty());
        assert_eq!(
            extract_scores("Played 2023-11-28: India 241/4, Australia 240-10"),
            vec!["241/4".to_string(), "240-10".to_string()]
        );
    }

    #[test]
    fn scheduled_card_with_a_date_keeps_scores_empty() {
        let candidate =
            extract_card("India vs Australia, 1st ODI, upcoming 2023-11-28 at Wankhede", now())
                .unwrap();
        let (_, m) = as_match(candidate);
        assert_eq!(m.status, Some(MatchStatus::Scheduled));
        assert_eq!(m.team1_score, None);
        assert_eq!(m.team2_score, None);
    }

    #[test]
    fn venue_and_start_follow_competition_and_status() {
        let candidate = extract_card(
            "India vs Australia, ICC World Cup Final - India won by 70 runs. \
             India 310/4, Australia 240/10",
            now(),
        )
        .unwrap();
        let (synthesized, m) = as_match(candidate);
        assert!(!synthesized);
        assert_eq!(m.status, Some(MatchStatus::Completed));
        assert_eq!(m.competition.as_deref(), Some("ICC World Cup"));
        assert_eq!(m.venue.as_deref(), Some("Wankhede Stadium, Mumbai"));
        assert_eq!(m.start_time, Some(now() - Duration::days(1)));

        assert_eq!(
            estimate_start_time(Some(MatchStatus::Live), now()),
            Some(now() - Duration::hours(2))
        );
        assert_eq!(
            estimate_start_time(Some(MatchStatus::Scheduled), now()),
            Some(now() + Duration::days(1))
        );
        assert_eq!(estimate_start_time(None, now()), None);
        assert_eq!(venue_for_competition("Ashes").as_deref(), Some("Lord's, London"));
    }

    #[test]
    fn result_rules_apply_in_order() {
        let outcome = extract_result("India won by 37 runs", "India", "Australia").unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("India"));
        assert_eq!(outcome.result, "India won by 37 runs");

        let outcome =
            extract_result("Australia beat India by 6 wickets", "India", "Australia").unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("Australia"));
        assert_eq!(outcome.result, "Australia won by 6 wickets");

        let outcome =
            extract_result("South Africa won by 2 wickets", "England", "South Africa").unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("South Africa"));

        let outcome =
            extract_result("Pakistan won the match in a thriller", "Pakistan", "England").unwrap();
        assert_eq!(outcome.result, "Pakistan won the match");
    }

    #[test]
    fn generic_margin_picks_nearest_preceding_team() {
        let outcome = extract_result(
            "England 250/8, Pakistan 251/3 - the game was won by 7 wickets",
            "England",
            "Pakistan",
        )
        .unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("Pakistan"));
        assert_eq!(outcome.result, "Pakistan won by 7 wickets");
    }

    #[test]
    fn winner_token_resolves_codes_before_fuzzy_matches() {
        let outcome = extract_result("IND won by 5 runs", "India", "West Indies").unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("India"));
        let outcome = extract_result("Indies won by 5 runs", "India", "West Indies").unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("West Indies"));
    }

    #[test]
    fn unknown_outcome_is_left_empty_in_strict_mode() {
        let candidate =
            extract_card("Final result: India vs Australia, match abandoned after rain", now())
                .unwrap();
        let (synthesized, m) = as_match(candidate);
        assert!(!synthesized);
        assert_eq!(m.status, Some(MatchStatus::Completed));
        assert_eq!(m.winner, None);
        assert_eq!(m.result, None);
    }

    #[test]
    fn fallback_mode_synthesizes_outcome_and_tags_it() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidate = extract_card_with_fallback(
            "Final result: India vs Australia, match abandoned after rain",
            now(),
            &mut rng,
        )
        .unwrap();
        let (synthesized, m) = as_match(candidate);
        assert!(synthesized);
        let winner = m.winner.expect("synthesized winner");
        assert!(winner == "India" || winner == "Australia");
        assert!(m.team1_score.is_some() && m.team2_score.is_some());
    }

    #[test]
    fn teams_are_ordered_by_first_mention() {
        let mentions = recognize_teams("AUS tour: Australia host India at the MCG");
        let names: Vec<_> = mentions.iter().map(|m| m.team.name).collect();
        assert_eq!(names, vec!["Australia", "India"]);

        let mentions = recognize_teams("Indian Premier League: Mumbai Indians vs Chennai");
        assert!(mentions.is_empty());

        let mentions = recognize_teams("South African pace attack vs the Indian batters");
        let names: Vec<_> = mentions.iter().map(|m| m.team.name).collect();
        assert_eq!(names, vec!["South Africa", "India"]);
    }

    #[test]
    fn vs_pattern_covers_unknown_sides() {
        let candidate = extract_card(
            "Mumbai Indians vs Chennai Super Kings, Indian Premier League, tomorrow",
            now(),
        )
        .unwrap();
        let (synthesized, m) = as_match(candidate);
        assert!(!synthesized);
        assert_eq!(m.team1, "Mumbai Indians");
        assert_eq!(m.team2, "Chennai Super Kings");
        assert_eq!(m.status, Some(MatchStatus::Scheduled));
        assert_eq!(m.format, Some(MatchFormat::T20));
        assert_eq!(m.competition.as_deref(), Some("Indian Premier League"));
    }

    #[test]
    fn strict_mode_drops_cards_without_two_teams() {
        assert!(extract_card("Live coverage resumes after the break, 120/3", now()).is_none());
        let mut rng = StdRng::seed_from_u64(1);
        let candidate = extract_card_with_fallback(
            "Live coverage resumes after the break, 120/3",
            now(),
            &mut rng,
        )
        .unwrap();
        let (synthesized, m) = as_match(candidate);
        assert!(synthesized);
        assert_ne!(m.team1, m.team2);
    }

    #[test]
    fn short_cards_yield_nothing() {
        assert!(extract_card("IND v AUS", now()).is_none());
    }

    #[test]
    fn format_and_competition_tables() {
        assert_eq!(classify_format("ICC T20 World Cup 2024"), Some(MatchFormat::T20));
        assert_eq!(classify_format("ICC Cricket World Cup"), Some(MatchFormat::Odi));
        assert_eq!(classify_format("2nd Test, Lord's"), Some(MatchFormat::Test));
        assert_eq!(classify_format("Friendly fixture"), None);

        assert_eq!(classify_competition("ICC T20 World Cup", &[]), "ICC T20 World Cup");
        assert_eq!(classify_competition("The Ashes, 3rd Test", &[]), "Ashes");
        assert_eq!(
            classify_competition("Friendly", &["India", "Zimbabwe"]),
            "International Series"
        );
        assert_eq!(
            classify_competition("Friendly", &["Ireland", "Scotland"]),
            "Domestic Tournament"
        );
    }

    #[test]
    fn derived_id_ignores_score_changes() {
        let early =
            extract_card("India vs Australia, 1st ODI - Live India 120/2 (18 ov)", now()).unwrap();
        let later =
            extract_card("India vs Australia, 1st ODI - Live India 201/4 (33 ov)", now()).unwrap();
        let (_, early) = as_match(early);
        let (_, later) = as_match(later);
        assert_eq!(early.external_id, later.external_id);
        assert_eq!(early.team1_score.as_deref(), Some("120/2"));
        assert_eq!(later.team1_score.as_deref(), Some("201/4"));
    }

    #[test]
    fn player_cards_carry_role_styles_and_aggregates() {
        let candidate = extract_card(
            "Ravindra Jadeja India All-Rounder Left-hand bat Left-arm orthodox \
             Runs 2756 Wickets 220 Matches 174 HS 87 BBI 5/33",
            now(),
        )
        .unwrap();
        let Candidate::Player(player) = candidate.into_record() else {
            panic!("expected player candidate");
        };
        assert_eq!(player.full_name, "Ravindra Jadeja");
        assert_eq!(player.team_name.as_deref(), Some("India"));
        assert_eq!(player.role, PlayerRole::AllRounder);
        assert_eq!(player.batting_style.as_deref(), Some("Left-hand bat"));
        assert_eq!(player.bowling_style.as_deref(), Some("Left-arm orthodox"));
        assert_eq!(player.stats.total_runs, 2756);
        assert_eq!(player.stats.total_wickets, 220);
        assert_eq!(player.stats.total_matches, 174);
        assert_eq!(player.stats.highest_score, 87);
        assert_eq!(player.stats.best_bowling.as_deref(), Some("5/33"));
        assert_eq!(
            player.external_id,
            Some(derive_player_external_id("Ravindra Jadeja", Some("India")))
        );
    }

    #[test]
    fn single_team_profile_becomes_team_candidate() {
        let candidate = extract_card("Netherlands cricket team profile and squad", now()).unwrap();
        let Candidate::Team(team) = candidate.into_record() else {
            panic!("expected team candidate");
        };
        assert_eq!(team.name, "Netherlands");
        assert_eq!(team.short_name.as_deref(), Some("NED"));
    }

    #[test]
    fn card_selection_prefers_match_list_containers() {
        let html = r#"<html><body>
            <div class="cb-col cb-mtch-lst">India vs England <span>1st Test</span></div>
            <div class="other">Pakistan vs Sri Lanka</div>
        </body></html>"#;
        let cards = select_cards(html).unwrap();
        assert_eq!(cards, vec!["India vs England 1st Test".to_string()]);

        let html = r#"<html><body><div>Zimbabwe vs Ireland, 2nd T20I</div></body></html>"#;
        let cards = select_cards(html).unwrap();
        assert_eq!(cards, vec!["Zimbabwe vs Ireland, 2nd T20I".to_string()]);
    }

    #[test]
    fn error_titles_are_detected() {
        assert!(is_error_page("<html><head><title>Error 503</title></head></html>"));
        assert!(!is_error_page("<html><head><title>Live Cricket Scores</title></head></html>"));
    }
}
