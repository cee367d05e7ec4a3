//! Canonical team table and alias lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalTeam {
    pub name: String,
    pub abbreviation: Option<String>,
}

impl CanonicalTeam {
    pub fn new(name: impl Into<String>, abbreviation: Option<&str>) -> Self {
        Self {
            name: name.into(),
            abbreviation: abbreviation.map(str::to_string),
        }
    }

    /// Three-letter identity code: alphabetic only, uppercase, taken from the
    /// abbreviation when known so that "Los Angeles ..." teams stay distinct.
    pub fn code(&self) -> String {
        let source = self.abbreviation.as_deref().unwrap_or(&self.name);
        let code = team_code(source);
        if code.is_empty() {
            team_code(&self.name)
        } else {
            code
        }
    }
}

/// Alphabetic-only, uppercase, first three letters.
pub fn team_code(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Lowercase, collapse whitespace, normalize curly quotes.
fn lookup_key(name: &str) -> String {
    name.replace(['’', '‘'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Static alias table mapping every known spelling onto one canonical team.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    teams: Vec<CanonicalTeam>,
    aliases: HashMap<String, usize>,
}

impl TeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a team under its canonical name, abbreviation and `aliases`.
    pub fn insert(&mut self, team: CanonicalTeam, aliases: &[&str]) {
        let idx = self.teams.len();
        self.aliases.insert(lookup_key(&team.name), idx);
        if let Some(abbrev) = &team.abbreviation {
            self.aliases.insert(lookup_key(abbrev), idx);
        }
        for alias in aliases {
            self.aliases.insert(lookup_key(alias), idx);
        }
        self.teams.push(team);
    }

    pub fn resolve(&self, raw_name: &str) -> Option<&CanonicalTeam> {
        self.aliases
            .get(&lookup_key(raw_name))
            .and_then(|&idx| self.teams.get(idx))
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// The thirty NBA franchises with the spellings The Odds API and
    /// schedule sources are known to use.
    pub fn nba() -> Self {
        let mut dir = Self::new();
        for (name, abbrev, aliases) in NBA_TEAMS {
            dir.insert(CanonicalTeam::new(*name, Some(*abbrev)), aliases);
        }
        dir
    }
}

const NBA_TEAMS: &[(&str, &str, &[&str])] = &[
    ("Atlanta Hawks", "ATL", &["Atlanta", "hawks"]),
    ("Boston Celtics", "BOS", &["Boston", "celtics"]),
    ("Brooklyn Nets", "BKN", &["Brooklyn", "nets"]),
    ("Charlotte Hornets", "CHA", &["Charlotte", "hornets"]),
    ("Chicago Bulls", "CHI", &["Chicago", "bulls"]),
    ("Cleveland Cavaliers", "CLE", &["Cleveland", "cavaliers"]),
    ("Dallas Mavericks", "DAL", &["Dallas", "mavericks"]),
    ("Denver Nuggets", "DEN", &["Denver", "nuggets"]),
    ("Detroit Pistons", "DET", &["Detroit", "pistons"]),
    ("Golden State Warriors", "GSW", &["Golden State", "warriors"]),
    ("Houston Rockets", "HOU", &["Houston", "rockets"]),
    ("Indiana Pacers", "IND", &["Indiana", "pacers"]),
    (
        "Los Angeles Clippers",
        "LAC",
        &["LA Clippers", "L.A. Clippers", "clippers"],
    ),
    (
        "Los Angeles Lakers",
        "LAL",
        &["LA Lakers", "L.A. Lakers", "lakers"],
    ),
    ("Memphis Grizzlies", "MEM", &["Memphis", "grizzlies"]),
    ("Miami Heat", "MIA", &["Miami", "heat"]),
    ("Milwaukee Bucks", "MIL", &["Milwaukee", "bucks"]),
    ("Minnesota Timberwolves", "MIN", &["Minnesota", "timberwolves"]),
    ("New Orleans Pelicans", "NOP", &["New Orleans", "pelicans"]),
    ("New York Knicks", "NYK", &["New York", "knicks"]),
    ("Oklahoma City Thunder", "OKC", &["Oklahoma City", "thunder"]),
    ("Orlando Magic", "ORL", &["Orlando", "magic"]),
    ("Philadelphia 76ers", "PHI", &["Philadelphia", "76ers", "sixers"]),
    ("Phoenix Suns", "PHX", &["Phoenix", "suns"]),
    (
        "Portland Trail Blazers",
        "POR",
        &["Portland", "trail blazers", "blazers"],
    ),
    ("Sacramento Kings", "SAC", &["Sacramento", "kings"]),
    ("San Antonio Spurs", "SAS", &["San Antonio", "spurs"]),
    ("Toronto Raptors", "TOR", &["Toronto", "raptors"]),
    ("Utah Jazz", "UTA", &["Utah", "jazz"]),
    ("Washington Wizards", "WAS", &["Washington", "wizards"]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nba_directory_has_thirty_teams() {
        assert_eq!(TeamDirectory::nba().len(), 30);
    }

    #[test]
    fn test_variants_resolve_to_one_team() {
        let dir = TeamDirectory::nba();
        let canonical = dir.resolve("Los Angeles Clippers").cloned();
        assert!(canonical.is_some());
        for variant in ["LA Clippers", "clippers", "CLIPPERS", "  LA   Clippers ", "LAC"] {
            assert_eq!(dir.resolve(variant).cloned(), canonical, "variant {variant}");
        }
    }

    #[test]
    fn test_unknown_name_is_none() {
        assert!(TeamDirectory::nba().resolve("Seattle SuperSonics").is_none());
    }

    #[test]
    fn test_codes_keep_shared_city_prefix_apart() {
        let dir = TeamDirectory::nba();
        let lakers = dir.resolve("Lakers").unwrap().code();
        let clippers = dir.resolve("Clippers").unwrap().code();
        assert_eq!(lakers, "LAL");
        assert_eq!(clippers, "LAC");
    }

    #[test]
    fn test_team_code_fallback_to_name() {
        let team = CanonicalTeam::new("76ers Academy", None);
        assert_eq!(team.code(), "ERS");
        assert_eq!(team_code("St. John's"), "STJ");
    }
}
