//! Tracker failure scenarios.

use crate::oracle::ColonyKind;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// LIN-001: tracker dropped one daughter of every other division
    MissedDivision,

    /// LIN-002: tracker linked a cell into its neighbour
    SpuriousSplit,

    /// LIN-003: tracker kept following a dead cell's debris
    UnmarkedDeath,

    /// LIN-004: all of the above in one movie
    Mixed,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::MissedDivision,
            ScenarioId::SpuriousSplit,
            ScenarioId::UnmarkedDeath,
            ScenarioId::Mixed,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::MissedDivision => "missed_division",
            ScenarioId::SpuriousSplit => "spurious_split",
            ScenarioId::UnmarkedDeath => "unmarked_death",
            ScenarioId::Mixed => "mixed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::MissedDivision => "Half the divisions lose a daughter link; events mark every division",
            ScenarioId::SpuriousSplit => "Neighbour pairs get a false split link no event supports",
            ScenarioId::UnmarkedDeath => "Dead cells stay linked to their debris; events mark every death",
            ScenarioId::Mixed => "Missed divisions, false splits and unmarked deaths together",
        }
    }

    /// Colony layout for this scenario.
    pub fn colonies(&self) -> Vec<ColonyKind> {
        use ColonyKind::*;
        match self {
            ScenarioId::MissedDivision => vec![Dividing, Dividing, Dividing, Dividing, Quiet],
            ScenarioId::SpuriousSplit => vec![Pair, Pair, Dividing, Quiet],
            ScenarioId::UnmarkedDeath => vec![Dying, Dying, Dying, Quiet],
            ScenarioId::Mixed => vec![Dividing, Dividing, Pair, Dying, Quiet, Dying, Pair, Dividing],
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missed_division" | "misseddivision" | "lin-001" => Ok(ScenarioId::MissedDivision),
            "spurious_split" | "spurioussplit" | "lin-002" => Ok(ScenarioId::SpuriousSplit),
            "unmarked_death" | "unmarkeddeath" | "lin-003" => Ok(ScenarioId::UnmarkedDeath),
            "mixed" | "lin-004" => Ok(ScenarioId::Mixed),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("LIN-002".parse::<ScenarioId>(), Ok(ScenarioId::SpuriousSplit));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_mixed_has_every_colony_kind() {
        let kinds = ScenarioId::Mixed.colonies();
        for kind in [ColonyKind::Dividing, ColonyKind::Dying, ColonyKind::Pair, ColonyKind::Quiet] {
            assert!(kinds.contains(&kind));
        }
    }
}
