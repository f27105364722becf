use serde::{Deserialize, Serialize};

/// Sort order for commodity listings and the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Opportunity,
    Progress,
    Value,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Opportunity
    }
}

/// How multiple sector filters combine when listing commodities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectorCombine {
    And,
    Or,
}

impl Default for SectorCombine {
    fn default() -> Self {
        SectorCombine::Or
    }
}
