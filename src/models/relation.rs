//! Project ↔ user relations.
//!
//! Relation names are a closed set; every store operation is selected by
//! matching on [`Relation`], never by indexing with a caller-supplied string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "camelCase")]
#[sqlx(type_name = "varchar", rename_all = "camelCase")]
pub enum Relation {
    Owners,
    Members,
    Encadrants,
    JuryMembers,
    ScientificReviewers,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::Owners,
        Relation::Members,
        Relation::Encadrants,
        Relation::JuryMembers,
        Relation::ScientificReviewers,
    ];

    /// Relations that can be joined through an emailed invitation.
    pub const INVITABLE: [Relation; 3] =
        [Relation::Members, Relation::Encadrants, Relation::JuryMembers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Owners => "owners",
            Relation::Members => "members",
            Relation::Encadrants => "encadrants",
            Relation::JuryMembers => "juryMembers",
            Relation::ScientificReviewers => "scientificReviewers",
        }
    }

    pub fn is_invitable(&self) -> bool {
        Self::INVITABLE.contains(self)
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Relation {
    type Err = String;

    /// Accepts the wire names (`juryMembers`) plus snake/kebab spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "owners" => Ok(Relation::Owners),
            "members" => Ok(Relation::Members),
            "encadrants" => Ok(Relation::Encadrants),
            "jurymembers" => Ok(Relation::JuryMembers),
            "scientificreviewers" => Ok(Relation::ScientificReviewers),
            _ => Err(format!("unknown relation: {}", s.trim())),
        }
    }
}
