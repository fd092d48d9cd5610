use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use uuid::Uuid;

/// Canonical aspect ordering used everywhere per-aspect data is emitted.
pub const ASPECT_ORDER: [&str; 7] = [
    "leadership",
    "preparation",
    "cashier",
    "order_making",
    "packing",
    "stock_opname",
    "cleanliness",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Crew,
    Leader,
    Supervisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Crew => "crew",
            Role::Leader => "leader",
            Role::Supervisor => "supervisor",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "crew" => Ok(Role::Crew),
            "leader" => Ok(Role::Leader),
            "supervisor" => Ok(Role::Supervisor),
            other => Err(anyhow::anyhow!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(anyhow::anyhow!("unknown gender '{other}'")),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CrewMember {
    pub id: Uuid,
    pub full_name: String,
    pub role: Role,
    pub gender: Gender,
    pub outlet_id: Option<Uuid>,
    pub outlet_name: Option<String>,
    pub is_active: bool,
}

/// One crew member's ratings of a peer, one row per (period, assessor, assessed).
#[derive(Debug, Clone)]
pub struct PeerAssessment {
    pub assessed_id: Uuid,
    pub scores: BTreeMap<String, i32>,
}

#[derive(Debug, Clone)]
pub struct SupervisorAssessment {
    pub assessed_crew_id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct AspectWeight {
    pub role: Role,
    pub gender: Gender,
    pub aspect_key: String,
    pub max_score: f64,
}

#[derive(Debug, Clone)]
pub struct AssessmentPeriod {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AspectScore {
    pub aspect_key: String,
    pub score: f64,
    pub max_score: f64,
}

/// Per-crew scorecard produced by the recap engine. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecapRow {
    pub crew_id: Uuid,
    pub full_name: String,
    pub outlet: String,
    pub role: Role,
    /// Rated aspects only, in canonical aspect order.
    pub aspect_scores: Vec<AspectScore>,
    pub crew_score: f64,
    /// All supervisor scores received, in arrival order. Display caps at two
    /// slots ("Spv 1"/"Spv 2"); the average is over the whole list.
    pub supervisor_scores: Vec<f64>,
    pub supervisor_average: f64,
    pub final_score: f64,
    pub rank: usize,
    pub actual_assessors: usize,
    pub potential_assessors: usize,
}

impl RecapRow {
    pub fn completion_percent(&self) -> f64 {
        if self.potential_assessors == 0 {
            0.0
        } else {
            self.actual_assessors as f64 / self.potential_assessors as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartEntry {
    pub name: String,
    pub score: f64,
}

/// Top performers for one aspect, at most three entries, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectLeaders {
    pub aspect_key: String,
    pub leaders: Vec<ChartEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecapOutput {
    /// Rank-ascending: rows[0] has rank 1.
    pub rows: Vec<RecapRow>,
    pub charts: Vec<AspectLeaders>,
}
