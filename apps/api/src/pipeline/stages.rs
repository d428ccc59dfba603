//! Stage catalogue: the canonical, ordered list of extraction stages and the
//! static mapping from each stage to the profile fields it owns.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-call budget used when no override is configured.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Every stage the sequencer knows, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    ContactInfo,
    Skills,
    Experience,
    Education,
    Projects,
    Certifications,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::ContactInfo,
        StageName::Skills,
        StageName::Experience,
        StageName::Education,
        StageName::Projects,
        StageName::Certifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ContactInfo => "contact-info",
            StageName::Skills => "skills",
            StageName::Experience => "experience",
            StageName::Education => "education",
            StageName::Projects => "projects",
            StageName::Certifications => "certifications",
        }
    }

    /// Fields this stage is authoritative for. Each field has exactly one owner.
    pub fn owned_fields(&self) -> &'static [ProfileField] {
        match self {
            StageName::ContactInfo => &[ProfileField::Name, ProfileField::ContactInfo, ProfileField::Summary],
            StageName::Skills => &[ProfileField::Skills],
            StageName::Experience => &[ProfileField::Experience],
            StageName::Education => &[ProfileField::Education],
            StageName::Projects => &[ProfileField::Projects],
            StageName::Certifications => &[ProfileField::Certifications, ProfileField::Languages],
        }
    }

    /// Earlier stages whose output is handed to this stage as context.
    pub fn references(&self) -> &'static [StageName] {
        match self {
            StageName::Experience => &[StageName::Skills],
            StageName::Projects => &[StageName::Experience, StageName::Skills],
            StageName::Certifications => &[StageName::Education],
            _ => &[],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// A profile field, used for ownership and provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    ContactInfo,
    Summary,
    Skills,
    Experience,
    Education,
    Projects,
    Certifications,
    Languages,
}

impl ProfileField {
    pub const ALL: [ProfileField; 9] = [
        ProfileField::Name,
        ProfileField::ContactInfo,
        ProfileField::Summary,
        ProfileField::Skills,
        ProfileField::Experience,
        ProfileField::Education,
        ProfileField::Projects,
        ProfileField::Certifications,
        ProfileField::Languages,
    ];

    pub fn owner(&self) -> StageName {
        match self {
            ProfileField::Name | ProfileField::ContactInfo | ProfileField::Summary => StageName::ContactInfo,
            ProfileField::Skills => StageName::Skills,
            ProfileField::Experience => StageName::Experience,
            ProfileField::Education => StageName::Education,
            ProfileField::Projects => StageName::Projects,
            ProfileField::Certifications | ProfileField::Languages => StageName::Certifications,
        }
    }
}

/// Runtime description of one stage: its identity plus its call budget.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: StageName,
    pub timeout: Duration,
}

/// Builds the ordered stage plan. `overrides` replaces the uniform timeout for
/// individual stages.
pub fn stage_plan(default_timeout: Duration, overrides: &[(StageName, Duration)]) -> Vec<StageSpec> {
    StageName::ALL
        .into_iter()
        .map(|name| StageSpec {
            name,
            timeout: overrides
                .iter()
                .find(|(stage, _)| *stage == name)
                .map(|(_, timeout)| *timeout)
                .unwrap_or(default_timeout),
        })
        .collect()
}
