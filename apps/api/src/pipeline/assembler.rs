//! Merges stage fragments into one `CandidateProfile`.
//!
//! Merge rule, per field:
//! 1. the owning stage's non-empty value wins;
//! 2. otherwise the first stage in definition order that supplied a non-empty
//!    value fills it, and later stages never overwrite it.
//!
//! Ownership is the static mapping in `stages.rs`, so the result (and which
//! stage supplied each field) is deterministic for identical fragments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::profile::CandidateProfile;
use crate::pipeline::fragment::ProfileFragment;
use crate::pipeline::job::Job;
use crate::pipeline::stages::{ProfileField, StageName};

/// Which stage supplied each populated field.
pub type Provenance = BTreeMap<ProfileField, StageName>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub profile: CandidateProfile,
    pub provenance: Provenance,
}

/// No stage produced a name. The fields that were recovered are kept in
/// `partial` (with an empty name) so callers can still surface them.
#[derive(Debug, Clone, Error)]
#[error("no stage produced a candidate name ({} other fields recovered)", .partial.provenance.len())]
pub struct AssemblyError {
    pub partial: Assembly,
}

pub fn assemble(job: &Job) -> Result<Assembly, AssemblyError> {
    assemble_fragments(job.completed_fragments())
}

pub fn assemble_fragments<'a, I>(fragments: I) -> Result<Assembly, AssemblyError>
where
    I: IntoIterator<Item = (StageName, &'a ProfileFragment)>,
{
    let mut fragments: Vec<_> = fragments.into_iter().collect();
    // Stable sort keeps duplicates (if any) in the order given.
    fragments.sort_by_key(|(stage, _)| *stage);

    let mut profile = CandidateProfile::default();
    let mut provenance = Provenance::new();

    for field in ProfileField::ALL {
        let owner = field.owner();
        let source = fragments
            .iter()
            .find(|(stage, fragment)| *stage == owner && fragment.has(field))
            .or_else(|| fragments.iter().find(|(_, fragment)| fragment.has(field)));

        if let Some((stage, fragment)) = source {
            copy_field(&mut profile, fragment, field);
            provenance.insert(field, *stage);
        }
    }

    let assembly = Assembly { profile, provenance };
    if assembly.provenance.contains_key(&ProfileField::Name) {
        Ok(assembly)
    } else {
        Err(AssemblyError { partial: assembly })
    }
}

fn copy_field(profile: &mut CandidateProfile, fragment: &ProfileFragment, field: ProfileField) {
    match field {
        ProfileField::Name => {
            profile.name = fragment.name.as_deref().map(str::trim).unwrap_or_default().to_string()
        }
        ProfileField::ContactInfo => profile.contact_info = fragment.contact_info.clone().unwrap_or_default(),
        ProfileField::Summary => profile.summary = fragment.summary.clone(),
        ProfileField::Skills => profile.skills = fragment.skills.clone().unwrap_or_default(),
        ProfileField::Experience => profile.experience = fragment.experience.clone().unwrap_or_default(),
        ProfileField::Education => profile.education = fragment.education.clone().unwrap_or_default(),
        ProfileField::Projects => profile.projects = fragment.projects.clone().unwrap_or_default(),
        ProfileField::Certifications => {
            profile.certifications = fragment.certifications.clone().unwrap_or_default()
        }
        ProfileField::Languages => profile.languages = fragment.languages.clone().unwrap_or_default(),
    }
}
