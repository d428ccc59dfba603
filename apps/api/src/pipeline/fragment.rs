use serde::{Deserialize, Serialize};

use crate::models::profile::{
    CertificationEntry, ContactInfo, EducationEntry, ExperienceEntry, ProjectEntry,
};
use crate::pipeline::stages::{ProfileField, StageName};

/// The partial result of a single stage. Any field may be absent; only the
/// fields owned by the producing stage are authoritative during assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<Vec<ExperienceEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education: Option<Vec<EducationEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<ProjectEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certifications: Option<Vec<CertificationEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

impl ProfileFragment {
    /// True when the fragment carries a usable (non-blank, non-empty) value for `field`.
    pub fn has(&self, field: ProfileField) -> bool {
        match field {
            ProfileField::Name => non_blank(&self.name),
            ProfileField::ContactInfo => self.contact_info.as_ref().is_some_and(|c| !c.is_empty()),
            ProfileField::Summary => non_blank(&self.summary),
            ProfileField::Skills => non_empty(&self.skills),
            ProfileField::Experience => non_empty(&self.experience),
            ProfileField::Education => non_empty(&self.education),
            ProfileField::Projects => non_empty(&self.projects),
            ProfileField::Certifications => non_empty(&self.certifications),
            ProfileField::Languages => non_empty(&self.languages),
        }
    }

    pub fn populated_fields(&self) -> Vec<ProfileField> {
        ProfileField::ALL.into_iter().filter(|f| self.has(*f)).collect()
    }

    /// Keeps only the fields owned by `stage`. Used when building prompt context
    /// so a stage only ever sees what the referenced stage is authoritative for.
    pub fn owned_by(&self, stage: StageName) -> ProfileFragment {
        let mut owned = ProfileFragment::default();
        for field in stage.owned_fields() {
            match field {
                ProfileField::Name => owned.name = self.name.clone(),
                ProfileField::ContactInfo => owned.contact_info = self.contact_info.clone(),
                ProfileField::Summary => owned.summary = self.summary.clone(),
                ProfileField::Skills => owned.skills = self.skills.clone(),
                ProfileField::Experience => owned.experience = self.experience.clone(),
                ProfileField::Education => owned.education = self.education.clone(),
                ProfileField::Projects => owned.projects = self.projects.clone(),
                ProfileField::Certifications => owned.certifications = self.certifications.clone(),
                ProfileField::Languages => owned.languages = self.languages.clone(),
            }
        }
        owned
    }

    /// Human-readable one-liner describing what a stage found.
    pub fn describe(&self, stage: StageName) -> String {
        fn count<T>(list: &Option<Vec<T>>) -> usize {
            list.as_ref().map_or(0, Vec::len)
        }
        match stage {
            StageName::ContactInfo => match self.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => format!("Found candidate: {name}"),
                _ => "No candidate name found".to_string(),
            },
            StageName::Skills => format!("Found {} skills", count(&self.skills)),
            StageName::Experience => {
                let mut line = format!("Found {} work experience entries", count(&self.experience));
                if let Some(recent) = self.experience.as_ref().and_then(|e| e.first()) {
                    line.push_str(&format!(
                        "; most recent: {} at {}",
                        recent.position, recent.company
                    ));
                }
                line
            }
            StageName::Education => format!("Found {} education entries", count(&self.education)),
            StageName::Projects => format!("Found {} projects", count(&self.projects)),
            StageName::Certifications => format!(
                "Found {} certifications, {} languages",
                count(&self.certifications),
                count(&self.languages)
            ),
        }
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn non_empty<T>(value: &Option<Vec<T>>) -> bool {
    value.as_ref().is_some_and(|v| !v.is_empty())
}
