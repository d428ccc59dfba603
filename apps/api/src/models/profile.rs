use serde::{Deserialize, Serialize};

/// Contact details. Every field is optional; absent values serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none() && self.linkedin.is_none() && self.github.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceEntry {
    pub company: String,
    #[serde(alias = "role", alias = "title")]
    pub position: String,
    #[serde(alias = "date_range", alias = "period")]
    pub dates: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    pub degree: String,
    #[serde(alias = "school", alias = "university")]
    pub institution: String,
    #[serde(alias = "date_range", alias = "period")]
    pub dates: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectEntry {
    pub name: String,
    pub description: String,
    #[serde(alias = "tech_stack", alias = "technologies_used")]
    pub technologies: Vec<String>,
    pub year: Option<String>,
    #[serde(alias = "repository")]
    pub github: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificationEntry {
    pub name: String,
    pub year: Option<String>,
}

/// The final structured output of a parse job.
///
/// `name` is the only required field. List fields are always present (possibly
/// empty) so the rendering side never has to tell `null` apart from `[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub certifications: Vec<CertificationEntry>,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lists_deserialize_as_empty() {
        let profile: CandidateProfile = serde_json::from_str(r#"{"name": "Ada"}"#).unwrap();
        assert_eq!(profile.name, "Ada");
        assert!(profile.skills.is_empty());
        assert!(profile.certifications.is_empty());
        assert!(profile.contact_info.is_empty());
    }

    #[test]
    fn test_empty_lists_serialize_as_arrays_not_null() {
        let json = serde_json::to_value(CandidateProfile::default()).unwrap();
        assert_eq!(json["skills"], serde_json::json!([]));
        assert_eq!(json["experience"], serde_json::json!([]));
        assert_eq!(json["languages"], serde_json::json!([]));
    }

    #[test]
    fn test_experience_accepts_role_alias() {
        let entry: ExperienceEntry =
            serde_json::from_str(r#"{"company": "Acme", "role": "Engineer"}"#).unwrap();
        assert_eq!(entry.position, "Engineer");
        assert_eq!(entry.dates, "");
    }
}
