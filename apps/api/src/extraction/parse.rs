//! Lenient response parsing: turns model output into a `ProfileFragment`.
//!
//! Malformed JSON is an error. Well-formed JSON with an unexpected shape is not:
//! unknown keys are dropped, wrongly-typed keys count as missing, and list items
//! that do not fit the entry shape are skipped.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::extraction::ExtractionError;
use crate::llm_client::strip_json_fences;
use crate::models::profile::{CertificationEntry, ContactInfo, EducationEntry, ExperienceEntry, ProjectEntry};
use crate::pipeline::fragment::ProfileFragment;

/// Keys whose value may arrive as a comma-separated string instead of a list.
const LIST_KEYS: &[&str] = &["technologies", "tech_stack", "technologies_used"];

pub fn parse_fragment(text: &str) -> Result<ProfileFragment, ExtractionError> {
    let cleaned = strip_json_fences(text);
    let candidate = locate_object(cleaned)
        .ok_or_else(|| ExtractionError::Parse("no JSON object found in response".to_string()))?;

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| ExtractionError::Parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ExtractionError::Parse("expected a JSON object".to_string()));
    };

    Ok(fragment_from_map(&map))
}

/// Finds the outermost `{ ... }` span, tolerating prose around it.
fn locate_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn fragment_from_map(map: &Map<String, Value>) -> ProfileFragment {
    ProfileFragment {
        name: loose_string(map.get("name").or_else(|| map.get("full_name"))),
        contact_info: contact_from_map(map),
        summary: loose_string(map.get("summary")),
        skills: map.get("skills").and_then(string_list),
        experience: map.get("experience").and_then(entry_list::<ExperienceEntry>),
        education: map.get("education").and_then(entry_list::<EducationEntry>),
        projects: map.get("projects").and_then(entry_list::<ProjectEntry>),
        certifications: map.get("certifications").and_then(certification_list),
        languages: map.get("languages").and_then(string_list),
    }
}

/// Contact fields may be nested (`contact_info` / `contact`) or flat at the top level.
fn contact_from_map(map: &Map<String, Value>) -> Option<ContactInfo> {
    let nested = map
        .get("contact_info")
        .or_else(|| map.get("contact"))
        .and_then(Value::as_object);

    let field = |key: &str| {
        nested
            .and_then(|n| loose_string(n.get(key)))
            .or_else(|| loose_string(map.get(key)))
    };

    let contact = ContactInfo {
        email: field("email"),
        phone: field("phone"),
        linkedin: field("linkedin"),
        github: field("github"),
    };
    (!contact.is_empty()).then_some(contact)
}

/// Accepts strings and numbers; blanks and the literal "null"/"not found" become `None`.
fn loose_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let lowered = s.to_ascii_lowercase();
    if s.is_empty() || matches!(lowered.as_str(), "null" | "none" | "n/a" | "not found" | "unknown") {
        None
    } else {
        Some(s)
    }
}

/// A list of strings. Objects contribute their `name`/`language` value or, for
/// categorised skills, their `items`; a map of category → list is flattened.
fn string_list(value: &Value) -> Option<Vec<String>> {
    let mut out = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                push_strings(item, &mut out);
            }
        }
        Value::Object(categories) => {
            for item in categories.values() {
                push_strings(item, &mut out);
            }
        }
        Value::String(s) => out.extend(split_list(s)),
        _ => return None,
    }
    Some(out)
}

fn push_strings(item: &Value, out: &mut Vec<String>) {
    match item {
        Value::Object(obj) => {
            if let Some(items) = obj.get("items").and_then(Value::as_array) {
                out.extend(items.iter().filter_map(|v| loose_string(Some(v))));
            } else if let Some(s) = loose_string(obj.get("name").or_else(|| obj.get("language"))) {
                out.push(s);
            }
        }
        Value::Array(items) => out.extend(items.iter().filter_map(|v| loose_string(Some(v)))),
        other => out.extend(loose_string(Some(other))),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn entry_list<T>(value: &Value) -> Option<Vec<T>>
where
    T: DeserializeOwned + Default + PartialEq,
{
    let items = value.as_array()?;
    let entries = items
        .iter()
        .filter_map(|item| {
            let normalized = normalize_entry(item)?;
            match serde_json::from_value::<T>(normalized) {
                Ok(entry) if entry != T::default() => Some(entry),
                Ok(_) => None,
                Err(e) => {
                    debug!("Skipping malformed list item: {e}");
                    None
                }
            }
        })
        .collect();
    Some(entries)
}

/// Certifications arrive either as objects or as bare names.
fn certification_list(value: &Value) -> Option<Vec<CertificationEntry>> {
    let items = value.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if let Some(name) = loose_string(Some(item)) {
            out.push(CertificationEntry { name, year: None });
        } else if let Some(entries) = entry_list::<CertificationEntry>(&Value::Array(vec![item.clone()])) {
            out.extend(entries.into_iter().filter(|c| !c.name.is_empty()));
        }
    }
    Some(out)
}

/// Drops nulls, stringifies scalars, and splits comma-separated technology
/// strings so serde sees the shape the entry structs expect.
fn normalize_entry(item: &Value) -> Option<Value> {
    let obj = item.as_object()?;
    let mut cleaned = Map::with_capacity(obj.len());
    for (key, value) in obj {
        let value = match value {
            Value::Null => continue,
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            Value::String(s) if LIST_KEYS.contains(&key.as_str()) => {
                Value::Array(split_list(s).into_iter().map(Value::String).collect())
            }
            other => other.clone(),
        };
        cleaned.insert(key.clone(), value);
    }
    Some(Value::Object(cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_fenced_contact_info() {
        let text = "```json\n{\"name\": \"Jane Roe\", \"contact_info\": {\"email\": \"jane@example.com\", \"phone\": null}}\n```";
        let fragment = parse_fragment(text).unwrap();
        assert_eq!(fragment.name.as_deref(), Some("Jane Roe"));
        let contact = fragment.contact_info.unwrap();
        assert_eq!(contact.email.as_deref(), Some("jane@example.com"));
        assert_eq!(contact.phone, None);
    }

    #[test]
    fn test_flat_contact_fields_are_accepted() {
        let fragment =
            parse_fragment(r#"{"name": "Jane", "email": "j@x.io", "phone": "555-0100", "summary": ""}"#).unwrap();
        let contact = fragment.contact_info.unwrap();
        assert_eq!(contact.email.as_deref(), Some("j@x.io"));
        assert_eq!(contact.phone.as_deref(), Some("555-0100"));
        assert_eq!(fragment.summary, None);
    }

    #[test]
    fn test_prose_around_object_is_ignored() {
        let fragment = parse_fragment("Sure! Here it is: {\"skills\": [\"Go\", \"SQL\"]} Hope that helps.").unwrap();
        assert_eq!(fragment.skills, Some(vec!["Go".to_string(), "SQL".to_string()]));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let err = parse_fragment("{\"skills\": [\"Go\", }").unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
    }

    #[test]
    fn test_plain_text_is_a_parse_error() {
        let err = parse_fragment("I could not find any skills.").unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
    }

    #[test]
    fn test_unknown_keys_are_dropped_and_wrong_types_are_missing() {
        let fragment = parse_fragment(r#"{"skills": 42, "hobbies": ["chess"], "name": ["x"]}"#).unwrap();
        assert_eq!(fragment.skills, None);
        assert_eq!(fragment.name, None);
        assert_eq!(fragment, ProfileFragment::default());
    }

    #[test]
    fn test_categorised_skills_are_flattened() {
        let fragment = parse_fragment(
            r#"{"skills": {"languages": ["Rust", "Go"], "cloud": ["AWS"]}}"#,
        )
        .unwrap();
        let mut skills = fragment.skills.unwrap();
        skills.sort();
        assert_eq!(skills, vec!["AWS", "Go", "Rust"]);
    }

    #[test]
    fn test_malformed_experience_items_are_skipped() {
        let fragment = parse_fragment(
            r#"{"experience": [
                "not an object",
                {"company": "Acme", "position": "Engineer", "dates": "2020-2023", "description": null},
                {}
            ]}"#,
        )
        .unwrap();
        let experience = fragment.experience.unwrap();
        assert_eq!(experience.len(), 1);
        assert_eq!(experience[0].company, "Acme");
        assert_eq!(experience[0].description, "");
    }

    #[test]
    fn test_project_year_and_technology_string_are_normalised() {
        let fragment = parse_fragment(
            r#"{"projects": [{"name": "cvparse", "description": "CV parser", "technologies": "Rust, axum", "year": 2024}]}"#,
        )
        .unwrap();
        let project = &fragment.projects.unwrap()[0];
        assert_eq!(project.technologies, vec!["Rust", "axum"]);
        assert_eq!(project.year.as_deref(), Some("2024"));
    }

    #[test]
    fn test_bare_certification_names_are_accepted() {
        let fragment = parse_fragment(
            r#"{"certifications": ["AWS SAA", {"name": "CKA", "year": 2022}, {"year": 2020}], "languages": [{"language": "English"}, "French"]}"#,
        )
        .unwrap();
        let certs = fragment.certifications.unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0].name, "AWS SAA");
        assert_eq!(certs[1].year.as_deref(), Some("2022"));
        assert_eq!(fragment.languages.unwrap(), vec!["English", "French"]);
    }

    #[test]
    fn test_placeholder_strings_count_as_missing() {
        let fragment = parse_fragment(r#"{"name": "Jane", "summary": "Not found"}"#).unwrap();
        assert_eq!(fragment.summary, None);
    }
}
