// Extraction prompt templates, one target shape per stage.
// Placeholders: {filename}, {cv_text}, {schema}, {focus}, {context}, {rules}.

use crate::pipeline::stages::StageName;

/// Role line; the JSON-only rules from `llm_client::prompts` follow it.
pub const EXTRACTION_ROLE: &str =
    "You are an expert CV parser. You extract structured candidate information from CV text.";

pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract {focus} from the CV below and return ONLY a JSON object.

CV FILE: {filename}

CV TEXT:
{cv_text}
{context}
OUTPUT SCHEMA (return exactly this structure):
{schema}

RULES:
{rules}
Return ONLY the JSON object and nothing else, no code fences."#;

/// Appended when earlier stages produced data this stage may reference.
pub const CONTEXT_BLOCK_TEMPLATE: &str = r#"
ALREADY EXTRACTED (use only to disambiguate; do not repeat it in your answer):
{prior}
"#;

pub fn focus(stage: StageName) -> &'static str {
    match stage {
        StageName::ContactInfo => "the candidate's name, contact details and a brief professional summary",
        StageName::Skills => "all skills",
        StageName::Experience => "the candidate's work experience",
        StageName::Education => "the candidate's education",
        StageName::Projects => "the candidate's projects",
        StageName::Certifications => "certifications and spoken languages",
    }
}

pub fn schema(stage: StageName) -> &'static str {
    match stage {
        StageName::ContactInfo => {
            r#"{
  "name": "candidate full name",
  "contact_info": {
    "email": "email address" | null,
    "phone": "phone number" | null,
    "linkedin": "LinkedIn URL" | null,
    "github": "GitHub URL" | null
  },
  "summary": "brief professional summary (2-3 sentences)" | null
}"#
        }
        StageName::Skills => r#"{
  "skills": ["skill1", "skill2", "skill3"]
}"#,
        StageName::Experience => {
            r#"{
  "experience": [
    {
      "company": "Company Name",
      "position": "Job Title",
      "dates": "Date Range",
      "description": "Brief description of role and achievements"
    }
  ]
}"#
        }
        StageName::Education => {
            r#"{
  "education": [
    {
      "degree": "Degree Name",
      "institution": "University/School Name",
      "dates": "Date Range"
    }
  ]
}"#
        }
        StageName::Projects => {
            r#"{
  "projects": [
    {
      "name": "Project Name",
      "description": "Project description",
      "technologies": ["tech1", "tech2"],
      "year": "YYYY" | null,
      "github": "repository URL" | null
    }
  ]
}"#
        }
        StageName::Certifications => {
            r#"{
  "certifications": [
    {"name": "Certification Name", "year": "YYYY" | null}
  ],
  "languages": ["English", "Spanish"]
}"#
        }
    }
}

pub fn rules(stage: StageName) -> &'static str {
    match stage {
        StageName::ContactInfo => "1. The name is the person's full name as written at the top of the CV.\n\
            2. Write the summary from the CV's own profile/summary section when one exists.",
        StageName::Skills => "1. Include programming languages, frameworks, tools, cloud platforms, databases and relevant soft skills.\n\
            2. One skill per array item; keep the CV's spelling.",
        StageName::Experience => "1. List positions most recent first.\n\
            2. Keep dates exactly as written in the CV.",
        StageName::Education => "1. List degrees most recent first.\n\
            2. Keep dates exactly as written in the CV.",
        StageName::Projects => "1. Include side projects, open-source work and notable professional projects.\n\
            2. Do NOT list an employer as a project; use the experience already extracted to tell them apart.",
        StageName::Certifications => "1. Certifications are formal credentials (e.g. AWS, PMP), not degrees.\n\
            2. Languages are spoken/written human languages, not programming languages.",
    }
}
