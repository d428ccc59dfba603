// Prompts for follow-up questions about a parsed profile.

pub const CHAT_SYSTEM: &str = "\
You answer questions about a single candidate using ONLY the structured profile \
provided below. If the profile does not contain the answer, say that the résumé \
does not mention it. Do not speculate about the candidate beyond what is written. \
Answer in plain prose, concisely, without markdown headings.";

/// Placeholders: {profile}, {history}, {question}
pub const CHAT_PROMPT_TEMPLATE: &str = "\
CANDIDATE PROFILE (JSON):
{profile}

{history}QUESTION:
{question}";

/// Placeholder: {turns}
pub const HISTORY_BLOCK_TEMPLATE: &str = "\
CONVERSATION SO FAR:
{turns}

";
