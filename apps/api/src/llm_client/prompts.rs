// Shared prompt fragments used by every module that talks to the model.
// Each feature keeps its own prompts.rs alongside it; cross-cutting pieces live here.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to extraction prompts so the model never invents data.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Only report information that is literally present in the CV text. \
    Do NOT infer, guess, or invent details. \
    If a field is not present, use null for scalars and [] for lists.";
