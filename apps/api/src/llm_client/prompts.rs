/// Prompt constants for the two extraction operations. Placeholders
/// (`{cv_text}`, `{criteria}`) are substituted with `str::replace`.

/// Fixed generic criteria every CV is graded against.
pub const GRADING_CRITERIA: [&str; 3] = ["readability", "experience", "education"];

pub const SUMMARIZE_SYSTEM: &str = "You are a recruiting assistant. \
    Respond with plain text only: a concise, factual summary of the CV \
    covering skills, experience, and suitability. No preamble, no markdown.";

pub const SUMMARIZE_PROMPT: &str = "Provide a concise summary of the following CV:\n{cv_text}";

pub const GRADE_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON array.";

pub const GRADE_PROMPT: &str = r#"Grade the following CV against these criteria: {criteria}.
Return a JSON array with exactly one object per criterion, in this shape:
[{"name": "<criterion>", "reason": "<one-sentence justification>", "value": "strong_no|no|maybe|yes|strong_yes"}]

CV:
{cv_text}"#;
