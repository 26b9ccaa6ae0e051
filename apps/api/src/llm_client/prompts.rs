// Shared output-format fragments appended to every stage prompt.
// Stage templates live in pipeline::prompts.

/// Closing instruction for stages that expect a JSON array.
pub const JSON_ARRAY_ONLY: &str = "Your response MUST be a JSON array where each object \
    strictly conforms to the provided JSON schema. \
    Do NOT include any additional text or markdown outside the JSON. \
    Do NOT use markdown code fences.";

/// Closing instruction for stages that expect a JSON object.
pub const JSON_OBJECT_ONLY: &str = "Your response MUST be a JSON object that strictly \
    conforms to the provided JSON schema. \
    Do NOT include any text outside the JSON. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";
