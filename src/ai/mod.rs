mod gemini;

pub use gemini::{GeminiClient, classify_response};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// MIME type of every payload the pipeline sends (the downsized copy is JPEG).
pub const PAYLOAD_MIME_TYPE: &str = "image/jpeg";

/// A single describe-this-image call.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a [u8],
    pub mime_type: &'a str,
}

/// Failure classes an [`InferenceClient`] must sort its errors into.
///
/// The retry loop in [`pipeline::infer`](crate::pipeline::infer) decides what
/// to do purely on the variant: rotate, stop, or try again.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("blocked by safety filter: {0}")]
    SafetyBlocked(String),

    #[error("request failed: {0}")]
    Transport(String),
}

/// An external vision model that turns an image into text.
///
/// The library ships [`GeminiClient`]. Tests and other backends implement
/// this trait directly.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// Display name (e.g. `"Gemini"`), used in log lines.
    fn name(&self) -> &str;

    /// Send the image and instruction using `credential`, returning the raw
    /// model text on success.
    async fn describe(
        &self,
        credential: &str,
        request: &InferenceRequest<'_>,
    ) -> std::result::Result<String, InferenceError>;
}

/// Title and keywords extracted from a model response.
///
/// `keywords` is a comma-separated list, most important visual subject first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tagging {
    pub title: String,
    pub keywords: String,
}

/// The fixed stock-photography instruction sent with every image.
pub fn build_prompt() -> String {
    r#"You are a stock photography metadata specialist. Analyze the image and produce metadata tuned for stock agency search (Adobe Stock, Shutterstock).

Return a JSON object with exactly two string fields:

{
  "title": "A natural, descriptive sentence about the image",
  "keywords": "keyword1, keyword2, keyword3, ..."
}

Rules:
- "title": one descriptive sentence, at most 15 words, covering subject, action and setting. No numbers or filler.
- "keywords": 40 to 50 comma-separated keywords, in English.
  Order matters: the most important visual keywords first (subject, action, main objects), then conceptual keywords (mood, emotion, concept), then technical keywords (lighting, viewpoint, composition).
- No trademarks, brand names or names of real people.

Return ONLY the JSON object, no markdown formatting, no code blocks, no extra text."#
        .to_string()
}

/// Parse raw model text into a [`Tagging`].
///
/// Accepts markdown code fences, prose around the object and trailing commas.
/// Fails unless both `title` and `keywords` are present and non-empty.
/// `keywords` given as an array of strings is joined with `", "`.
pub fn parse_tagging(text: &str) -> Result<Tagging> {
    log::debug!("Raw AI response:\n{text}");

    let cleaned = text.trim();
    if cleaned.is_empty() {
        anyhow::bail!("empty response");
    }

    let mut last_problem = String::from("no JSON object found");
    for candidate in extract_json_candidates(cleaned) {
        let value = match serde_json::from_str::<serde_json::Value>(&candidate)
            .or_else(|_| serde_json::from_str(&fix_trailing_commas(&candidate)))
        {
            Ok(value) => value,
            Err(e) => {
                last_problem = format!("invalid JSON: {e}");
                continue;
            }
        };
        match value_to_tagging(&value) {
            Ok(tagging) => return Ok(tagging),
            Err(problem) => last_problem = problem,
        }
    }

    anyhow::bail!("{last_problem}")
}

/// Possible JSON object strings inside a model response, most specific first.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if text.contains("```") {
        let fenced = text
            .lines()
            .skip_while(|l| !l.trim().starts_with("```"))
            .skip(1)
            .take_while(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
        if !fenced.trim().is_empty() {
            candidates.push(fenced);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].to_string());
        }
    }

    candidates.push(text.to_string());
    candidates
}

/// Drop commas that directly precede `}` or `]` outside string literals.
fn fix_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().copied().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn value_to_tagging(value: &serde_json::Value) -> std::result::Result<Tagging, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let title = obj
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if title.is_empty() {
        return Err("missing or empty \"title\"".to_string());
    }

    let keywords = match obj.get("keywords") {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };
    if keywords.split(',').all(|k| k.trim().is_empty()) {
        return Err("missing or empty \"keywords\"".to_string());
    }

    Ok(Tagging {
        title: title.to_string(),
        keywords,
    })
}
