use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};

use super::{InferenceClient, InferenceError, InferenceRequest};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Google Gemini `generateContent` client.
///
/// The API key is supplied per call so a [`CredentialRotator`](crate::credentials::CredentialRotator)
/// can swap keys between attempts.
pub struct GeminiClient {
    model: String,
    disable_safety_filters: bool,
    endpoint: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(model: String, disable_safety_filters: bool) -> Self {
        Self {
            model,
            disable_safety_filters,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at a different API base URL (proxies, test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, request: &InferenceRequest<'_>) -> Value {
        let mut body = json!({
            "contents": [
                {
                    "parts": [
                        { "text": request.prompt },
                        {
                            "inline_data": {
                                "mime_type": request.mime_type,
                                "data": STANDARD.encode(request.image)
                            }
                        }
                    ]
                }
            ],
            "generationConfig": {
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json"
            }
        });

        if self.disable_safety_filters {
            body["safetySettings"] = HARM_CATEGORIES
                .iter()
                .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
                .collect();
        }

        body
    }
}

#[async_trait::async_trait]
impl InferenceClient for GeminiClient {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn describe(
        &self,
        credential: &str,
        request: &InferenceRequest<'_>,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| InferenceError::Transport(format!("Gemini request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Transport(format!("Failed to read Gemini response: {e}")))?;

        classify_response(status, &text)
    }
}

/// Sort a raw Gemini HTTP response into model text or an [`InferenceError`].
pub fn classify_response(status: u16, body: &str) -> Result<String, InferenceError> {
    if !(200..300).contains(&status) {
        let summary = error_summary(body);
        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            return Err(InferenceError::RateLimited(summary));
        }
        if status == 401
            || status == 403
            || body.contains("API_KEY_INVALID")
            || body.contains("API key not valid")
        {
            return Err(InferenceError::InvalidCredential(summary));
        }
        return Err(InferenceError::Transport(format!("HTTP {status}: {summary}")));
    }

    let json: Value = serde_json::from_str(body)
        .map_err(|e| InferenceError::Transport(format!("Unreadable Gemini envelope: {e}")))?;

    if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
        return Err(InferenceError::SafetyBlocked(reason.to_string()));
    }

    let candidate = &json["candidates"][0];
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate["finishReason"]
            .as_str()
            .unwrap_or("no candidates returned");
        return Err(InferenceError::SafetyBlocked(reason.to_string()));
    }

    Ok(text)
}

/// The API's `error.message`, or the start of the body.
fn error_summary(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = json["error"]["message"].as_str() {
            return msg.to_string();
        }
    }
    body.chars().take(200).collect()
}
