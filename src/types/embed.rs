use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single string or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for EmbedInput {
    fn from(value: &str) -> Self {
        EmbedInput::Single(value.to_string())
    }
}

impl From<String> for EmbedInput {
    fn from(value: String) -> Self {
        EmbedInput::Single(value)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(value: Vec<String>) -> Self {
        EmbedInput::Batch(value)
    }
}

/// Request body for `/api/embed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<Value>,
}

impl EmbedRequest {
    pub fn new(model: impl Into<String>, input: impl Into<EmbedInput>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            truncate: None,
            options: None,
            keep_alive: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_shapes() {
        let single = serde_json::to_value(EmbedRequest::new("all-minilm", "hello")).unwrap();
        assert_eq!(single["input"], json!("hello"));

        let batch = serde_json::to_value(EmbedRequest::new(
            "all-minilm",
            vec!["a".to_string(), "b".to_string()],
        ))
        .unwrap();
        assert_eq!(batch["input"], json!(["a", "b"]));
    }
}
