//! Client for the hosted text-generation service (Anthropic Messages API).
//!
//! Prompt rendering is local and pure; the completion call is an opaque
//! outbound HTTP request with a timeout. Responses are passed through
//! verbatim.

use crate::config::LlmConfig;
use crate::extract::DicomMetadata;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum LlmError {
	#[error("no API key configured for the summarization service")]
	MissingApiKey,
	#[error("request to summarization service failed: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("summarization service returned status {status}: {body}")]
	Status { status: StatusCode, body: String },
	#[error("summarization service returned an empty response")]
	EmptyResponse,
}

/// Seam for the external completion service so request handlers and tests
/// do not depend on the concrete HTTP client.
#[async_trait]
pub trait TextGenerator: Send + Sync {
	async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct AnthropicClient {
	http: reqwest::Client,
	endpoint: String,
	model: String,
	max_tokens: u32,
	api_key: Option<String>,
}

impl AnthropicClient {
	/// # Errors
	/// Fails if the underlying HTTP client cannot be constructed.
	pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
		let http = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.request_timeout))
			.build()?;

		Ok(Self {
			http,
			endpoint: config.endpoint.clone(),
			model: config.model.clone(),
			max_tokens: config.max_tokens,
			api_key: config.api_key.clone(),
		})
	}
}

#[async_trait]
impl TextGenerator for AnthropicClient {
	#[instrument(skip_all)]
	async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
		let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

		let request = MessagesRequest {
			model: &self.model,
			max_tokens: self.max_tokens,
			messages: vec![Message {
				role: "user",
				content: prompt,
			}],
		};

		let response = self
			.http
			.post(&self.endpoint)
			.header("x-api-key", api_key)
			.header("anthropic-version", ANTHROPIC_VERSION)
			.json(&request)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(LlmError::Status { status, body });
		}

		let body: MessagesResponse = response.json().await?;
		debug!(blocks = body.content.len(), "Received completion response");
		body.content
			.into_iter()
			.find_map(|block| block.text)
			.ok_or(LlmError::EmptyResponse)
	}
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
	model: &'a str,
	max_tokens: u32,
	messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
	role: &'static str,
	content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
	content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
	#[serde(default)]
	text: Option<String>,
}

/// Requests a plain-language clinical summary for one metadata record.
///
/// # Errors
/// Propagates any failure of the external completion call.
pub async fn summarize(
	llm: &dyn TextGenerator,
	metadata: &DicomMetadata,
) -> Result<String, LlmError> {
	llm.generate(&summary_prompt(metadata)).await
}

/// Requests a clinical comparison of two metadata records.
///
/// # Errors
/// Propagates any failure of the external completion call.
pub async fn compare(
	llm: &dyn TextGenerator,
	first: &DicomMetadata,
	second: &DicomMetadata,
) -> Result<String, LlmError> {
	llm.generate(&comparison_prompt(first, second)).await
}

fn summary_prompt(metadata: &DicomMetadata) -> String {
	format!(
		"You are a clinical informatics assistant with expertise in medical imaging workflows. \
Given the following DICOM scan metadata, write a concise plain-language summary (2-3 sentences) \
suitable for a non-technical clinical workflow dashboard. Focus on what kind of scan this is and \
any relevant technical details a clinician would care about. If cardiac gating parameters are \
present (trigger delay, heart rate, cardiac trigger source), include the likely cardiac phase \
and its clinical significance \u{2014} for example whether the acquisition corresponds to systole or \
diastole based on the trigger delay.\n\nMetadata:\n{}",
		render_record(metadata)
	)
}

fn comparison_prompt(first: &DicomMetadata, second: &DicomMetadata) -> String {
	format!(
		"You are a clinical informatics assistant with expertise in medical imaging workflows. \
Compare the two DICOM scans described below in a concise plain-language paragraph suitable for \
a non-technical clinical workflow dashboard. Point out differences in modality, body part, \
acquisition geometry and timing, and \u{2014} if cardiac gating parameters are present \u{2014} whether the \
scans were acquired in different cardiac phases.\n\nScan 1 metadata:\n{}\n\nScan 2 metadata:\n{}",
		render_record(first),
		render_record(second)
	)
}

fn render_record(metadata: &DicomMetadata) -> String {
	serde_json::to_string_pretty(metadata).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn summary_prompt_embeds_field_values() {
		let metadata = DicomMetadata {
			modality: Some("CT".into()),
			heart_rate: Some("72".into()),
			..DicomMetadata::default()
		};
		let prompt = summary_prompt(&metadata);

		assert!(prompt.contains("\"modality\": \"CT\""));
		assert!(prompt.contains("\"heart_rate\": \"72\""));
		assert!(prompt.contains("cardiac phase"));
	}

	#[test]
	fn comparison_prompt_embeds_both_records() {
		let first = DicomMetadata {
			modality: Some("CT".into()),
			..DicomMetadata::default()
		};
		let second = DicomMetadata {
			modality: Some("MR".into()),
			..DicomMetadata::default()
		};
		let prompt = comparison_prompt(&first, &second);

		assert!(prompt.contains("Scan 1 metadata:"));
		assert!(prompt.contains("Scan 2 metadata:"));
		assert!(prompt.contains("\"modality\": \"CT\""));
		assert!(prompt.contains("\"modality\": \"MR\""));
	}
}
