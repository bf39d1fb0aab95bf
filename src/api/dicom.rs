//! HTTP routes for DICOM analysis, summarization, comparison and FHIR
//! mapping.
//!
//! Uploads arrive as multipart form data. The `.dcm` extension check runs
//! before any parsing; validation failures map to 400 and processing
//! failures to 422, with the underlying cause in the `detail` field.

use crate::extract::{self, DicomMetadata, ExtractError};
use crate::fhir::{self, ImagingStudy};
use crate::llm::{self, LlmError};
use crate::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{instrument, warn};

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/analyze", post(analyze))
		.route("/summarize", post(summarize))
		.route("/compare", post(compare))
		.route("/fhir", post(fhir))
}

#[derive(Debug, Error)]
pub enum ApiError {
	#[error("File must be a .dcm DICOM file")]
	InvalidExtension,
	#[error("Missing upload field `{0}`")]
	MissingFile(&'static str),
	#[error("Failed to read multipart request: {0}")]
	Multipart(#[from] MultipartError),
	#[error("Could not parse DICOM file: {0}")]
	Parse(#[from] ExtractError),
	#[error("Error processing file: {0}")]
	Llm(#[from] LlmError),
}

impl ApiError {
	const fn status(&self) -> StatusCode {
		match self {
			Self::InvalidExtension | Self::MissingFile(_) | Self::Multipart(_) => {
				StatusCode::BAD_REQUEST
			}
			Self::Parse(_) | Self::Llm(_) => StatusCode::UNPROCESSABLE_ENTITY,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status == StatusCode::UNPROCESSABLE_ENTITY {
			warn!("Request failed: {self}");
		}
		(status, Json(json!({ "detail": self.to_string() }))).into_response()
	}
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
	pub metadata: DicomMetadata,
	pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
	pub file1_metadata: DicomMetadata,
	pub file2_metadata: DicomMetadata,
	pub comparison: String,
}

#[derive(Debug, Serialize)]
pub struct FhirResponse {
	#[serde(rename = "resourceType")]
	pub resource_type: &'static str,
	pub fhir_resource: ImagingStudy,
}

#[instrument(skip_all)]
async fn analyze(mut multipart: Multipart) -> Result<Json<DicomMetadata>, ApiError> {
	let mut uploads = collect_uploads(&mut multipart).await?;
	let upload = take_dcm(&mut uploads, "file")?;
	let metadata = extract::extract_metadata(&upload.bytes)?;
	Ok(Json(metadata))
}

#[instrument(skip_all)]
async fn summarize(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<Json<SummaryResponse>, ApiError> {
	let mut uploads = collect_uploads(&mut multipart).await?;
	let upload = take_dcm(&mut uploads, "file")?;
	let metadata = extract::extract_metadata(&upload.bytes)?;
	let summary = llm::summarize(state.llm.as_ref(), &metadata).await?;
	Ok(Json(SummaryResponse { metadata, summary }))
}

#[instrument(skip_all)]
async fn compare(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<Json<CompareResponse>, ApiError> {
	let mut uploads = collect_uploads(&mut multipart).await?;
	let first = take_dcm(&mut uploads, "file1")?;
	let second = take_dcm(&mut uploads, "file2")?;
	let file1_metadata = extract::extract_metadata(&first.bytes)?;
	let file2_metadata = extract::extract_metadata(&second.bytes)?;
	let comparison = llm::compare(state.llm.as_ref(), &file1_metadata, &file2_metadata).await?;
	Ok(Json(CompareResponse {
		file1_metadata,
		file2_metadata,
		comparison,
	}))
}

#[instrument(skip_all)]
async fn fhir(mut multipart: Multipart) -> Result<Json<FhirResponse>, ApiError> {
	let mut uploads = collect_uploads(&mut multipart).await?;
	let upload = take_dcm(&mut uploads, "file")?;
	let metadata = extract::extract_metadata(&upload.bytes)?;
	Ok(Json(FhirResponse {
		resource_type: "ImagingStudy",
		fhir_resource: fhir::to_imaging_study(&metadata),
	}))
}

struct Upload {
	filename: String,
	bytes: Bytes,
}

async fn collect_uploads(multipart: &mut Multipart) -> Result<HashMap<String, Upload>, ApiError> {
	let mut uploads = HashMap::new();
	while let Some(field) = multipart.next_field().await? {
		let Some(name) = field.name().map(ToString::to_string) else {
			continue;
		};
		let filename = field.file_name().unwrap_or_default().to_string();
		let bytes = field.bytes().await?;
		uploads.insert(name, Upload { filename, bytes });
	}
	Ok(uploads)
}

/// Pops the named upload and enforces the `.dcm` extension before any
/// parsing happens.
fn take_dcm(uploads: &mut HashMap<String, Upload>, name: &'static str) -> Result<Upload, ApiError> {
	let upload = uploads.remove(name).ok_or(ApiError::MissingFile(name))?;
	if upload.filename.ends_with(".dcm") {
		Ok(upload)
	} else {
		Err(ApiError::InvalidExtension)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{
		AppConfig, HttpServerConfig, LlmConfig, ServerConfig, TelemetryConfig,
	};
	use crate::extract::tests::{sample_dataset, to_part10_bytes};
	use crate::llm::TextGenerator;
	use async_trait::async_trait;
	use axum::body::Body;
	use axum::http::header::CONTENT_TYPE;
	use axum::http::Request;
	use std::net::{IpAddr, Ipv4Addr};
	use std::sync::Arc;
	use tower::ServiceExt;
	use tracing::Level;

	const BOUNDARY: &str = "dicom-insight-test-boundary";

	struct FakeLlm;

	#[async_trait]
	impl TextGenerator for FakeLlm {
		async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
			Ok("A routine chest CT.".to_string())
		}
	}

	fn test_config() -> AppConfig {
		AppConfig {
			telemetry: TelemetryConfig {
				level: Level::INFO,
				sentry: None,
			},
			server: ServerConfig {
				http: HttpServerConfig {
					interface: IpAddr::V4(Ipv4Addr::LOCALHOST),
					port: 0,
					max_upload_size: 1024 * 1024,
					request_timeout: 5,
					graceful_shutdown: false,
				},
			},
			llm: LlmConfig {
				endpoint: "http://localhost:0".to_string(),
				model: "test-model".to_string(),
				max_tokens: 16,
				request_timeout: 1,
				api_key: None,
			},
		}
	}

	fn app() -> Router {
		crate::api::routes().with_state(AppState {
			config: test_config(),
			llm: Arc::new(FakeLlm),
		})
	}

	fn multipart_request(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
		let mut body = Vec::new();
		for (name, filename, bytes) in parts {
			body.extend_from_slice(
				format!(
					"--{BOUNDARY}\r\nContent-Disposition: form-data; \
name=\"{name}\"; filename=\"{filename}\"\r\n\
Content-Type: application/octet-stream\r\n\r\n"
				)
				.as_bytes(),
			);
			body.extend_from_slice(bytes);
			body.extend_from_slice(b"\r\n");
		}
		body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

		Request::builder()
			.method("POST")
			.uri(uri)
			.header(
				CONTENT_TYPE,
				format!("multipart/form-data; boundary={BOUNDARY}"),
			)
			.body(Body::from(body))
			.unwrap()
	}

	async fn json_body(response: Response) -> serde_json::Value {
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn health_reports_healthy() {
		let request = Request::builder()
			.uri("/health")
			.body(Body::empty())
			.unwrap();
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(json_body(response).await, json!({ "status": "healthy" }));
	}

	#[tokio::test]
	async fn analyze_rejects_wrong_extension() {
		let request = multipart_request("/dicom/analyze", &[("file", "scan.txt", b"junk")]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		let body = json_body(response).await;
		assert_eq!(body["detail"], "File must be a .dcm DICOM file");
	}

	#[tokio::test]
	async fn analyze_rejects_missing_field() {
		let request = multipart_request("/dicom/analyze", &[("other", "scan.dcm", b"junk")]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn analyze_rejects_unparseable_dicom() {
		let request = multipart_request("/dicom/analyze", &[("file", "scan.dcm", b"junk")]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
		let body = json_body(response).await;
		let detail = body["detail"].as_str().unwrap();
		assert!(detail.starts_with("Could not parse DICOM file"));
	}

	#[tokio::test]
	async fn analyze_returns_metadata() {
		let bytes = to_part10_bytes(sample_dataset());
		let request = multipart_request("/dicom/analyze", &[("file", "scan.dcm", &bytes)]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["patient_id"], "PAT-001");
		assert_eq!(body["modality"], "CT");
		assert_eq!(body["rows"], 512);
		// Absent fields are explicit nulls
		assert!(body.as_object().unwrap().contains_key("number_of_slices"));
	}

	#[tokio::test]
	async fn summarize_returns_metadata_and_summary() {
		let bytes = to_part10_bytes(sample_dataset());
		let request = multipart_request("/dicom/summarize", &[("file", "scan.dcm", &bytes)]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["metadata"]["modality"], "CT");
		assert_eq!(body["summary"], "A routine chest CT.");
	}

	#[tokio::test]
	async fn compare_checks_each_file_extension() {
		let bytes = to_part10_bytes(sample_dataset());
		let request = multipart_request(
			"/dicom/compare",
			&[("file1", "scan.dcm", &bytes), ("file2", "scan.txt", b"junk")],
		);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn compare_returns_both_records_and_comparison() {
		let bytes = to_part10_bytes(sample_dataset());
		let request = multipart_request(
			"/dicom/compare",
			&[
				("file1", "first.dcm", &bytes),
				("file2", "second.dcm", &bytes),
			],
		);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["file1_metadata"]["modality"], "CT");
		assert_eq!(body["file2_metadata"]["modality"], "CT");
		assert_eq!(body["comparison"], "A routine chest CT.");
	}

	#[tokio::test]
	async fn fhir_wraps_imaging_study() {
		let bytes = to_part10_bytes(sample_dataset());
		let request = multipart_request("/dicom/fhir", &[("file", "scan.dcm", &bytes)]);
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["resourceType"], "ImagingStudy");
		assert_eq!(
			body["fhir_resource"]["subject"]["reference"],
			"Patient/PAT-001"
		);
		assert_eq!(body["fhir_resource"]["started"], "2023-01-15");
	}
}
