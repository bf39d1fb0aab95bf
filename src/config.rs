use serde::{Deserialize, Deserializer};
use std::net::IpAddr;
use tracing::Level;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: ServerConfig,
	pub llm: LlmConfig,
}

impl AppConfig {
	/// Loads the configuration by layering the embedded defaults, an optional
	/// `config.toml` in the working directory and `DICOM_INSIGHT_*` environment
	/// variables.
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(config::Environment::with_prefix("DICOM_INSIGHT").separator("_"))
			.build()?;

		let mut config: Self = s.try_deserialize()?;
		// The upstream service reads its key from ANTHROPIC_API_KEY, so honor
		// that variable as a fallback.
		if config.llm.api_key.is_none() {
			config.llm.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
		}
		Ok(config)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Log level for the fmt subscriber. Also configurable via RUST_LOG.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: Level,
	/// Sentry DSN. An empty or absent value disables Sentry.
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub http: HttpServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	/// The interface the HTTP server will be listening on
	pub interface: IpAddr,
	/// The port for the HTTP server
	pub port: u16,
	/// Maximum size of an uploaded request body in bytes
	pub max_upload_size: usize,
	/// Request timeout in seconds
	pub request_timeout: u64,
	pub graceful_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
	/// Messages API endpoint of the hosted text-generation service.
	pub endpoint: String,
	pub model: String,
	pub max_tokens: u32,
	/// Timeout in seconds for a single outbound completion request.
	pub request_timeout: u64,
	/// API key for the service. Falls back to ANTHROPIC_API_KEY.
	pub api_key: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
	D: Deserializer<'de>,
{
	let value = String::deserialize(deserializer)?;
	value.parse().map_err(serde::de::Error::custom)
}
