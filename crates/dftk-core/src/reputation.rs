use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ReputationConfig;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no IP address or URL given")]
    EmptyIdentifier,

    #[error("not an IP address or URL: {0}")]
    InvalidIdentifier(String),

    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid reputation endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("no API key configured (set DFTK_ABUSEIPDB_KEY or reputation.api_key)")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("reputation service returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the reputation service knows about one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationRecord {
    pub ip_address: String,
    pub is_public: bool,
    pub abuse_confidence_score: u8,
    pub country_code: Option<String>,
    pub isp: Option<String>,
    pub domain: Option<String>,
    pub total_reports: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported_at: Option<String>,
}

pub trait ReputationProvider {
    fn lookup(&self, identifier: &str) -> Result<ReputationRecord, LookupError>;
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    data: ReputationRecord,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    detail: String,
}

/// Blocking client for the AbuseIPDB `check` endpoint.
#[derive(Debug, Clone)]
pub struct AbuseIpdbClient {
    http: HttpClient,
    endpoint: Url,
    api_key: String,
    max_age_days: u32,
}

impl AbuseIpdbClient {
    pub fn new(config: &ReputationConfig) -> Result<Self, LookupError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LookupError::MissingApiKey)?;
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|_| LookupError::InvalidEndpoint(config.endpoint.clone()))?;
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            max_age_days: config.max_age_days,
        })
    }
}

impl ReputationProvider for AbuseIpdbClient {
    fn lookup(&self, identifier: &str) -> Result<ReputationRecord, LookupError> {
        let ip = resolve_identifier(identifier)?;
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ipAddress", &ip.to_string())
            .append_pair("maxAgeInDays", &self.max_age_days.to_string());

        debug!(%ip, endpoint = %self.endpoint, "querying reputation service");
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("dftk/", env!("CARGO_PKG_VERSION")))
            .header("Key", &self.api_key)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        let record = parse_check_response(&body)?;
        info!(
            ip = %record.ip_address,
            score = record.abuse_confidence_score,
            reports = record.total_reports,
            "reputation lookup complete"
        );
        Ok(record)
    }
}

/// Turn an IP literal, URL or bare host name into the address to look up.
/// Host names go through the system resolver; the first address wins.
pub fn resolve_identifier(identifier: &str) -> Result<IpAddr, LookupError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(LookupError::EmptyIdentifier);
    }
    if let Ok(ip) = identifier.parse::<IpAddr>() {
        return Ok(ip);
    }

    let url = Url::parse(identifier)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("http://{identifier}")).ok())
        .ok_or_else(|| LookupError::InvalidIdentifier(identifier.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LookupError::InvalidIdentifier(identifier.to_string()))?;

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|source| LookupError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| LookupError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })
}

fn parse_check_response(body: &str) -> Result<ReputationRecord, LookupError> {
    let response: CheckResponse = serde_json::from_str(body)?;
    Ok(response.data)
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.errors.into_iter().next())
        .map(|e| e.detail)
        .unwrap_or_else(|| body.chars().take(200).collect())
}
