//! RETS Protocol Client (C1, §4.1).
//!
//! Presents an authenticated session to other components; hides cookie and
//! capability-URL management. Session caching mirrors the teacher's
//! `AppConfig::load`/`save` JSON round-trip (`config::app_config`), keyed at a
//! single well-known path rather than per-library.

use crate::config::RetsCredentials;
use chrono::{DateTime, Utc};
use reqwest::header::{COOKIE, SET_COOKIE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("login rejected: code {reply_code} ({reply_text})")]
	LoginRejected {
		reply_code: String,
		reply_text: String,
	},
	#[error("no cookies returned by login")]
	NoCookie,
	#[error("invalid URL: {0}")]
	InvalidUrl(String),
	#[error("parse error: {0}")]
	Parse(#[from] crate::rets::parser::ParseError),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),
}

/// A capability URL set plus the session cookie string and its expiry.
/// Passed by value through every component function rather than stashed in a
/// process-global (§9 design note: "reject a process-global session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
	pub cookie: String,
	pub expires_at: DateTime<Utc>,
	pub capabilities: HashMap<String, String>,
}

impl Session {
	pub fn is_expired(&self) -> bool {
		Utc::now() >= self.expires_at
	}

	pub fn capability_url(&self, name: &str) -> Option<&str> {
		self.capabilities.get(name).map(String::as_str)
	}
}

const SESSION_TTL_HOURS: i64 = 1;

pub struct RetsClient {
	http: reqwest::Client,
	credentials: RetsCredentials,
	session_cache_path: std::path::PathBuf,
}

impl RetsClient {
	pub fn new(credentials: RetsCredentials, session_cache_path: impl AsRef<Path>, timeout: Duration) -> Result<Self, ClientError> {
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.cookie_store(false) // the session cookie is managed explicitly, not via reqwest's jar
			.tcp_keepalive(Duration::from_secs(60))
			.build()?;

		Ok(Self {
			http,
			credentials,
			session_cache_path: session_cache_path.as_ref().to_path_buf(),
		})
	}

	fn load_cached_session(&self) -> Option<Session> {
		let bytes = std::fs::read(&self.session_cache_path).ok()?;
		let session: Session = serde_json::from_slice(&bytes).ok()?;
		if session.is_expired() {
			None
		} else {
			Some(session)
		}
	}

	fn save_cached_session(&self, session: &Session) -> Result<(), ClientError> {
		if let Some(parent) = self.session_cache_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let bytes = serde_json::to_vec_pretty(session)?;
		std::fs::write(&self.session_cache_path, bytes)?;
		Ok(())
	}

	fn clear_cached_session(&self) {
		let _ = std::fs::remove_file(&self.session_cache_path);
	}

	/// Log in, or return the cached session if it has not yet expired (§4.1).
	#[instrument(skip(self))]
	pub async fn login(&self) -> Result<Session, ClientError> {
		if let Some(cached) = self.load_cached_session() {
			debug!("reusing cached RETS session");
			return Ok(cached);
		}

		let mut url = reqwest::Url::parse(&self.credentials.login_url)
			.map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
		url.query_pairs_mut()
			.append_pair("rets-version", &self.credentials.version);

		let response = self
			.http
			.get(url)
			.basic_auth(&self.credentials.username, Some(&self.credentials.password))
			.header("RETS-Version", &self.credentials.version)
			.header(USER_AGENT, &self.credentials.user_agent)
			.send()
			.await?;

		let cookie = response
			.headers()
			.get_all(SET_COOKIE)
			.iter()
			.filter_map(|v| v.to_str().ok())
			.map(|full| full.split(';').next().unwrap_or(full).trim().to_string())
			.collect::<Vec<_>>()
			.join("; ");

		if cookie.is_empty() {
			return Err(ClientError::NoCookie);
		}

		let body = response.text().await?;
		let login_response = crate::rets::parser::parse_login(&body)?;

		if login_response.reply_code != "0" {
			return Err(ClientError::LoginRejected {
				reply_code: login_response.reply_code,
				reply_text: login_response.reply_text,
			});
		}

		let session = Session {
			cookie,
			expires_at: Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS),
			capabilities: login_response.capabilities,
		};

		self.save_cached_session(&session)?;
		Ok(session)
	}

	/// Best-effort logout; failure is non-fatal (§4.1).
	#[instrument(skip(self, session))]
	pub async fn logout(&self, session: &Session) {
		let Some(logout_url) = session.capability_url("Logout") else {
			return;
		};
		match self
			.http
			.get(logout_url)
			.header(COOKIE, &session.cookie)
			.header("RETS-Version", &self.credentials.version)
			.header(USER_AGENT, &self.credentials.user_agent)
			.send()
			.await
		{
			Ok(_) => self.clear_cached_session(),
			Err(e) => warn!(error = %e, "logout failed, continuing"),
		}
	}

	/// Issue an authenticated GET against a capability-relative or absolute
	/// URL, returning the raw bytes and response headers (§4.1).
	#[instrument(skip(self, session, query))]
	pub async fn authenticated_request(
		&self,
		session: &Session,
		url: &str,
		query: &[(&str, &str)],
	) -> Result<(bytes::Bytes, reqwest::header::HeaderMap), ClientError> {
		let response = self
			.http
			.get(url)
			.query(query)
			.basic_auth(&self.credentials.username, Some(&self.credentials.password))
			.header(COOKIE, &session.cookie)
			.header("RETS-Version", &self.credentials.version)
			.header(USER_AGENT, &self.credentials.user_agent)
			.send()
			.await?;

		let headers = response.headers().clone();
		let bytes = response.bytes().await?;
		Ok((bytes, headers))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_expiry_is_honored() {
		let session = Session {
			cookie: "RETS-Session-ID=abc".into(),
			expires_at: Utc::now() - chrono::Duration::seconds(1),
			capabilities: HashMap::new(),
		};
		assert!(session.is_expired());
	}

	#[test]
	fn capability_lookup() {
		let mut caps = HashMap::new();
		caps.insert("Search".to_string(), "/rets/search".to_string());
		let session = Session {
			cookie: String::new(),
			expires_at: Utc::now() + chrono::Duration::hours(1),
			capabilities: caps,
		};
		assert_eq!(session.capability_url("Search"), Some("/rets/search"));
		assert_eq!(session.capability_url("Logout"), None);
	}
}
