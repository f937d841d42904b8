// SPDX-License-Identifier: Apache-2.0

//! The identity gateway.
//!
//! Authenticates against the upstream cloud and yields a scoped token
//! plus the service endpoints from the catalog. The password
//! implementation caches its token and re-authenticates shortly before
//! expiry; all clients share one gateway instance.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// A scoped token with the endpoints resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The raw token passed as `X-Auth-Token`.
    pub token: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
    /// Public endpoint per service type.
    pub endpoints: BTreeMap<String, String>,
}

impl Token {
    /// Whether the token is still usable, with a safety margin.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.expires_at - ChronoDuration::minutes(5) > Utc::now()
    }

    /// The endpoint of a service, or an error naming the gap.
    pub fn endpoint(&self, service: &str) -> Result<&str, Error> {
        self.endpoints
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingEndpoint {
                service: service.to_owned(),
            })
    }
}

/// Authenticates against the upstream cloud.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Returns a fresh scoped token, re-authenticating if needed.
    async fn authenticate(&self) -> Result<Token, Error>;
}

/// Credentials loaded from a secret handle.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Credentials {
    pub username: String,
    pub password: String,
    pub user_domain_name: String,
    pub project_name: String,
    pub project_domain_name: String,
}

/// Password authentication against a Keystone-style identity endpoint.
pub struct PasswordIdentity {
    http: reqwest::Client,
    auth_url: String,
    credentials: Credentials,
    cached: Mutex<Option<Token>>,
}

impl PasswordIdentity {
    /// Creates a gateway from the identity endpoint and a credential
    /// handle (a path to a JSON credentials document).
    pub fn from_secret_ref(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        secret_ref: &str,
    ) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(Path::new(secret_ref)).map_err(|e| {
            Error::SecretRead {
                secret_ref: secret_ref.to_owned(),
                details: e.to_string(),
            }
        })?;
        let credentials: Credentials =
            serde_json::from_str(&raw).map_err(|e| Error::SecretRead {
                secret_ref: secret_ref.to_owned(),
                details: e.to_string(),
            })?;
        Ok(PasswordIdentity {
            http,
            auth_url: auth_url.into(),
            credentials,
            cached: Mutex::new(None),
        })
    }

    async fn password_auth(&self) -> Result<Token, Error> {
        let url = format!("{}/v3/auth/tokens", self.auth_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.credentials.username,
                            "domain": {"name": self.credentials.user_domain_name},
                            "password": self.credentials.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.credentials.project_name,
                        "domain": {"name": self.credentials.project_domain_name},
                    }
                }
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.clone(),
                details: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::Auth {
                details: format!("identity returned {}", response.status()),
            });
        }
        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::Auth {
                details: "missing x-subject-token header".to_owned(),
            })?;
        let document: TokenDocument =
            response.json().await.map_err(|e| Error::Decode {
                url,
                details: e.to_string(),
            })?;

        let mut endpoints = BTreeMap::new();
        for entry in document.token.catalog {
            let public = entry
                .endpoints
                .into_iter()
                .find(|e| e.interface == "public")
                .map(|e| e.url);
            if let Some(url) = public {
                let _ = endpoints.insert(entry.service_type, url);
            }
        }
        debug!(services = endpoints.len(), "authenticated against identity");
        Ok(Token {
            token,
            expires_at: document.token.expires_at,
            endpoints,
        })
    }
}

#[async_trait]
impl IdentityGateway for PasswordIdentity {
    async fn authenticate(&self) -> Result<Token, Error> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.clone());
            }
        }
        let token = self.password_auth().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[derive(Deserialize)]
struct TokenDocument {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
}
