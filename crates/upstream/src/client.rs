// SPDX-License-Identifier: Apache-2.0

//! Commitment and inventory clients.
//!
//! The syncer consumes four list views behind two traits. The HTTP
//! implementations resolve their endpoints from the identity catalog on
//! every call (tokens rotate, catalogs rarely do) and pace their requests
//! with a jittered delay.

use crate::error::Error;
use crate::identity::IdentityGateway;
use crate::types::{Commitment, Flavor, Project, Server};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Paces upstream calls with a base delay plus random jitter.
#[derive(Debug, Clone)]
pub struct RequestPacer {
    base: Duration,
}

impl RequestPacer {
    /// Creates a pacer with the given base delay; the jitter adds up to
    /// half of it.
    #[must_use]
    pub fn new(base: Duration) -> Self {
        RequestPacer { base }
    }

    /// Waits the paced delay.
    pub async fn pace(&self) {
        if self.base.is_zero() {
            return;
        }
        let jitter = rand::rng().random_range(Duration::ZERO..=self.base / 2);
        tokio::time::sleep(self.base + jitter).await;
    }
}

/// Lists capacity commitments.
#[async_trait]
pub trait CommitmentSource: Send + Sync {
    /// Lists all commitments visible to this engine.
    async fn list_commitments(&self) -> Result<Vec<Commitment>, Error>;
}

/// Lists compute inventory: projects, flavors, and live servers.
#[async_trait]
pub trait ComputeInventory: Send + Sync {
    /// Lists all projects.
    async fn list_projects(&self) -> Result<Vec<Project>, Error>;
    /// Lists all flavors.
    async fn list_flavors(&self) -> Result<Vec<Flavor>, Error>;
    /// Lists all live servers across projects.
    async fn list_servers(&self) -> Result<Vec<Server>, Error>;
}

struct RestClient {
    http: reqwest::Client,
    identity: Arc<dyn IdentityGateway>,
    pacer: RequestPacer,
    /// Per-service endpoint overrides from the settings bundle; services
    /// not listed here are resolved from the identity catalog.
    endpoint_overrides: BTreeMap<String, String>,
}

impl RestClient {
    async fn get_json<T: DeserializeOwned>(&self, service: &str, path: &str) -> Result<T, Error> {
        self.pacer.pace().await;
        let token = self.identity.authenticate().await?;
        let base = match self.endpoint_overrides.get(service) {
            Some(endpoint) => endpoint.as_str(),
            None => token.endpoint(service)?,
        };
        let url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));

        let response = self
            .http
            .get(&url)
            .header("x-auth-token", token.token.as_str())
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.clone(),
                details: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::Http {
                url,
                details: format!("status {}", response.status()),
            });
        }
        response.json().await.map_err(|e| Error::Decode {
            url,
            details: e.to_string(),
        })
    }
}

/// HTTP implementation of [`CommitmentSource`].
pub struct HttpCommitmentSource {
    rest: RestClient,
}

impl HttpCommitmentSource {
    /// Creates a source over a shared identity gateway.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        identity: Arc<dyn IdentityGateway>,
        pacer: RequestPacer,
        endpoint_overrides: BTreeMap<String, String>,
    ) -> Self {
        HttpCommitmentSource {
            rest: RestClient {
                http,
                identity,
                pacer,
                endpoint_overrides,
            },
        }
    }
}

#[async_trait]
impl CommitmentSource for HttpCommitmentSource {
    async fn list_commitments(&self) -> Result<Vec<Commitment>, Error> {
        let document: CommitmentsDocument = self
            .rest
            .get_json("resources", "v1/commitments")
            .await?;
        Ok(document
            .commitments
            .into_iter()
            .map(|c| Commitment {
                uuid: c.uuid,
                service_type: c.service_type,
                resource_name: c.resource_name,
                amount: c.amount,
                project_id: c.project_id,
            })
            .collect())
    }
}

/// HTTP implementation of [`ComputeInventory`].
pub struct HttpComputeInventory {
    rest: RestClient,
}

impl HttpComputeInventory {
    /// Creates an inventory client over a shared identity gateway.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        identity: Arc<dyn IdentityGateway>,
        pacer: RequestPacer,
        endpoint_overrides: BTreeMap<String, String>,
    ) -> Self {
        HttpComputeInventory {
            rest: RestClient {
                http,
                identity,
                pacer,
                endpoint_overrides,
            },
        }
    }
}

#[async_trait]
impl ComputeInventory for HttpComputeInventory {
    async fn list_projects(&self) -> Result<Vec<Project>, Error> {
        let document: ProjectsDocument = self.rest.get_json("identity", "v3/projects").await?;
        Ok(document
            .projects
            .into_iter()
            .map(|p| Project {
                id: p.id,
                domain_id: p.domain_id,
            })
            .collect())
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, Error> {
        let document: FlavorsDocument = self.rest.get_json("compute", "flavors/detail").await?;
        Ok(document
            .flavors
            .into_iter()
            .map(|f| Flavor {
                name: f.name,
                vcpus: f.vcpus,
                ram_mb: f.ram,
                extra_specs: f.extra_specs,
            })
            .collect())
    }

    async fn list_servers(&self) -> Result<Vec<Server>, Error> {
        let document: ServersDocument = self
            .rest
            .get_json("compute", "servers/detail?all_tenants=1")
            .await?;
        Ok(document
            .servers
            .into_iter()
            .map(|s| Server {
                id: s.id,
                project_id: s.tenant_id,
                flavor_name: s.flavor.original_name,
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct CommitmentsDocument {
    #[serde(default)]
    commitments: Vec<WireCommitment>,
}

#[derive(Deserialize)]
struct WireCommitment {
    uuid: String,
    service_type: String,
    resource_name: String,
    amount: u64,
    project_id: String,
}

#[derive(Deserialize)]
struct ProjectsDocument {
    #[serde(default)]
    projects: Vec<WireProject>,
}

#[derive(Deserialize)]
struct WireProject {
    id: String,
    domain_id: String,
}

#[derive(Deserialize)]
struct FlavorsDocument {
    #[serde(default)]
    flavors: Vec<WireFlavor>,
}

#[derive(Deserialize)]
struct WireFlavor {
    name: String,
    vcpus: u64,
    ram: u64,
    #[serde(default, rename = "extra_specs")]
    extra_specs: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ServersDocument {
    #[serde(default)]
    servers: Vec<WireServer>,
}

#[derive(Deserialize)]
struct WireServer {
    id: String,
    tenant_id: String,
    flavor: WireServerFlavor,
}

#[derive(Deserialize)]
struct WireServerFlavor {
    original_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_delay_pacer_returns_immediately() {
        RequestPacer::new(Duration::ZERO).pace().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_waits_at_least_the_base_delay() {
        let pacer = RequestPacer::new(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        pacer.pace().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wire_shapes_decode_from_upstream_documents() {
        let servers: ServersDocument = serde_json::from_value(serde_json::json!({
            "servers": [
                {"id": "s1", "tenant_id": "p1", "flavor": {"original_name": "m1.large"}}
            ]
        }))
        .unwrap();
        assert_eq!(servers.servers[0].flavor.original_name, "m1.large");

        let flavors: FlavorsDocument = serde_json::from_value(serde_json::json!({
            "flavors": [
                {"name": "m1.large", "vcpus": 8, "ram": 16384,
                 "extra_specs": {"capabilities:hypervisor_type": "qemu"}}
            ]
        }))
        .unwrap();
        assert_eq!(flavors.flavors[0].ram, 16384);
    }
}
