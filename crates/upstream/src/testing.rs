// SPDX-License-Identifier: Apache-2.0

//! Static in-memory doubles for the upstream clients.

use crate::client::{CommitmentSource, ComputeInventory};
use crate::error::Error;
use crate::identity::{IdentityGateway, Token};
use crate::types::{Commitment, Flavor, Project, Server};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;

/// A commitment source serving a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticCommitments {
    /// The commitments to serve.
    pub commitments: Vec<Commitment>,
}

#[async_trait]
impl CommitmentSource for StaticCommitments {
    async fn list_commitments(&self) -> Result<Vec<Commitment>, Error> {
        Ok(self.commitments.clone())
    }
}

/// An inventory serving fixed lists.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    /// The projects to serve.
    pub projects: Vec<Project>,
    /// The flavors to serve.
    pub flavors: Vec<Flavor>,
    /// The servers to serve.
    pub servers: Vec<Server>,
}

#[async_trait]
impl ComputeInventory for StaticInventory {
    async fn list_projects(&self) -> Result<Vec<Project>, Error> {
        Ok(self.projects.clone())
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, Error> {
        Ok(self.flavors.clone())
    }

    async fn list_servers(&self) -> Result<Vec<Server>, Error> {
        Ok(self.servers.clone())
    }
}

/// An identity gateway handing out a never-expiring static token.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    /// Endpoints the token carries.
    pub endpoints: BTreeMap<String, String>,
}

#[async_trait]
impl IdentityGateway for StaticIdentity {
    async fn authenticate(&self) -> Result<Token, Error> {
        Ok(Token {
            token: "static-token".to_owned(),
            expires_at: Utc::now() + ChronoDuration::hours(24),
            endpoints: self.endpoints.clone(),
        })
    }
}
