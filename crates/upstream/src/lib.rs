// SPDX-License-Identifier: Apache-2.0

//! Clients for the upstream cloud services.
//!
//! The reservation syncer needs four read-only views: commitments,
//! projects, flavors, and servers. Each view sits behind a trait so the
//! syncer can be tested without a cloud; the HTTP implementations share
//! one authenticated, rate-limited REST client.
//!
//! All clients are shared and thread-safe. Every call is preceded by a
//! small jittered delay so a sync tick fanning out over many list calls
//! does not hammer the upstream APIs.

pub mod client;
pub mod error;
pub mod identity;
pub mod testing;
pub mod types;

pub use client::{CommitmentSource, ComputeInventory, HttpCommitmentSource, HttpComputeInventory, RequestPacer};
pub use error::Error;
pub use identity::{IdentityGateway, PasswordIdentity, Token};
pub use types::{Commitment, Flavor, Project, Server};
