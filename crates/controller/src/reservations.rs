// SPDX-License-Identifier: Apache-2.0

//! The reservation syncer.
//!
//! Periodically converts upstream capacity commitments into declarative
//! reservations. Per tick: fetch commitments, projects, flavors, and
//! servers; keep per-instance compute commitments whose flavor passes the
//! hypervisor allow-list; subtract live servers of the same project and
//! flavor (each server consumes at most one commitment unit across all
//! commitments); emit one reservation per remaining unit under a stable
//! name; reconcile against the reservations this syncer already owns.
//!
//! A failed tick is logged and retried on the next interval; a single
//! skipped commitment never fails the tick.

use crate::error::Error;
use cortex_config::SchedulingDomain;
use cortex_config::objects::{
    ObjectMeta, ReservationObject, ReservationSpec, ResourceRequests, SchedulerHint,
    SchedulerHintNova,
};
use cortex_config::settings::ReservationSettings;
use cortex_store::ControlPlaneStore;
use cortex_telemetry::ReservationMetrics;
use cortex_upstream::{Commitment, CommitmentSource, ComputeInventory, Flavor, Project, Server};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commitment uuids must yield at least this many characters for the
/// reservation name prefix.
const UUID_PREFIX_LEN: usize = 5;

/// Why a commitment produced no reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCommitment {
    /// The commitment uuid.
    pub uuid: String,
    /// Machine-readable skip reason.
    pub reason: &'static str,
}

/// The desired reservation set computed from one tick's inputs.
#[derive(Debug, Default)]
pub struct ReservationPlan {
    /// Reservations that should exist.
    pub reservations: Vec<ReservationObject>,
    /// Commitments that were skipped with a structured reason.
    pub skipped: Vec<SkippedCommitment>,
}

/// Statistics of one completed sync tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Reservations desired after planning.
    pub desired: usize,
    /// Reservations created or updated this tick.
    pub applied: usize,
    /// Orphaned reservations deleted this tick.
    pub deleted: usize,
    /// Commitments skipped this tick.
    pub skipped: usize,
}

/// Computes the desired reservations from upstream state.
///
/// Pure; the syncer and its tests share it. Commitments are processed in
/// uuid order and servers in id order, so the subtraction is
/// deterministic across ticks.
#[must_use]
pub fn plan_reservations(
    settings: &ReservationSettings,
    commitments: &[Commitment],
    projects: &[Project],
    flavors: &[Flavor],
    servers: &[Server],
) -> ReservationPlan {
    let projects: BTreeMap<&str, &Project> =
        projects.iter().map(|p| (p.id.as_str(), p)).collect();
    let flavors: BTreeMap<&str, &Flavor> =
        flavors.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut sorted_servers: Vec<&Server> = servers.iter().collect();
    sorted_servers.sort_by(|a, b| a.id.cmp(&b.id));
    let mut sorted_commitments: Vec<&Commitment> = commitments.iter().collect();
    sorted_commitments.sort_by(|a, b| a.uuid.cmp(&b.uuid));

    let mut consumed: BTreeSet<&str> = BTreeSet::new();
    let mut plan = ReservationPlan::default();

    for commitment in sorted_commitments {
        if commitment.service_type != "compute" {
            continue;
        }
        let Some(flavor_name) = commitment.instance_flavor() else {
            continue;
        };
        let Some(flavor) = flavors.get(flavor_name) else {
            plan.skipped.push(SkippedCommitment {
                uuid: commitment.uuid.clone(),
                reason: "unknown-flavor",
            });
            continue;
        };
        if let Some(family) = flavor.hypervisor_type() {
            if !settings.hypervisor_types.iter().any(|t| t == family) {
                debug!(
                    commitment = %commitment.uuid,
                    hypervisor = family,
                    "dropping commitment for unsupported hypervisor family"
                );
                continue;
            }
        }

        let mut remaining = commitment.amount;
        for server in &sorted_servers {
            if remaining == 0 {
                break;
            }
            if server.project_id == commitment.project_id
                && server.flavor_name == flavor_name
                && !consumed.contains(server.id.as_str())
            {
                let _ = consumed.insert(server.id.as_str());
                remaining -= 1;
            }
        }
        if remaining == 0 {
            continue;
        }

        if commitment.uuid.len() < UUID_PREFIX_LEN {
            warn!(
                commitment = %commitment.uuid,
                "commitment uuid too short for stable reservation names, skipping"
            );
            plan.skipped.push(SkippedCommitment {
                uuid: commitment.uuid.clone(),
                reason: "short-uuid",
            });
            continue;
        }
        let Some(project) = projects.get(commitment.project_id.as_str()) else {
            plan.skipped.push(SkippedCommitment {
                uuid: commitment.uuid.clone(),
                reason: "unknown-project",
            });
            continue;
        };

        let prefix = &commitment.uuid[..UUID_PREFIX_LEN];
        for index in 0..remaining {
            plan.reservations.push(ReservationObject {
                metadata: ObjectMeta::new(
                    format!("commitment-{prefix}-{index}"),
                    SchedulingDomain::Compute,
                ),
                spec: ReservationSpec {
                    creator: settings.creator.clone(),
                    scheduler: SchedulerHint {
                        cortex_nova: SchedulerHintNova {
                            project_id: commitment.project_id.clone(),
                            domain_id: project.domain_id.clone(),
                            flavor_name: flavor_name.to_owned(),
                            extra_specs: flavor.extra_specs.clone(),
                        },
                    },
                    requests: ResourceRequests::from_flavor_sizing(flavor.ram_mb, flavor.vcpus),
                },
            });
        }
    }

    plan
}

/// Periodically reconciles reservations against upstream commitments.
pub struct ReservationSyncer {
    store: Arc<dyn ControlPlaneStore>,
    commitments: Arc<dyn CommitmentSource>,
    inventory: Arc<dyn ComputeInventory>,
    settings: ReservationSettings,
    metrics: ReservationMetrics,
}

impl ReservationSyncer {
    /// Creates a syncer; reservations are always written to the compute
    /// domain, which is what commitments exist for.
    #[must_use]
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        commitments: Arc<dyn CommitmentSource>,
        inventory: Arc<dyn ComputeInventory>,
        settings: ReservationSettings,
        metrics: ReservationMetrics,
    ) -> Self {
        ReservationSyncer {
            store,
            commitments,
            inventory,
            settings,
            metrics,
        }
    }

    /// Runs sync ticks on the configured interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match self.sync_once().await {
                    Ok(stats) => {
                        self.metrics.observe_sync("success", Some(stats.desired));
                        info!(
                            desired = stats.desired,
                            applied = stats.applied,
                            deleted = stats.deleted,
                            skipped = stats.skipped,
                            "reservation sync tick complete"
                        );
                    }
                    Err(e) => {
                        self.metrics.observe_sync("error", None);
                        warn!(error = %e, "reservation sync tick failed, retrying next interval");
                    }
                },
            }
        }
        info!("reservation syncer stopped");
    }

    /// One full fetch → plan → reconcile pass.
    pub async fn sync_once(&self) -> Result<SyncStats, Error> {
        let commitments = self.commitments.list_commitments().await?;
        let projects = self.inventory.list_projects().await?;
        let flavors = self.inventory.list_flavors().await?;
        let servers = self.inventory.list_servers().await?;

        let plan = plan_reservations(
            &self.settings,
            &commitments,
            &projects,
            &flavors,
            &servers,
        );
        for skipped in &plan.skipped {
            self.metrics.observe_skip(skipped.reason);
        }

        let mut existing: BTreeMap<String, ReservationObject> = self
            .store
            .list_reservations(SchedulingDomain::Compute)
            .await?
            .into_iter()
            .filter(|r| r.spec.creator == self.settings.creator)
            .map(|r| (r.metadata.name.clone(), r))
            .collect();

        let desired = plan.reservations.len();
        let mut applied = 0;
        for reservation in plan.reservations {
            match existing.remove(&reservation.metadata.name) {
                Some(current) if current.spec == reservation.spec => {}
                _ => {
                    let _ = self.store.apply_reservation(reservation).await?;
                    applied += 1;
                }
            }
        }

        let mut deleted = 0;
        for orphan in existing.keys() {
            self.store
                .delete_reservation(SchedulingDomain::Compute, orphan)
                .await?;
            deleted += 1;
        }

        Ok(SyncStats {
            desired,
            applied,
            deleted,
            skipped: plan.skipped.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_store::MemoryStore;
    use cortex_telemetry::MetricsHandle;
    use cortex_upstream::testing::{StaticCommitments, StaticInventory};
    use std::collections::BTreeMap as Map;

    fn settings() -> ReservationSettings {
        ReservationSettings::default()
    }

    fn commitment(uuid: &str, amount: u64, flavor: &str, project: &str) -> Commitment {
        Commitment {
            uuid: uuid.to_owned(),
            service_type: "compute".to_owned(),
            resource_name: format!("instances_{flavor}"),
            amount,
            project_id: project.to_owned(),
        }
    }

    fn flavor(name: &str) -> Flavor {
        Flavor {
            name: name.to_owned(),
            vcpus: 8,
            ram_mb: 16384,
            extra_specs: Map::new(),
        }
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.to_owned(),
            domain_id: "d1".to_owned(),
        }
    }

    fn server(id: &str, project: &str, flavor: &str) -> Server {
        Server {
            id: id.to_owned(),
            project_id: project.to_owned(),
            flavor_name: flavor.to_owned(),
        }
    }

    #[test]
    fn commitment_without_servers_fans_out_one_reservation_per_unit() {
        let plan = plan_reservations(
            &settings(),
            &[commitment("4fa21c9e", 3, "m1.large", "p1")],
            &[project("p1")],
            &[flavor("m1.large")],
            &[],
        );
        let names: Vec<&str> = plan
            .reservations
            .iter()
            .map(|r| r.metadata.name.as_str())
            .collect();
        assert_eq!(
            names,
            ["commitment-4fa21-0", "commitment-4fa21-1", "commitment-4fa21-2"]
        );
        let spec = &plan.reservations[0].spec;
        assert_eq!(spec.requests.memory, "16384Mi");
        assert_eq!(spec.requests.cpu, "8");
        assert_eq!(spec.scheduler.cortex_nova.project_id, "p1");
        assert_eq!(spec.scheduler.cortex_nova.domain_id, "d1");
    }

    #[test]
    fn live_servers_consume_units_and_keep_low_indices() {
        let plan = plan_reservations(
            &settings(),
            &[commitment("4fa21c9e", 3, "m1.large", "p1")],
            &[project("p1")],
            &[flavor("m1.large")],
            &[server("s1", "p1", "m1.large")],
        );
        let names: Vec<&str> = plan
            .reservations
            .iter()
            .map(|r| r.metadata.name.as_str())
            .collect();
        assert_eq!(names, ["commitment-4fa21-0", "commitment-4fa21-1"]);
    }

    #[test]
    fn a_server_consumes_at_most_one_commitment_unit() {
        let plan = plan_reservations(
            &settings(),
            &[
                commitment("aaaaa111", 1, "m1.large", "p1"),
                commitment("bbbbb222", 1, "m1.large", "p1"),
            ],
            &[project("p1")],
            &[flavor("m1.large")],
            &[server("s1", "p1", "m1.large")],
        );
        // One server satisfies the first commitment (uuid order); the
        // second still needs its unit.
        let names: Vec<&str> = plan
            .reservations
            .iter()
            .map(|r| r.metadata.name.as_str())
            .collect();
        assert_eq!(names, ["commitment-bbbbb-0"]);
    }

    #[test]
    fn non_compute_and_non_instance_commitments_are_dropped() {
        let mut storage = commitment("ccccc333", 2, "m1.large", "p1");
        storage.service_type = "object-store".to_owned();
        let mut cores = commitment("ddddd444", 2, "m1.large", "p1");
        cores.resource_name = "cores".to_owned();

        let plan = plan_reservations(
            &settings(),
            &[storage, cores],
            &[project("p1")],
            &[flavor("m1.large")],
            &[],
        );
        assert!(plan.reservations.is_empty());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn unsupported_hypervisor_family_is_dropped() {
        let mut exotic = flavor("m1.large");
        let _ = exotic.extra_specs.insert(
            "capabilities:hypervisor_type".to_owned(),
            "ironic".to_owned(),
        );
        let plan = plan_reservations(
            &settings(),
            &[commitment("eeeee555", 2, "m1.large", "p1")],
            &[project("p1")],
            &[exotic],
            &[],
        );
        assert!(plan.reservations.is_empty());
    }

    #[test]
    fn allowed_hypervisor_family_is_kept() {
        let mut qemu = flavor("m1.large");
        let _ = qemu
            .extra_specs
            .insert("capabilities:hypervisor_type".to_owned(), "qemu".to_owned());
        let plan = plan_reservations(
            &settings(),
            &[commitment("fffff666", 1, "m1.large", "p1")],
            &[project("p1")],
            &[qemu],
            &[],
        );
        assert_eq!(plan.reservations.len(), 1);
        assert_eq!(
            plan.reservations[0]
                .spec
                .scheduler
                .cortex_nova
                .extra_specs
                .get("capabilities:hypervisor_type")
                .map(String::as_str),
            Some("qemu")
        );
    }

    #[test]
    fn short_uuid_skips_the_commitment_with_a_reason() {
        let plan = plan_reservations(
            &settings(),
            &[commitment("ab", 2, "m1.large", "p1")],
            &[project("p1")],
            &[flavor("m1.large")],
            &[],
        );
        assert!(plan.reservations.is_empty());
        assert_eq!(
            plan.skipped,
            [SkippedCommitment {
                uuid: "ab".to_owned(),
                reason: "short-uuid",
            }]
        );
    }

    #[test]
    fn unknown_flavor_and_project_are_skipped() {
        let plan = plan_reservations(
            &settings(),
            &[
                commitment("11111aaa", 1, "missing", "p1"),
                commitment("22222bbb", 1, "m1.large", "ghost"),
            ],
            &[project("p1")],
            &[flavor("m1.large")],
            &[],
        );
        assert!(plan.reservations.is_empty());
        let reasons: Vec<&str> = plan.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, ["unknown-flavor", "unknown-project"]);
    }

    #[test]
    fn fully_consumed_commitment_disappears() {
        let plan = plan_reservations(
            &settings(),
            &[commitment("33333ccc", 2, "m1.large", "p1")],
            &[project("p1")],
            &[flavor("m1.large")],
            &[
                server("s1", "p1", "m1.large"),
                server("s2", "p1", "m1.large"),
            ],
        );
        assert!(plan.reservations.is_empty());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn servers_of_other_projects_or_flavors_do_not_consume() {
        let plan = plan_reservations(
            &settings(),
            &[commitment("44444ddd", 2, "m1.large", "p1")],
            &[project("p1")],
            &[flavor("m1.large")],
            &[
                server("s1", "p2", "m1.large"),
                server("s2", "p1", "m1.small"),
            ],
        );
        assert_eq!(plan.reservations.len(), 2);
    }

    fn syncer(
        store: Arc<MemoryStore>,
        commitments: Vec<Commitment>,
        servers: Vec<Server>,
    ) -> ReservationSyncer {
        let metrics =
            ReservationMetrics::new(&MetricsHandle::new(&Map::new()).unwrap()).unwrap();
        ReservationSyncer::new(
            store as Arc<dyn ControlPlaneStore>,
            Arc::new(StaticCommitments { commitments }),
            Arc::new(StaticInventory {
                projects: vec![project("p1")],
                flavors: vec![flavor("m1.large")],
                servers,
            }),
            settings(),
            metrics,
        )
    }

    #[tokio::test]
    async fn reconcile_creates_then_shrinks_with_stable_names() {
        let store = Arc::new(MemoryStore::new());

        // First tick: three units, no servers.
        let stats = syncer(
            store.clone(),
            vec![commitment("4fa21c9e", 3, "m1.large", "p1")],
            vec![],
        )
        .sync_once()
        .await
        .unwrap();
        assert_eq!((stats.desired, stats.applied, stats.deleted), (3, 3, 0));

        // Second tick: one matching server appeared.
        let stats = syncer(
            store.clone(),
            vec![commitment("4fa21c9e", 3, "m1.large", "p1")],
            vec![server("s1", "p1", "m1.large")],
        )
        .sync_once()
        .await
        .unwrap();
        assert_eq!((stats.desired, stats.applied, stats.deleted), (2, 0, 1));

        let names: Vec<String> = store
            .list_reservations(SchedulingDomain::Compute)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, ["commitment-4fa21-0", "commitment-4fa21-1"]);
    }

    #[tokio::test]
    async fn foreign_reservations_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let foreign = ReservationObject {
            metadata: ObjectMeta::new("manual-hold-0", SchedulingDomain::Compute),
            spec: ReservationSpec {
                creator: "operator".to_owned(),
                scheduler: SchedulerHint {
                    cortex_nova: SchedulerHintNova {
                        project_id: "p9".to_owned(),
                        domain_id: "d9".to_owned(),
                        flavor_name: "m1.small".to_owned(),
                        extra_specs: Map::new(),
                    },
                },
                requests: ResourceRequests::from_flavor_sizing(2048, 2),
            },
        };
        let _ = store.apply_reservation(foreign).await.unwrap();

        let stats = syncer(store.clone(), vec![], vec![]).sync_once().await.unwrap();
        assert_eq!(stats.deleted, 0);
        assert_eq!(
            store
                .list_reservations(SchedulingDomain::Compute)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn changed_commitment_patches_the_reservation() {
        let store = Arc::new(MemoryStore::new());
        let _ = syncer(
            store.clone(),
            vec![commitment("4fa21c9e", 1, "m1.large", "p1")],
            vec![],
        )
        .sync_once()
        .await
        .unwrap();

        // Same unit name, different flavor sizing behind it.
        let metrics =
            ReservationMetrics::new(&MetricsHandle::new(&Map::new()).unwrap()).unwrap();
        let resized = ReservationSyncer::new(
            store.clone() as Arc<dyn ControlPlaneStore>,
            Arc::new(StaticCommitments {
                commitments: vec![commitment("4fa21c9e", 1, "m1.large", "p1")],
            }),
            Arc::new(StaticInventory {
                projects: vec![project("p1")],
                flavors: vec![Flavor {
                    name: "m1.large".to_owned(),
                    vcpus: 16,
                    ram_mb: 32768,
                    extra_specs: Map::new(),
                }],
                servers: vec![],
            }),
            settings(),
            metrics,
        );
        let stats = resized.sync_once().await.unwrap();
        assert_eq!(stats.applied, 1);

        let reservations = store
            .list_reservations(SchedulingDomain::Compute)
            .await
            .unwrap();
        assert_eq!(reservations[0].spec.requests.memory, "32768Mi");
        assert_eq!(reservations[0].spec.requests.cpu, "16");
    }
}
