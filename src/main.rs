// SPDX-License-Identifier: Apache-2.0

//! The scheduling engine service binary.
//!
//! Wires the configuration bundle, the stores, the plugin catalog, the
//! controllers, and the two HTTP surfaces together, then runs until a
//! termination signal cancels the root token. The process is
//! configuration-driven: the only command-line surface is the location of
//! the two config documents.

// Built-in plugins register themselves at link time.
use cortex_steps as _;

use clap::Parser;
use cortex_api::{AppState, MonitoringState};
use cortex_config::settings::{
    ControllerKind, DEFAULT_CONFIG_PATH, DEFAULT_SECRETS_PATH, ServiceSettings,
};
use cortex_config::SchedulingDomain;
use cortex_controller::{DecisionSender, DecisionWriter, ReadinessController, ReservationSyncer, decision_channel};
use cortex_engine::builder::PipelineBuilder;
use cortex_engine::{PipelineRegistry, PluginIndex, StepContext};
use cortex_store::{ControlPlaneStore, HandleTable, MemoryKnowledgeStore, MemoryStore};
use cortex_telemetry::{
    ApiMetrics, ControllerMetrics, DecisionMetrics, EngineMetrics, MetricsHandle,
    ReservationMetrics,
};
use cortex_upstream::{
    HttpCommitmentSource, HttpComputeInventory, IdentityGateway, PasswordIdentity, RequestPacer,
};
use miette::{IntoDiagnostic, WrapErr, miette};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External scheduling decision engine for OpenStack-style clouds.
#[derive(Parser, Debug)]
#[command(name = "cortex", version, about)]
struct Args {
    /// Path of the base configuration document.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path of the secrets overlay document.
    #[arg(long, default_value = DEFAULT_SECRETS_PATH)]
    secrets: PathBuf,
}

fn main() -> miette::Result<()> {
    let args = Args::parse();
    cortex_telemetry::init_tracing();

    let settings = ServiceSettings::load(&args.config, &args.secrets)?;
    info!(
        domain = %settings.scheduling_domain,
        controllers = ?settings.enabled_controllers,
        "configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
        .wrap_err("cannot build the tokio runtime")?;
    runtime.block_on(run(settings))
}

async fn run(settings: ServiceSettings) -> miette::Result<()> {
    let metrics = MetricsHandle::new(&settings.monitoring.labels)
        .map_err(|e| miette!("cannot create the metric registry: {e}"))?;
    let api_metrics = ApiMetrics::new(&metrics).map_err(|e| miette!("{e}"))?;
    let engine_metrics = EngineMetrics::new(&metrics).map_err(|e| miette!("{e}"))?;
    let controller_metrics = ControllerMetrics::new(&metrics).map_err(|e| miette!("{e}"))?;
    let decision_metrics = DecisionMetrics::new(&metrics).map_err(|e| miette!("{e}"))?;
    let reservation_metrics = ReservationMetrics::new(&metrics).map_err(|e| miette!("{e}"))?;

    // Process-local control plane, seeded from the bootstrap section. The
    // store sits behind its trait so a networked backend slots in without
    // touching the controllers.
    let control_plane: Arc<dyn ControlPlaneStore> = Arc::new(MemoryStore::new());
    let knowledge = Arc::new(MemoryKnowledgeStore::new());
    let handles = HandleTable::new();
    let registry = PipelineRegistry::new();
    let index = Arc::new(PluginIndex::from_registered());
    let cancel = CancellationToken::new();

    for object in settings.bootstrap.knowledge.clone() {
        let name = object.metadata.name.clone();
        let _ = control_plane
            .apply_knowledge(object)
            .await
            .map_err(|e| miette!("cannot bootstrap knowledge `{name}`: {e}"))?;
    }
    for object in settings.bootstrap.pipelines.clone() {
        let name = object.metadata.name.clone();
        let _ = control_plane
            .apply_pipeline(object)
            .await
            .map_err(|e| miette!("cannot bootstrap pipeline `{name}`: {e}"))?;
    }

    let mut controllers: JoinSet<()> = JoinSet::new();

    let decisions = if settings
        .enabled_controllers
        .contains(&ControllerKind::Decisions)
    {
        let (sender, writer): (DecisionSender, DecisionWriter) = decision_channel(
            settings.decisions.queue_capacity,
            control_plane.clone(),
            decision_metrics,
        );
        let token = cancel.child_token();
        let _ = controllers.spawn(writer.run(token));
        Some(sender)
    } else {
        None
    };

    if settings
        .enabled_controllers
        .contains(&ControllerKind::Scheduling)
    {
        let ctx = StepContext {
            domain: settings.scheduling_domain,
            knowledge: knowledge.clone(),
            handles: handles.clone(),
        };
        let controller = ReadinessController::new(
            settings.scheduling_domain,
            control_plane.clone(),
            PipelineBuilder::new(index.clone(), ctx),
            handles.clone(),
            registry.clone(),
            controller_metrics,
        );
        let _ = controllers.spawn(controller.run(cancel.child_token()));
    }

    if settings
        .enabled_controllers
        .contains(&ControllerKind::Reservations)
    {
        if settings.scheduling_domain == SchedulingDomain::Compute {
            let syncer = build_reservation_syncer(
                &settings,
                control_plane.clone(),
                reservation_metrics,
            )?;
            let _ = controllers.spawn(syncer.run(cancel.child_token()));
        } else {
            info!(
                domain = %settings.scheduling_domain,
                "reservation syncer only runs in the compute domain, skipping"
            );
        }
    }

    let app_state = AppState::new(
        registry.clone(),
        decisions,
        settings.api.clone(),
        api_metrics,
        engine_metrics,
        cancel.clone(),
    );
    let monitoring_state = MonitoringState::new(metrics, registry);

    let mut servers: JoinSet<Result<(), cortex_api::Error>> = JoinSet::new();
    {
        let bind_address = settings.api.bind_address.clone();
        let cancel = cancel.clone();
        let _ = servers
            .spawn(async move { cortex_api::run_api(&bind_address, app_state, cancel).await });
    }
    {
        let port = settings.monitoring.port;
        let cancel = cancel.clone();
        let _ = servers
            .spawn(async move { cortex_api::run_monitoring(port, monitoring_state, cancel).await });
    }

    let result: miette::Result<()> = tokio::select! {
        () = wait_for_shutdown_signal() => {
            info!("termination signal received, shutting down");
            Ok(())
        }
        joined = servers.join_next() => match joined {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(miette!("HTTP server failed: {e}")),
            Some(Err(e)) => Err(miette!("HTTP server task panicked: {e}")),
            None => Ok(()),
        },
    };

    cancel.cancel();
    while let Some(joined) = servers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "HTTP server ended with an error"),
            Err(e) => warn!(error = %e, "HTTP server task ended abnormally"),
        }
    }
    while let Some(joined) = controllers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "controller task ended abnormally");
        }
    }
    info!("shutdown complete");
    result
}

fn build_reservation_syncer(
    settings: &ServiceSettings,
    store: Arc<dyn ControlPlaneStore>,
    metrics: ReservationMetrics,
) -> miette::Result<ReservationSyncer> {
    let identity_endpoint = settings
        .endpoints
        .get("identity")
        .ok_or_else(|| miette!("reservations enabled but `endpoints.identity` is missing"))?;
    let secret_ref = settings
        .identity_secret_ref
        .as_deref()
        .ok_or_else(|| miette!("reservations enabled but `identity_secret_ref` is missing"))?;

    let mut http_builder = reqwest::Client::builder();
    if let Some(sso_ref) = settings.sso_secret_ref.as_deref() {
        let pem = std::fs::read(sso_ref)
            .map_err(|e| miette!("cannot read client certificate `{sso_ref}`: {e}"))?;
        let client_cert = reqwest::Identity::from_pem(&pem)
            .map_err(|e| miette!("invalid client certificate `{sso_ref}`: {e}"))?;
        http_builder = http_builder.identity(client_cert);
    }
    let http = http_builder
        .build()
        .map_err(|e| miette!("cannot build the upstream HTTP client: {e}"))?;
    let identity: Arc<dyn IdentityGateway> = Arc::new(
        PasswordIdentity::from_secret_ref(http.clone(), identity_endpoint.clone(), secret_ref)
            .map_err(|e| miette!("cannot initialize the identity gateway: {e}"))?,
    );
    let pacer = RequestPacer::new(settings.upstream.request_delay);

    Ok(ReservationSyncer::new(
        store,
        Arc::new(HttpCommitmentSource::new(
            http.clone(),
            identity.clone(),
            pacer.clone(),
            settings.endpoints.clone(),
        )),
        Arc::new(HttpComputeInventory::new(
            http,
            identity,
            pacer,
            settings.endpoints.clone(),
        )),
        settings.reservations.clone(),
        metrics,
    ))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
