//! `gatekeep run`: the orchestrator process.

use std::sync::Arc;

use gatekeep_api::BusHandle;
use gatekeep_core::{
    Clock, Collaborators, CsvTable, FramePipeline, HttpFrameSource, HttpIdentifier,
    HttpTelemetry, Identifier, NoopTelemetry, Orchestrator, SystemClock, TelemetrySink,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let mut runtime = gatekeep_config::to_orchestrator_config(&cfg)?;
    runtime.identities.extend(args.identities);
    if let Some(table) = args.table {
        runtime.table_path = table;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let telemetry: Arc<dyn TelemetrySink> = match HttpTelemetry::from_settings(&runtime.telemetry)? {
        Some(http) => Arc::new(http),
        None => {
            info!("telemetry endpoint not configured, reports disabled");
            Arc::new(NoopTelemetry)
        }
    };
    let identifier = HttpIdentifier::from_settings(&runtime.oracle)?.map(Arc::new);

    let bus_cancel = CancellationToken::new();
    let (bus, events) = BusHandle::spawn(
        runtime.bus.to_bus_config(runtime.topics.orchestrator_inbound()),
        runtime.bus.reconnect.clone(),
        bus_cancel,
    );
    info!(
        host = %runtime.bus.host,
        port = runtime.bus.port,
        table = %runtime.table_path.display(),
        "starting gate"
    );

    let pipeline = match identifier.clone() {
        Some(identifier) => {
            let frames = HttpFrameSource::from_settings(&runtime.camera, Arc::clone(&clock))?;
            Some(FramePipeline::new(
                Arc::new(frames),
                identifier,
                runtime.camera.clone(),
            ))
        }
        None => None,
    };

    let persistence = Arc::new(CsvTable::new(runtime.table_path.clone()));
    let orchestrator = Orchestrator::new(
        runtime,
        Collaborators {
            publisher: Arc::new(bus.clone()),
            telemetry,
            persistence,
            clock,
        },
    );

    orchestrator
        .load_catalog(identifier.as_deref().map(|i| i as &dyn Identifier))
        .await;
    orchestrator.start(events, pipeline).await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C, stopping");
    }
    info!("interrupt received, shutting down");

    orchestrator.shutdown().await;
    bus.shutdown();
    Ok(())
}
