//! `lnnet <node-count> [linear|star|ring|mesh]`
//!
//! Brings a regtest payment-channel network up, verifies it, or reports its
//! health.  The result is printed as JSON on stdout and the exit code names
//! the failure class.

mod args;

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use bitcoind_client::{bitcoind_client_from_url, BackendService};
use clap::Parser;
use cln_client::{ClnClient, NodeService};
use lnnet_core::config::discover_nodes;
use lnnet_core::error::{exit_code, Error};
use lnnet_core::health::HealthStatus;
use lnnet_core::model::Node;
use lnnet_core::verify::Violation;
use lnnet_core::{Orchestrator, Stage, StageError};
use lnnet_util::config::LOG_NAME;
use lnnet_util::observability::init_tracing_subscriber;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::args::{Args, Mode, Settings};

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    stage: Option<Stage>,
    exit_code: i32,
    error: String,
    violations: &'a [Violation],
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => error!("cannot serialize result: {}", e),
    }
}

fn report_failure(
    stage: Option<Stage>,
    code: i32,
    error: &dyn std::fmt::Display,
    violations: &[Violation],
) -> i32 {
    error!("{}", error);
    print_json(&Failure {
        ok: false,
        stage,
        exit_code: code,
        error: error.to_string(),
        violations,
    });
    code
}

fn stage_failure(e: &StageError) -> i32 {
    let violations: &[Violation] = match &e.source {
        Error::VerificationFailed(v) => v.as_slice(),
        _ => &[],
    };
    report_failure(Some(e.stage), e.exit_code(), e, violations)
}

fn health_exit_code(status: HealthStatus) -> i32 {
    match status {
        HealthStatus::Ok => exit_code::SUCCESS,
        HealthStatus::Degraded => exit_code::NODE_NOT_READY,
        HealthStatus::Down => exit_code::BACKEND_UNAVAILABLE,
    }
}

fn node_service(timeout: Duration) -> impl Fn(&Node) -> Arc<dyn NodeService> {
    move |node: &Node| -> Arc<dyn NodeService> {
        Arc::new(ClnClient::new(node.endpoint.rpc_socket.clone(), timeout))
    }
}

async fn run(settings: Settings) -> i32 {
    let client = bitcoind_client_from_url(
        settings.rpc_url.clone(),
        settings.cookie.as_deref(),
        settings.rpc_timeout,
    )
    .await;
    let backend: Arc<dyn BackendService> = match client {
        Ok(client) => Arc::new(client),
        Err(e) => {
            let e = format!("bitcoind client for {}: {}", settings.config.backend_endpoint, e);
            let code = exit_code::BACKEND_UNAVAILABLE;
            return report_failure(Some(Stage::BackendReady), code, &e, &[]);
        }
    };

    let connect = node_service(settings.rpc_timeout);
    let config = settings.config;
    let mut orchestrator = if settings.discover_nodes {
        let ids = match discover_nodes(&config.lightning_base) {
            Ok(ids) => ids,
            Err(e) => {
                let e = format!("listing {}: {}", config.lightning_base.display(), e);
                return report_failure(None, exit_code::USAGE, &e, &[]);
            }
        };
        info!("found {} node directories under {}", ids.len(), config.lightning_base.display());
        Orchestrator::for_nodes(config, backend, &ids, connect)
    } else {
        Orchestrator::new(config, backend, connect)
    };

    let (shutdown_trigger, shutdown_signal) = triggered::trigger();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_trigger.trigger();
    }) {
        warn!("cannot install the interrupt handler: {}", e);
    }
    orchestrator = orchestrator.with_cancellation(shutdown_signal);

    match settings.mode {
        Mode::Health => {
            let health = orchestrator.health().await;
            print_json(&health);
            health_exit_code(health.status)
        }
        Mode::VerifyOnly => match orchestrator.verify_only().await {
            Ok(report) => {
                print_json(&report);
                exit_code::SUCCESS
            }
            Err(e) => stage_failure(&e),
        },
        Mode::BringUp => match orchestrator.run().await {
            Ok(report) => {
                print_json(&report);
                exit_code::SUCCESS
            }
            Err(e) => stage_failure(&e),
        },
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = match args.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("lnnet: {:#}", e);
            exit(exit_code::USAGE);
        }
    };
    let code = {
        let logging = init_tracing_subscriber(&settings.runtime_dir, LOG_NAME, settings.log_level);
        let _guard = match logging {
            Ok(guard) => guard,
            Err(e) => {
                let dir = settings.runtime_dir.display();
                eprintln!("lnnet: cannot set up logging in {}: {}", dir, e);
                exit(exit_code::USAGE);
            }
        };
        info!("lnnet {} starting, {:?} mode", env!("CARGO_PKG_VERSION"), settings.mode);
        run(settings).await
    };
    exit(code);
}
