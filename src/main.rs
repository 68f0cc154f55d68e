mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use env_logger::{Builder, Env, Target};
use log::{error, info, warn};
use meshprov::{
    bus_client::{BusAuth, HttpBusClient},
    config::{AppConfig, AuthMode},
    http_client::http_client,
    plan::{
        loader::load_plan,
        report::{PlanReport, PlanStatus, RollbackOutcome, StepOutcome},
    },
    services::{executor::Executor, rollback::RollbackRegistry},
    session_client::{Session, SessionClient},
};
use reqwest::Client;
use std::{fs, io::Write, path::Path, process::ExitCode};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("application error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    initialize();

    let config = AppConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Run { plan, vars, report } => {
            run_plan(&config, &plan, &vars, report.as_deref()).await
        }
        Command::Check { plan, vars } => {
            let plan = load_plan(&plan, &vars)?;
            info!("plan '{}' is valid ({} step(s))", plan.name(), plan.len());
            for (index, step) in plan.steps().iter().enumerate() {
                info!("  {index}: {}", step.name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Login => {
            let client = http_client(config.bus.request_timeout)?;
            let session = login(&config, client).await?;
            println!("{}", session.token);
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover => recover(&config).await,
    }
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!(
        "meshprov version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );
}

async fn connect_bus(config: &AppConfig) -> Result<HttpBusClient> {
    let client = http_client(config.bus.request_timeout)?;

    let auth = match config.auth.mode {
        AuthMode::None => BusAuth::None,
        AuthMode::Basic => BusAuth::Basic(config.auth.credentials.clone()),
        AuthMode::Session => BusAuth::Bearer(login(config, client.clone()).await?),
    };

    Ok(HttpBusClient::new(client, &config.bus.url, auth))
}

async fn login(config: &AppConfig, client: Client) -> Result<Session> {
    let endpoint = config.auth.session_url.as_deref().unwrap_or(&config.bus.url);
    let session = SessionClient::new(client)
        .authenticate(endpoint, &config.auth.credentials)
        .await
        .context("failed to authenticate")?;

    info!("authenticated against {endpoint}");
    Ok(session)
}

fn spawn_signal_handler(cancel: watch::Sender<bool>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("ctrl-c"),
            _ = sigterm.recv() => info!("SIGTERM"),
        }
        warn!("cancellation requested, stopping after the current step");
        let _ = cancel.send(true);
    });

    Ok(())
}

async fn run_plan(
    config: &AppConfig,
    plan_path: &Path,
    vars: &[(String, String)],
    report_path: Option<&Path>,
) -> Result<ExitCode> {
    let plan = load_plan(plan_path, vars)?;
    let bus = connect_bus(config).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    spawn_signal_handler(cancel_tx)?;

    let report = Executor::new(&bus, &config.executor_config())
        .with_cancellation(cancel_rx)
        .run(&plan)
        .await
        .context("run 'meshprov recover' to settle the interrupted run")?;

    log_summary(&report);

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        fs::write(path, json).context(format!("failed to write report: {path:?}"))?;
        info!("report written to {path:?}");
    }

    Ok(match report.status {
        PlanStatus::Succeeded => ExitCode::SUCCESS,
        PlanStatus::Failed { index, kind } => {
            error!("plan failed at step {index}: {kind}");
            ExitCode::from(EXIT_FAILED)
        }
        PlanStatus::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
    })
}

async fn recover(config: &AppConfig) -> Result<ExitCode> {
    if !RollbackRegistry::journal_exists(&config.rollback.journal) {
        info!("nothing to recover");
        return Ok(ExitCode::SUCCESS);
    }

    let bus = connect_bus(config).await?;
    let records = Executor::new(&bus, &config.executor_config())
        .recover()
        .await?
        .unwrap_or_default();

    let failed = records
        .iter()
        .filter(|r| r.outcome == RollbackOutcome::Failed)
        .count();
    info!("recovered {} compensation(s), {failed} failed", records.len());

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

fn log_summary(report: &PlanReport) {
    info!(
        "run {}: {} applied, {} skipped, {} failed",
        report.run_id,
        report.count(StepOutcome::Applied),
        report.count(StepOutcome::Skipped),
        report.count(StepOutcome::Failed)
    );

    for record in &report.rollback {
        match record.outcome {
            RollbackOutcome::Failed => warn!(
                "compensation '{}' for '{}' failed: {}",
                record.name,
                record.origin,
                record.message.as_deref().unwrap_or("unknown error")
            ),
            outcome => info!("compensation '{}' for '{}': {outcome:?}", record.name, record.origin),
        }
    }
}
