mod cli;
mod logging;

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dispatch_console::client::{HttpExecutionClient, ListQuery, SharedClient};
use dispatch_console::config::{load_settings, Settings};
use dispatch_console::execution::{
    ExecutionRequest, ExecutionSnapshot, ExecutionStatus, LifecycleCoordinator, ListRefresh,
    Subscription,
};
use dispatch_console::plan::{load_plan, run_plan};
use dispatch_console::render;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Args, Command, ListArgs, RunArgs};
use crate::logging::init_tracing;

const DETAIL_KEY: &str = "detail";
const LIST_KEY: &str = "list";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref(), args.log_to_stderr)?;

    let settings = match args.base_url.as_deref() {
        Some(base_url) if !args.config.exists() => Settings::with_base_url(base_url)?,
        Some(base_url) => Settings {
            base_url: base_url.to_string(),
            ..load_settings(&args.config)?
        },
        None => load_settings(&args.config)?,
    };
    info!(
        config = %args.config.display(),
        base_url = %settings.base_url,
        "console starting"
    );
    let client: SharedClient = Arc::new(
        HttpExecutionClient::new(&settings.base_url, settings.request_timeout)
            .context("failed to build execution client")?,
    );
    let coordinator = LifecycleCoordinator::new(client, settings.polling.clone())
        .context("invalid polling settings")?;
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));
    let output = Output { json: args.json };

    let code = match args.command {
        Command::Run(run) => {
            let request = build_request(run)?;
            let subscription = coordinator.track(DETAIL_KEY, request).await;
            render::exit_code(follow(subscription, &shutdown, &output).await)
        }
        Command::Watch { id } => {
            let subscription = coordinator.watch(DETAIL_KEY, &id).await;
            render::exit_code(follow(subscription, &shutdown, &output).await)
        }
        Command::List(list) => list_executions(&coordinator, &settings, list, &shutdown, &output).await?,
        Command::Plan { path } => {
            let plan = load_plan(&path)?;
            let report = run_plan(&coordinator, &plan, &shutdown, |item| {
                output.snapshot(Some(item.step), &item.snapshot);
            })
            .await;
            for line in render::plan_lines(&report) {
                println!("{line}");
            }
            u8::from(!report.succeeded())
        }
    };
    coordinator.stop_all().await;
    info!("console shutting down");
    Ok(ExitCode::from(code))
}

fn build_request(run: RunArgs) -> anyhow::Result<ExecutionRequest> {
    let mut request = ExecutionRequest::new(run.tool);
    if let Some(raw) = run.args.as_deref() {
        let arguments: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
        if !arguments.is_object() {
            anyhow::bail!("--args must be a JSON object");
        }
        request = request.with_arguments(arguments);
    }
    if let Some(target) = run.target {
        request = request.with_target(target);
    }
    Ok(request)
}

/// Prints snapshots until the execution ends or Ctrl-C. Returns the last
/// status seen.
async fn follow(
    mut subscription: Subscription<ExecutionSnapshot>,
    shutdown: &CancellationToken,
    output: &Output,
) -> Option<ExecutionStatus> {
    let mut last = None;
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                subscription.cancel();
                break;
            }
            next = subscription.next() => next,
        };
        let Some(snapshot) = next else { break };
        output.snapshot(None, &snapshot);
        last = Some(snapshot.status);
    }
    last
}

async fn list_executions(
    coordinator: &LifecycleCoordinator,
    settings: &Settings,
    list: ListArgs,
    shutdown: &CancellationToken,
    output: &Output,
) -> anyhow::Result<u8> {
    let watch = list.watch || list.refresh.is_some();
    let interval = list.refresh.unwrap_or(settings.list.refresh_interval);
    let mut filters = BTreeMap::new();
    for (key, value) in [("status", list.status), ("toolName", list.tool), ("target", list.target)] {
        if let Some(value) = value {
            filters.insert(key.to_string(), value);
        }
    }
    let query = ListQuery {
        filters,
        page: list.page,
        size: list.size.unwrap_or(settings.list.page_size),
        sort: list.sort.or_else(|| settings.list.sort.clone()),
    };
    let mut refresh = coordinator
        .auto_refresh(LIST_KEY, query, interval)
        .await
        .context("failed to start list refresh")?;

    let mut code = 0;
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = refresh.next() => next,
        };
        let Some(update) = next else { break };
        code = u8::from(matches!(update, ListRefresh::Failed { .. }));
        output.refresh(&update);
        if !watch {
            break;
        }
    }
    refresh.cancel();
    Ok(if watch { 0 } else { code })
}

struct Output {
    json: bool,
}

impl Output {
    fn snapshot(&self, step: Option<usize>, snapshot: &ExecutionSnapshot) {
        if self.json {
            #[derive(Serialize)]
            struct Line<'a> {
                #[serde(skip_serializing_if = "Option::is_none")]
                step: Option<usize>,
                #[serde(flatten)]
                snapshot: &'a ExecutionSnapshot,
            }
            print_json(&Line { step, snapshot });
            return;
        }
        let line = render::snapshot_line(snapshot);
        match step {
            Some(step) => println!("[step {}] {line}", step + 1),
            None => println!("{line}"),
        }
        if snapshot.is_terminal() {
            if let Some(block) = render::output_block(snapshot) {
                print!("{block}");
            }
        }
    }

    fn refresh(&self, update: &ListRefresh) {
        match (self.json, update) {
            (true, ListRefresh::Loaded(page)) => print_json(page),
            (true, ListRefresh::Failed { code, reason }) => {
                print_json(&serde_json::json!({ "failed": code, "reason": reason }))
            }
            (false, update) => {
                for line in render::refresh_lines(update) {
                    println!("{line}");
                }
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(error = %err, "failed to encode output line"),
    }
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}
