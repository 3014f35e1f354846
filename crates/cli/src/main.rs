use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use glk_apply::{KubeApplier, PrintApplier};
use glk_core::{Event, PodSpec, SpecApplier};
use glk_model::HostModel;
use glk_persist::{Snapshot, SqliteStore, Store};
use glk_reconcile::{DeferredQueue, Dispatcher, Host, Outcome, Reconciler, ReconcilerConfig};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "glkctl", version, about = "Drive the GitLab reconciler one lifecycle event at a time")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Host model file (relations, resources, leadership)
    #[arg(long = "model", env = "GLK_MODEL", global = true, default_value = "glk-model.yaml")]
    model: PathBuf,

    /// State database (default: ~/.glk/glk.db)
    #[arg(long = "db", env = "GLK_DB_PATH", global = true)]
    db: Option<String>,

    /// Namespace the workload is rendered into
    #[arg(long = "namespace", env = "GLK_NAMESPACE", global = true, default_value = "default")]
    namespace: String,

    /// Server-side apply against the current kube context instead of printing manifests
    #[arg(long = "cluster", action = ArgAction::SetTrue, global = true)]
    cluster: bool,

    /// Server dry-run when applying; state, history and model are left untouched
    #[arg(long = "dry-run", action = ArgAction::SetTrue, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver one lifecycle event, then redeliver deferred events that became ready
    Dispatch {
        /// Hook name, e.g. "start", "mysql-relation-changed", "website-relation-joined"
        hook: String,
        /// Relation instance for website-relation-joined
        #[arg(long = "relation-id")]
        relation_id: Option<u32>,
        /// Failure reason for image-failed
        #[arg(long = "reason")]
        reason: Option<String>,
    },
    /// Show reported status, redacted state and deferred events
    Status,
    /// List recently applied specs
    History {
        #[arg(long = "limit")]
        limit: Option<usize>,
    },
    /// Print the manifests the current state converges to
    Render,
}

fn init_tracing() {
    let env = std::env::var("GLK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries manifests and command output
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GLK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GLK_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteStore> {
    match db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn load_config(model: &HostModel) -> Result<ReconcilerConfig> {
    Ok(ReconcilerConfig::new(model.app())?.with_options(&model.options())?.with_env_overrides()?)
}

async fn applier(cli: &Cli) -> Result<Arc<dyn SpecApplier>> {
    if cli.cluster {
        let client = kube::Client::try_default().await.context("connecting to the current kube context")?;
        Ok(Arc::new(KubeApplier::new(client, cli.namespace.clone(), cli.dry_run)))
    } else {
        Ok(Arc::new(PrintApplier::new(cli.namespace.clone())))
    }
}

fn host(model: &Arc<HostModel>, applier: Arc<dyn SpecApplier>) -> Host {
    Host {
        relations: model.clone(),
        resources: model.clone(),
        leadership: model.clone(),
        applier,
        announcer: model.clone(),
    }
}

// History keeps no credentials.
fn redacted_spec(r: &Reconciler) -> Option<PodSpec> {
    let st = r.state().redacted();
    let cfg = r.config();
    Some(PodSpec::build(&cfg.app_name, cfg.http_port, st.image.as_ref()?, st.database.as_ref()?))
}

#[derive(Serialize)]
struct DispatchReport<'a> {
    event: &'a str,
    outcome: &'static str,
    status: &'a glk_core::Status,
    generation: u64,
    deferred: usize,
}

#[derive(Serialize)]
struct HistoryRow {
    generation: u64,
    applied_at: String,
    spec: String,
}

async fn dispatch(cli: &Cli, hook: &str, relation_id: Option<u32>, reason: Option<&str>) -> Result<()> {
    let model = Arc::new(HostModel::load(&cli.model)?);
    let config = load_config(&model)?;
    let app = config.app_name.clone();
    let event = Event::from_hook(hook, &config.database_endpoint, &config.website_endpoint, relation_id, reason)
        .ok_or_else(|| anyhow!("unknown hook {:?}", hook))?;

    let store = open_store(cli.db.as_deref())?;
    let snap = store.load_snapshot(&app)?.unwrap_or_default();
    let queue = DeferredQueue::from_entries(store.load_deferred(&app)?);
    let reconciler = Reconciler::restore(config, host(&model, applier(cli).await?), snap.state, snap.status);
    let mut dispatcher = Dispatcher::new(reconciler, queue);

    let before = dispatcher.reconciler().generation();
    info!(app = %app, event = event.name(), generation = before, "dispatching");
    let outcome = dispatcher.dispatch(event.clone()).await;
    let (reconciler, queue) = dispatcher.into_parts();

    if cli.dry_run {
        warn!("dry-run: state not saved");
    } else {
        if reconciler.generation() > before {
            if let Some(spec) = redacted_spec(&reconciler) {
                glk_apply::record_applied(&store, &app, reconciler.generation(), &spec)?;
            }
        }
        let snap = Snapshot { state: reconciler.state().clone(), status: reconciler.status().clone() };
        store.save(&app, &snap, &queue.entries())?;
        model.save()?;
    }

    let report = DispatchReport {
        event: event.name(),
        outcome: match outcome {
            Outcome::Handled => "handled",
            Outcome::Deferred => "deferred",
        },
        status: reconciler.status(),
        generation: reconciler.generation(),
        deferred: queue.len(),
    };
    match cli.output {
        Output::Human => println!(
            "{} {}: {} (generation {}, {} deferred)",
            report.event, report.outcome, report.status, report.generation, report.deferred
        ),
        Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn status(cli: &Cli) -> Result<()> {
    let model = HostModel::load(&cli.model)?;
    let app = model.app();
    let store = open_store(cli.db.as_deref())?;
    let snap = store.load_snapshot(&app)?.unwrap_or_default();
    let deferred = store.load_deferred(&app)?;
    match cli.output {
        Output::Human => {
            println!("{}: {}", app, snap.status);
            let st = snap.state.redacted();
            println!("started={} image={} database={} generation={}", st.is_started, st.image.is_some(), st.database.is_some(), st.generation);
            if let Some(db) = &st.database {
                println!("database {}@{}:{}/{}", db.username, db.host, db.port, db.database);
            }
            for d in &deferred {
                println!("deferred {} (since generation {})", d.event.name(), d.generation);
            }
        }
        Output::Json => {
            let v = serde_json::json!({
                "app": app,
                "status": snap.status,
                "state": snap.state.redacted(),
                "deferred": deferred,
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
    }
    Ok(())
}

fn history(cli: &Cli, limit: Option<usize>) -> Result<()> {
    let model = HostModel::load(&cli.model)?;
    let app = model.app();
    let store = open_store(cli.db.as_deref())?;
    let rows: Vec<HistoryRow> = store
        .get_last(&app, limit)?
        .into_iter()
        .map(|r| HistoryRow {
            generation: r.generation,
            applied_at: chrono::DateTime::from_timestamp(r.ts, 0).map(|d| d.to_rfc3339()).unwrap_or_default(),
            spec: glk_persist::maybe_decompress(&r.spec_zstd),
        })
        .collect();
    match cli.output {
        Output::Human => {
            if rows.is_empty() {
                println!("{}: nothing applied yet", app);
            }
            for r in &rows {
                println!("generation {} applied {}", r.generation, r.applied_at);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn render(cli: &Cli) -> Result<()> {
    let model = Arc::new(HostModel::load(&cli.model)?);
    let config = load_config(&model)?;
    let store = open_store(cli.db.as_deref())?;
    let snap = store.load_snapshot(&config.app_name)?.unwrap_or_default();
    let printer: Arc<dyn SpecApplier> = Arc::new(PrintApplier::new(cli.namespace.clone()));
    let reconciler = Reconciler::restore(config, host(&model, printer), snap.state, snap.status);
    let spec = reconciler.render().ok_or_else(|| anyhow!("nothing to render: image or database not known yet"))?;
    let manifests = glk_apply::render(&spec, &cli.namespace)?;
    match cli.output {
        Output::Human => print!("{}", manifests.to_yaml_redacted()?),
        Output::Json => {
            let m = manifests.redacted();
            let v = serde_json::json!([m.pull_secret, m.deployment]);
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Dispatch { hook, relation_id, reason } => dispatch(&cli, hook, *relation_id, reason.as_deref()).await,
        Commands::Status => status(&cli),
        Commands::History { limit } => history(&cli, *limit),
        Commands::Render => render(&cli),
    }
}
