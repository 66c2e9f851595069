//! campus-dashboards: run a department dashboard against a recorded fixture
//!
//! `replay` loads admins, records and notifications into the in-memory backend, signs
//! in through the regular login flow, lets the dashboard render its initial snapshot and
//! prints the derived view and notification list as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info};

use campus_dashboards::backend::memory::MemoryBackend;
use campus_dashboards::backend::{DocumentStore, IdentityProvider};
use campus_dashboards::dashboard::{Dashboard, RecordingSurface};
use campus_dashboards::session::{Department, LoginFlow, LoginForm};
use campus_dashboards::views::{self, ViewSpec};
use campus_dashboards::{logging, Config, Record};

#[derive(Parser)]
#[command(name = "campus-dashboards")]
#[command(about = "Live department dashboards for campus incident and health reports")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CAMPUS_DASHBOARDS_CONFIG", default_value = "campus-dashboards.toml")]
    config: PathBuf,

    /// Department dashboard (overrides config file)
    #[arg(short, long, env = "CAMPUS_DASHBOARDS_DEPARTMENT")]
    department: Option<Department>,

    /// Log filter directive (overrides config file; RUST_LOG wins over both)
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON fixture through login and the dashboard's first render
    Replay {
        /// Fixture file
        fixture: PathBuf,
    },
    /// List departments and the stats their dashboards compute
    Departments,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    admins: Vec<FixtureAdmin>,
    #[serde(default)]
    records: Vec<FixtureRecord>,
    #[serde(default)]
    notifications: Vec<FixtureRecord>,
    login: FixtureLogin,
}

#[derive(Debug, Deserialize)]
struct FixtureAdmin {
    uid: String,
    email: String,
    password: String,
    #[serde(default)]
    departments: Vec<Department>,
}

#[derive(Debug, Deserialize)]
struct FixtureRecord {
    id: String,
    #[serde(flatten)]
    fields: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct FixtureLogin {
    email: String,
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(department) = cli.department {
        config.dashboard.department = department;
    }
    if let Some(filter) = cli.log_filter {
        config.logging.filter = filter;
    }
    logging::init(&config.logging);

    match cli.command {
        Command::Departments => {
            for department in Department::REDIRECT_PRIORITY {
                match views::for_department(department) {
                    Some(view) => {
                        let stats: Vec<&str> = view.stats().iter().map(|s| s.key).collect();
                        println!(
                            "{:<10} {:<20} {}",
                            department,
                            view.collection(),
                            stats.join(", ")
                        );
                    }
                    None => println!("{:<10} (no dashboard view)", department),
                }
            }
            Ok(())
        }
        Command::Replay { fixture } => replay(config, fixture).await,
    }
}

async fn replay(config: Config, path: PathBuf) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&content)
        .with_context(|| format!("parsing fixture {}", path.display()))?;

    let department = config.dashboard.department;
    let Some(view) = views::from_config(&config.dashboard) else {
        bail!("no dashboard view for department {}", department);
    };
    info!(%department, collection = view.collection(), "Replaying fixture");

    let backend = Arc::new(MemoryBackend::new());
    for admin in &fixture.admins {
        backend.add_user(&admin.uid, &admin.email, &admin.password);
        backend.insert(
            &config.login.authorization_collection,
            Record::from_json(
                admin.uid.clone(),
                json!({ "email": admin.email, "departments": admin.departments }),
            ),
        );
    }
    for record in fixture.records {
        backend.insert(view.collection(), Record::new(record.id, record.fields));
    }
    for notification in fixture.notifications {
        backend.insert(
            &config.notifications.collection,
            Record::new(notification.id, notification.fields),
        );
    }

    let store: Arc<dyn DocumentStore> = backend.clone();
    let identity: Arc<dyn IdentityProvider> = backend.clone();

    let login = LoginFlow::new(store.clone(), identity.clone(), config.login.clone());
    let mut form = LoginForm::new(fixture.login.email, fixture.login.password);
    let session = match login.login(&mut form, department).await {
        Ok(session) => session,
        Err(e) => bail!("{}", e.user_message()),
    };

    let surface = RecordingSurface::new();
    let mut dashboard = Dashboard::new(
        view,
        store,
        identity.clone(),
        Box::new(surface.clone()),
        config,
    );
    dashboard.handle_auth_state(identity.current()).await?;

    // Drain the initial snapshots
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), dashboard.step()).await
    {
        debug!(?event, "Processed live event");
    }

    let output = json!({
        "session": session,
        "view": dashboard.view(),
        "notifications": dashboard.notifications().list(),
        "unread": dashboard.notifications().unread_count(),
        "badge": dashboard.notifications().badge(),
        "toasts": surface.toasts(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    dashboard.teardown();
    Ok(())
}
