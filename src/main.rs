use clap::Parser;
use grc_acl::acl::{versions, Engine};
use grc_acl::{settings, storage, web};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "grc-acl",
    version,
    about = "Access-control propagation service for GRC records"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database + schema migrations)
    let db = storage::init(&settings.database).await?;

    // bring the role registry up to the checked-in rule tree
    let engine = Engine::new(settings.propagation.clone(), settings.snapshots.clone());
    let applied = engine.apply_rule_history(&db, &versions::history()).await?;
    tracing::info!(applied, "Rule history up to date");

    // start web server
    web::serve(settings, db, engine).await?;
    Ok(())
}
