use clap::{Parser, Subcommand};
use db_lifecycle::{DbConfig, DbOptions, Lifecycle, LifecycleError};
use tracing::error;

mod schema;
mod telemetry;

#[derive(Parser)]
#[command(name = "dblifecycle")]
#[command(about = "Database connection lifecycle and schema sync tool")]
struct Args {
    #[command(flatten)]
    db: DbOptions,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, run the schema hook and synchronize, then shut down
    Sync,
    /// Print the resolved connection target and pool bounds without connecting
    Status,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    telemetry::init_tracing(args.log_json);

    let config = match args.db.into_config() {
        Ok(config) => config,
        Err(e) => fatal(&e),
    };

    match args.command {
        Command::Status => print_status(&config),
        Command::Sync => {
            if let Err(e) = run_sync(config).await {
                fatal(&e);
            }
        }
    }
}

fn fatal(e: &LifecycleError) -> ! {
    error!(fatal = true, error = %e, "db_lifecycle=startup_failed");
    eprintln!("❌ {e}");
    std::process::exit(1);
}

fn print_status(config: &DbConfig) {
    let params = config.connection_params();
    println!("target:       {}", params.display_url());
    println!("dialect:      {}", config.dialect);
    println!("process mode: {:?}", config.process_mode);
    println!("schema drop:  {}", config.schema_drop);
    println!(
        "pool:         min={} max={} idle={}ms acquire={}ms evict={}ms",
        config.pool.min,
        config.pool.max,
        config.pool.idle_timeout.as_millis(),
        config.pool.acquire_timeout.as_millis(),
        config.pool.eviction_interval.as_millis()
    );
    println!(
        "query retry:  max={} match={:?}",
        config.retry.max_attempts, config.retry.matchers
    );
    println!(
        "session:      app_name={} busy_timeout={}ms",
        config.session.app_name,
        config.session.busy_timeout.as_millis()
    );
}

async fn run_sync(config: DbConfig) -> Result<(), LifecycleError> {
    let mut lifecycle = Lifecycle::builder(config)
        .register(schema::OperatorSchema)
        .build()?;

    let Some(ctx) = lifecycle.start().await? else {
        println!("process mode owns no database connection; nothing to do");
        return Ok(());
    };

    for (name, object) in ctx.dm.iter() {
        println!("{:<6} {}", object.kind(), name);
    }
    if let Some(report) = lifecycle.last_sync() {
        println!(
            "✅ synchronized: dropped={} ensured={}",
            report.dropped.len(),
            report.ensured.len()
        );
    }
    let status = ctx.db.status();
    println!(
        "pool: size={} idle={} in_use={} max={}",
        status.size, status.idle, status.in_use, status.max
    );

    drop(ctx);
    lifecycle.stop().await;
    Ok(())
}
