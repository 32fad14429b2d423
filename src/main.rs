use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;

use taskchain_lib::config::{AppConfig, ConfigOverrides};
use taskchain_lib::db::{
    self,
    health::{ChainHealthReport, ChainHealthStatus},
};
use taskchain_lib::{
    chain, migrate, repo, time, AppError, ChainSummary, NewTask, Task, TaskStatus, TaskUpdate,
};

/// Exit code for operations rejected by the chain engine (not found, invalid link).
const DOMAIN_ERROR_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "taskchain", about = "Maintenance task chains for equipment units", version)]
struct Cli {
    /// Database file; overrides TASKCHAIN_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory for the rolling log file; overrides TASKCHAIN_LOG_DIR.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema and health commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Equipment units.
    #[command(subcommand)]
    Unit(UnitCommand),
    /// Maintenance tasks.
    #[command(subcommand)]
    Task(TaskCommand),
    /// Task chains.
    #[command(subcommand)]
    Chain(ChainCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending migrations.
    Migrate,
    /// Run the integrity and chain checks and report their status.
    Status {
        /// Emit the raw JSON health report instead of the table view.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum UnitCommand {
    Add { name: String },
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    /// Create a task. The date defaults to today.
    Add {
        #[arg(long)]
        unit: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List a unit's tasks in chronological order.
    List {
        #[arg(long)]
        unit: i64,
        /// Include soft-deleted tasks.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Soft-delete a task, bridging its chain neighbours.
    Delete { task: i64 },
    /// Undelete a task and put it back into its chain.
    Restore { task: i64 },
    /// Remove a task row for good.
    Purge { task: i64 },
    /// Mark a task completed; the last task of a chain completes the whole chain.
    Complete {
        task: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
enum ChainCommand {
    /// Show the chain containing a task.
    Show {
        task: i64,
        #[arg(long)]
        json: bool,
    },
    /// Link parent → child.
    Link {
        parent: i64,
        child: i64,
        #[arg(long = "type")]
        relationship_type: Option<String>,
    },
    /// Take a task out of its chain without deleting it.
    Unlink { task: i64 },
    /// Mark one edge as removed by hand.
    UnlinkEdge { parent: i64, child: i64 },
}

fn main() {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        db_path: cli.db.clone(),
        log_dir: cli.log_dir.clone(),
    };
    let config = match AppConfig::resolve(overrides) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: [{}] {err}", err.code());
            process::exit(1);
        }
    };
    let guard = match taskchain_lib::logging::init(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start async runtime: {err}");
            process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli.command, &config)) {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<AppError>() {
            Some(app) if app.is_domain() => {
                eprintln!("Error: {app}");
                DOMAIN_ERROR_EXIT_CODE
            }
            _ => {
                eprintln!("Error: {err:#}");
                1
            }
        },
    };
    drop(guard);
    process::exit(code);
}

async fn open_pool(config: &AppConfig) -> Result<SqlitePool> {
    let pool = db::open_sqlite_pool(&config.db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(pool)
}

async fn run(command: Commands, config: &AppConfig) -> Result<i32> {
    let pool = open_pool(config).await?;
    let result = match command {
        Commands::Db(cmd) => handle_db_command(&pool, cmd).await,
        Commands::Unit(cmd) => handle_unit_command(&pool, cmd).await,
        Commands::Task(cmd) => handle_task_command(&pool, cmd).await,
        Commands::Chain(cmd) => handle_chain_command(&pool, cmd).await,
    };
    pool.close().await;
    result
}

async fn handle_db_command(pool: &SqlitePool, command: DbCommand) -> Result<i32> {
    match command {
        DbCommand::Migrate => {
            let versions = migrate::applied_versions(pool).await?;
            println!("Applied migrations: {}", versions.len());
            for version in versions {
                println!("  {version}");
            }
            Ok(0)
        }
        DbCommand::Status { json } => {
            let report = db::health::run_chain_health(pool)
                .await
                .context("run chain health checks")?;
            if json {
                print_json(&report)?;
            } else {
                print_report_table(&report);
            }
            Ok(match report.status {
                ChainHealthStatus::Ok => 0,
                ChainHealthStatus::Error => 1,
            })
        }
    }
}

async fn handle_unit_command(pool: &SqlitePool, command: UnitCommand) -> Result<i32> {
    match command {
        UnitCommand::Add { name } => {
            let unit = repo::create_unit(pool, name.trim()).await?;
            print_json(&unit)?;
            Ok(0)
        }
    }
}

async fn handle_task_command(pool: &SqlitePool, command: TaskCommand) -> Result<i32> {
    match command {
        TaskCommand::Add {
            unit,
            title,
            date,
            description,
        } => {
            let new_task = NewTask {
                unit_id: unit,
                title,
                description,
                created_date: date.unwrap_or_else(time::today),
                status: TaskStatus::Pending,
            };
            let task = repo::create_task(pool, &new_task).await?;
            print_json(&task)?;
        }
        TaskCommand::List { unit, all, json } => {
            let tasks = repo::list_tasks(pool, unit, all).await?;
            if json {
                print_json(&tasks)?;
            } else {
                print_task_table(&tasks);
            }
        }
        TaskCommand::Delete { task } => print_json(&chain::delete_task(pool, task).await?)?,
        TaskCommand::Restore { task } => print_json(&chain::restore_task(pool, task).await?)?,
        TaskCommand::Purge { task } => {
            print_json(&chain::permanent_delete_task(pool, task).await?)?
        }
        TaskCommand::Complete { task, date } => {
            let update = TaskUpdate {
                status: TaskStatus::Completed,
                completed_date: Some(date.unwrap_or_else(time::today)),
                title: None,
                description: None,
            };
            print_json(&chain::update_task(pool, task, &update).await?)?;
        }
    }
    Ok(0)
}

async fn handle_chain_command(pool: &SqlitePool, command: ChainCommand) -> Result<i32> {
    match command {
        ChainCommand::Show { task, json } => {
            let summary = chain::chain_summary(pool, task).await?;
            if json {
                print_json(&summary)?;
            } else {
                print_chain(task, &summary);
            }
        }
        ChainCommand::Link {
            parent,
            child,
            relationship_type,
        } => {
            let outcome =
                chain::add_task_relationship(pool, parent, child, relationship_type.as_deref())
                    .await?;
            print_json(&outcome)?;
        }
        ChainCommand::Unlink { task } => {
            print_json(&chain::remove_task_from_chain(pool, task).await?)?
        }
        ChainCommand::UnlinkEdge { parent, child } => {
            let touched = chain::mark_relationship_manually_removed(pool, parent, child).await?;
            println!("Marked {touched} edge row(s) as manually removed.");
        }
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

fn print_task_table(tasks: &[Task]) {
    println!(
        "{:>6}  {:<10}  {:<10}  {:<7}  Title",
        "ID", "Created", "Status", "Deleted"
    );
    for task in tasks {
        println!(
            "{:>6}  {:<10}  {:<10}  {:<7}  {}",
            task.id,
            task.created_date,
            task.status,
            if task.is_deleted { "yes" } else { "no" },
            task.title
        );
    }
}

fn print_chain(task_id: i64, summary: &ChainSummary) {
    println!(
        "Task {task_id}: position {} of {}",
        summary.position, summary.chain_length
    );
    for (idx, task) in summary.chain.iter().enumerate() {
        let marker = if task.id == task_id { "*" } else { " " };
        println!(
            "{marker} {:>3}. #{:<6} {}  {:<10}  {}",
            idx + 1,
            task.id,
            task.created_date,
            task.status,
            task.title
        );
    }
}

fn status_label(status: &ChainHealthStatus) -> &'static str {
    match status {
        ChainHealthStatus::Ok => "ok",
        ChainHealthStatus::Error => "error",
    }
}

fn print_report_table(report: &ChainHealthReport) {
    println!("Chain health report");
    println!("Status       : {}", status_label(&report.status));
    println!("Schema hash  : {}", report.schema_hash);
    println!("App version  : {}", report.app_version);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<20} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        let details = check
            .details
            .as_deref()
            .map(|value| value.replace('\n', " "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<7} {:>13}  {}",
            check.name, passed, check.duration_ms, details
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<20} {:>10}  Message", "Table", "RowID");
        for offender in &report.offenders {
            println!(
                "{:<20} {:>10}  {}",
                offender.table, offender.rowid, offender.message
            );
        }
    }
}
