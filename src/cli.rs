use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::AppConfig;
use crate::ddl::stmt::{AlterTableSpec, ColumnDef, CreateDatabaseStmt, CreateTableStmt, IndexDef, IndexPart};
use crate::domain::Domain;
use crate::errors::Result;
use crate::job_monitor::{JobMonitor, JobStatusInfo};
use crate::kv::MemStore;
use crate::logging::{LogConfig, parse_level};
use crate::model::{ColumnPosition, Datum, FieldType};

#[derive(Parser, Debug, Clone)]
#[command(name = "ddlctl")]
#[command(about = "Run and inspect online schema changes")]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Also write logs to this file, rotated daily
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a scripted schema change scenario against an in-memory store
    Demo {
        /// Rows to insert before adding the index
        #[arg(long, default_value = "100")]
        rows: i64,
        /// Number of finished jobs to print
        #[arg(long, default_value = "20")]
        history: usize,
    },
    /// Print the effective configuration
    ShowConfig {
        /// Output format (toml, json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Validate the configuration and exit
    CheckConfig,
}

impl Cli {
    /// Defaults, then the config file, then `DDL_` environment variables,
    /// then command line overrides.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.to_string_lossy().into_owned());
        }
        Ok(config)
    }

    pub fn init_logging(&self, config: &AppConfig) -> Result<Option<WorkerGuard>> {
        let mut log = LogConfig::from_config(&config.logging);
        if self.verbose {
            log = log.with_level(Level::DEBUG);
        } else {
            log = log.with_level(parse_level(&config.logging.level));
        }
        crate::logging::init_logging(log)
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Execute a parsed command line.
pub async fn run(cli: &Cli, config: AppConfig) -> Result<()> {
    match &cli.command {
        Command::Demo { rows, history } => {
            let statuses = run_demo(config, *rows, *history).await?;
            println!("{:<6} {:<28} {:<16} {:<14} {:<22} {}", "ID", "TYPE", "OBJECT", "STATE", "SCHEMA STATE", "ROWS");
            for s in statuses {
                println!(
                    "{:<6} {:<28} {:<16} {:<14} {:<22} {}",
                    s.job_id,
                    s.tp.to_string(),
                    format!("{}.{}", s.schema_name, s.table_name),
                    s.state.to_string(),
                    s.schema_state.to_string(),
                    s.row_count
                );
            }
        }
        Command::ShowConfig { format } => {
            let text = match format.as_str() {
                "json" => serde_json::to_string_pretty(&config)?,
                _ => toml::to_string_pretty(&config)?,
            };
            println!("{}", text);
        }
        Command::CheckConfig => {
            config.validate()?;
            println!("configuration is valid");
        }
    }
    Ok(())
}

/// Create a table, fill it, add a column and an index, then report every
/// job in the history newest first.
pub async fn run_demo(config: AppConfig, rows: i64, history: usize) -> Result<Vec<JobStatusInfo>> {
    let domain = Domain::open(MemStore::new_ref(), config).await?;
    let mut se = domain.new_session();

    se.create_database(&CreateDatabaseStmt::new("demo")).await?;
    se.use_db("demo")?;
    se.create_table(&CreateTableStmt::new(
        "orders",
        vec![
            ColumnDef::new("id", FieldType::bigint()).primary_key().auto_increment(),
            ColumnDef::new("customer", FieldType::varchar(64)).not_null(),
            ColumnDef::new("amount", FieldType::int()),
        ],
    ))
    .await?;
    let data: Vec<Vec<Datum>> = (0..rows)
        .map(|i| vec![Datum::String(format!("customer-{}", i % 10)), Datum::Int(i)])
        .collect();
    se.insert("orders", &["customer", "amount"], data)?;
    info!(rows, "demo rows inserted");

    se.alter_table(
        "orders",
        &[
            AlterTableSpec::AddColumns {
                columns: vec![ColumnDef::new("note", FieldType::varchar(255))],
                position: ColumnPosition::None,
                if_not_exists: false,
            },
            AlterTableSpec::AddIndex {
                index: IndexDef::new("idx_customer", vec![IndexPart::column("customer")]),
                if_not_exists: false,
            },
            AlterTableSpec::AutoIncrement {
                value: 10_000,
                force: false,
            },
        ],
    )
    .await?;

    let ids: Vec<i64> = se.show_jobs(history)?.iter().map(|j| j.id).collect();
    let monitor = JobMonitor::new(Duration::from_millis(10), Duration::from_secs(5));
    let statuses = monitor.watch(domain.ddl(), &ids).await?;
    domain.close().await;
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::model::JobState;

    #[test]
    fn test_args_parsing() {
        let cli = Cli::parse_from([
            "ddlctl",
            "--config",
            "ddl.toml",
            "--log-level",
            "warn",
            "demo",
            "--rows",
            "5",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("ddl.toml")));
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
        assert!(!cli.verbose);
        assert_eq!(cli.command, Command::Demo { rows: 5, history: 20 });
    }

    #[test]
    fn test_show_config_defaults() {
        let cli = Cli::parse_from(["ddlctl", "-v", "show-config"]);
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Command::ShowConfig {
                format: "toml".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_demo_finishes_every_job() {
        let config = ConfigBuilder::new().tick_ms(5).job_wait_timeout_ms(5_000).build();
        let statuses = run_demo(config, 20, 5).await.unwrap();
        assert_eq!(statuses.len(), 5);
        assert!(statuses.iter().all(|s| s.state == JobState::Done));
        assert_eq!(statuses[1].row_count, 20);
    }
}
