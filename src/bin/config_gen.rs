use clap::Parser;
use ddl_engine::ConfigBuilder;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "config-gen")]
#[command(about = "Generate ddl_engine configuration files")]
struct Args {
    /// Output file path
    #[arg(short, long, default_value = "ddl_config.toml")]
    output: PathBuf,

    /// Output format (json, toml)
    #[arg(short, long, default_value = "toml")]
    format: String,

    /// Number of DDL workers
    #[arg(long, default_value = "1")]
    workers: usize,

    /// DDL job lease in milliseconds
    #[arg(long, default_value = "1000")]
    lease_ms: u64,

    /// Auto-ID cache step
    #[arg(long, default_value = "30000")]
    autoid_step: i64,

    /// Backfill worker count
    #[arg(long, default_value = "4")]
    reorg_workers: i32,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = ConfigBuilder::new()
        .worker_count(args.workers)
        .lease_ms(args.lease_ms)
        .autoid_step(args.autoid_step)
        .reorg_worker_cnt(args.reorg_workers)
        .log_level(args.log_level)
        .build();
    config.validate()?;

    let mut output_path = args.output;
    if args.format == "toml" {
        output_path.set_extension("toml");
    } else if args.format == "json" {
        output_path.set_extension("json");
    }

    config.save_to_file(&output_path)?;

    println!("Configuration saved to: {}", output_path.display());
    println!("You can now use this configuration file with:");
    println!("  ddlctl --config {} check-config", output_path.display());
    println!("  ddlctl --config {} demo", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_engine::config::AppConfig;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "test-bin",
            "--output", "out.json",
            "--format", "json",
            "--workers", "2",
            "--lease-ms", "500",
            "--autoid-step", "5000",
            "--reorg-workers", "8",
            "--log-level", "debug",
        ]);

        assert_eq!(args.output.to_string_lossy(), "out.json");
        assert_eq!(args.format, "json");
        assert_eq!(args.workers, 2);
        assert_eq!(args.lease_ms, 500);
        assert_eq!(args.autoid_step, 5000);
        assert_eq!(args.reorg_workers, 8);
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["test-bin"]);
        assert_eq!(args.output.to_string_lossy(), "ddl_config.toml");
        assert_eq!(args.format, "toml");
        assert_eq!(args.workers, 1);
        assert_eq!(args.autoid_step, 30000);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_config_file_generation() {
        let dir = TempDir::new().unwrap();
        let output_path = dir.path().join("generated.json");

        let config = ConfigBuilder::new()
            .worker_count(3)
            .autoid_step(5000)
            .log_level("warn")
            .build();
        config.save_to_file(&output_path).unwrap();
        assert!(output_path.exists());

        let loaded = AppConfig::from_file(&output_path).unwrap();
        assert_eq!(loaded.ddl.worker_count, 3);
        assert_eq!(loaded.autoid.step, 5000);
        assert_eq!(loaded.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_toml_format_generation() {
        let dir = TempDir::new().unwrap();
        let output_path = dir.path().join("generated.toml");

        ConfigBuilder::new().reorg_worker_cnt(16).build().save_to_file(&output_path).unwrap();

        let content = fs::read_to_string(&output_path).unwrap();
        assert!(content.contains("[ddl]"));
        assert!(content.contains("[reorg]"));
        assert!(content.contains("[logging]"));
        assert!(content.contains("worker_cnt = 16"));
    }
}
