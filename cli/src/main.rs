mod backend;
mod commands;
mod util;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::config::ConfigCommands;
use commands::entry::EntryArgs;
use commands::export::ExportCommands;
use commands::log::LogCommands;
use commands::parameter::ParameterCommands;

#[derive(Parser)]
#[command(name = "qclog", version, about = "qclog CLI: quality-check data entry, catalog management and CSV export")]
struct Cli {
    /// API base URL
    #[arg(long, env = "QCLOG_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Plant time zone, used when --date is omitted
    #[arg(long, env = "QCLOG_PLANT_TZ", default_value = "Asia/Kolkata")]
    plant_tz: chrono_tz::Tz,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Parameter catalog management
    Parameter {
        #[command(subcommand)]
        command: ParameterCommands,
    },
    /// Line/shift configurations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Enter measurements for one date/shift/line and submit them as a batch
    Entry(EntryArgs),
    /// Logged measurements
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
    /// Export logged measurements as CSV
    Export {
        #[command(subcommand)]
        command: ExportCommands,
    },
}

fn today_in(tz: chrono_tz::Tz) -> NaiveDate {
    chrono::Utc::now().with_timezone(&tz).date_naive()
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("QCLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let today = today_in(cli.plant_tz);

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Parameter { command } => commands::parameter::run(&cli.api_url, command).await,
        Commands::Config { command } => commands::config::run(&cli.api_url, command).await,
        Commands::Entry(args) => commands::entry::run(&cli.api_url, today, args).await,
        Commands::Log { command } => commands::log::run(&cli.api_url, today, command).await,
        Commands::Export { command } => commands::export::run(&cli.api_url, command).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn plant_time_zone_parses() {
        let cli = Cli::try_parse_from(["qclog", "--plant-tz", "Europe/Berlin", "health"])
            .expect("valid arguments");
        assert_eq!(cli.plant_tz, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn config_add_takes_line_and_shift() {
        let cli = Cli::try_parse_from(["qclog", "config", "add", "--line", "L3", "--shift", "C"])
            .expect("valid arguments");
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Add(_)
            }
        ));
        assert!(Cli::try_parse_from(["qclog", "config", "remove", "--line", "L3"]).is_err());
    }

    #[test]
    fn entry_collects_repeated_assignments() {
        let cli = Cli::try_parse_from([
            "qclog",
            "entry",
            "--shift",
            "A",
            "--line",
            "L1",
            "--set",
            "Voltage Test=250",
            "--set",
            "Visual Inspection=NOT OK",
            "--remark",
            "Voltage Test=tap high",
        ])
        .expect("valid arguments");
        assert!(matches!(cli.command, Commands::Entry(_)));
    }
}
