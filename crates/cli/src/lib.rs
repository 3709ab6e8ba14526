pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mpa",
    about = "Multi-party authorization operator CLI",
    long_about = "Prepare the authorization database, seed and inspect the managed configuration, \
                  and check runtime readiness.",
    after_help = "Examples:\n  mpa migrate --seed settings.json\n  mpa show ServiceSettings SiteURL\n  mpa doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending migrations and optionally seed the first configuration snapshot")]
    Migrate {
        #[arg(long, value_name = "FILE", help = "JSON or TOML configuration tree to seed")]
        seed: Option<PathBuf>,
    },
    #[command(about = "List every configuration leaf with its kind")]
    Paths,
    #[command(about = "Print the current value of a configuration leaf")]
    Show {
        #[arg(required = true, value_name = "FIELD", help = "Field names from the root")]
        fields: Vec<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, approval policy, DB connectivity and stored configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate { seed } => commands::migrate::run(seed),
        Command::Paths => commands::paths::run(),
        Command::Show { fields } => commands::show::run(&fields),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn show_collects_every_field_argument() {
        let cli =
            Cli::try_parse_from(["mpa", "show", "ServiceSettings", "SiteURL"]).expect("parse");
        let Command::Show { fields } = cli.command else {
            panic!("expected show command");
        };
        assert_eq!(fields, vec!["ServiceSettings", "SiteURL"]);
    }

    #[test]
    fn show_requires_a_field() {
        assert!(Cli::try_parse_from(["mpa", "show"]).is_err());
    }

    #[test]
    fn migrate_seed_is_optional() {
        let cli = Cli::try_parse_from(["mpa", "migrate"]).expect("parse");
        assert!(matches!(cli.command, Command::Migrate { seed: None }));
    }
}
