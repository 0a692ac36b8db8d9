//! mlclient - command-line access to a Mainzelliste endpoint.
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mainzelliste_client::{ApiVersion, EndpointConfig, MlClient, PatientRecord, QueryResult};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mlclient")]
#[command(version, about = "Load, query and edit patients in a Mainzelliste")]
struct Cli {
    /// Endpoint configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the Mainzelliste, overrides the configuration file
    #[arg(long)]
    base_url: Option<String>,

    /// API version sent with every request, overrides the configuration file
    #[arg(long)]
    api_version: Option<ApiVersion>,

    /// API key of the Mainzelliste
    #[arg(long, env = "MAINZELLISTE_API_KEY", hide_env_values = true)]
    api_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load fields of patients by pid
    Load {
        /// Patient identifier, may be repeated
        #[arg(long = "pid", required = true)]
        pids: Vec<String>,
        /// Field to load, may be repeated; defaults to the configured fields
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Find a patient by its fields, adding it when it is new
    Query {
        /// Patient fields as name=value
        #[arg(value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
        /// Add the patient even if the Mainzelliste reports possible matches
        #[arg(long)]
        sure: bool,
    },
    /// Overwrite fields of a patient
    Edit {
        pid: String,
        /// Patient fields as name=value
        #[arg(value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

fn endpoint(cli: &Cli) -> Result<EndpointConfig> {
    let mut config = match &cli.config {
        Some(path) => EndpointConfig::load(path)
            .with_context(|| format!("failed to load endpoint configuration from {}", path.display()))?,
        None => {
            let Some(base_url) = &cli.base_url else {
                bail!("either --config or --base-url is required");
            };
            EndpointConfig::new(base_url.clone(), ApiVersion::new(3, 0))
        }
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(api_version) = &cli.api_version {
        config.api_version = api_version.clone();
    }
    Ok(config)
}

fn record(fields: Vec<(String, String)>) -> PatientRecord {
    fields.into_iter().collect()
}

async fn run(cli: Cli) -> Result<serde_json::Value> {
    let config = endpoint(&cli)?;
    let client = MlClient::from_config(&config, cli.api_key).context("failed to set up client")?;
    info!(endpoint = %config.name, base_url = client.base_url(), "using endpoint");

    let output = match cli.command {
        Commands::Load { pids, fields } => {
            let fields = if fields.is_empty() { config.fields.clone() } else { fields };
            let data = client.load_patient_data(pids, fields).await?;
            serde_json::to_value(data)?
        }
        Commands::Query { fields, sure } => {
            let result = client.query_patient_data(record(fields), sure).await?;
            match &result {
                QueryResult::PossibleMatches { possible_match_pids } => {
                    let candidates = client
                        .load_patient_data(possible_match_pids.clone(), config.fields.clone())
                        .await
                        .context("failed to load possible matches")?;
                    json!({"result": result, "candidates": candidates})
                }
                QueryResult::Match { .. } => json!({"result": result}),
            }
        }
        Commands::Edit { pid, fields } => {
            client.edit_patient_data(pid.clone(), record(fields)).await?;
            json!({"pid": pid, "edited": true})
        }
    };

    client.wait_idle().await;
    Ok(output)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn field_needs_a_name() {
        assert_eq!(parse_field("vorname=Anna").unwrap(), ("vorname".to_string(), "Anna".to_string()));
        assert_eq!(parse_field("plz=").unwrap(), ("plz".to_string(), String::new()));
        assert_eq!(parse_field("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert!(parse_field("=Anna").is_err());
        assert!(parse_field("vorname").is_err());
    }

    #[test]
    fn parses_query() {
        let cli = parse(&[
            "mlclient",
            "--base-url",
            "http://localhost:8080",
            "--api-key",
            "k",
            "query",
            "vorname=Anna",
            "nachname=Schmidt",
            "--sure",
        ]);
        match cli.command {
            Commands::Query { fields, sure } => {
                assert!(sure);
                assert_eq!(record(fields)["nachname"], "Schmidt");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_load_with_repeated_flags() {
        let cli = parse(&[
            "mlclient", "--base-url", "http://h", "--api-key", "k", "load", "--pid", "A", "--pid", "B", "--field",
            "vorname",
        ]);
        match cli.command {
            Commands::Load { pids, fields } => {
                assert_eq!(pids, ["A", "B"]);
                assert_eq!(fields, ["vorname"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn load_requires_a_pid() {
        assert!(Cli::try_parse_from(["mlclient", "--api-key", "k", "load"]).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "mlclient",
            "--base-url",
            "http://localhost:8080/ml/",
            "--api-version",
            "2.2",
            "--api-key",
            "k",
            "edit",
            "P1",
            "vorname=Anna",
        ]);
        let config = endpoint(&cli).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/ml/");
        assert_eq!(config.api_version.to_string(), "2.2");
    }

    #[test]
    fn endpoint_needs_config_or_base_url() {
        let cli = parse(&["mlclient", "--api-key", "k", "edit", "P1", "vorname=Anna"]);
        assert!(endpoint(&cli).is_err());
    }
}
