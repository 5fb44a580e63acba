use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use sparkctl_controller::{Controller, ControllerConfig};
use sparkctl_kubehub::{AppStoreClient, KubeAppClient};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sparkctl", version, about = "SparkApplication controller")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch (default: all namespaces)
    #[arg(long = "ns", global = true, env = "SPARKCTL_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller until Ctrl-C
    Run {
        /// Full resync period in seconds (0 disables)
        #[arg(long = "resync-secs", env = "SPARKCTL_RESYNC_SECS", default_value_t = 0)]
        resync_secs: u64,
        /// Write status.appId through the status subresource
        #[arg(long = "status-subresource", env = "SPARKCTL_STATUS_SUBRESOURCE", action = ArgAction::SetTrue)]
        status_subresource: bool,
    },
    /// List SparkApplications with their app ids
    Ls,
    /// Print the app id the controller assigns to a resource
    AppId {
        name: String,
        namespace: String,
        uid: String,
    },
}

fn init_tracing() {
    let env = std::env::var("SPARKCTL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPARKCTL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SPARKCTL_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { resync_secs, status_subresource } => {
            init_metrics();
            let mut config = ControllerConfig::default()
                .resync_period(Duration::from_secs(resync_secs))
                .status_subresource(status_subresource);
            config.namespace = cli.namespace.clone();
            let client = KubeAppClient::new(sparkctl_kubehub::get_kube_client().await?)
                .with_status_subresource(config.status_subresource);
            let controller = Controller::new(Arc::new(client), config);

            let token = CancellationToken::new();
            tokio::spawn({
                let token = token.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        info!("Ctrl-C received; shutting down controller");
                    }
                    token.cancel();
                }
            });
            match controller.run(token).await {
                Ok(reason) => info!(reason = ?reason, "controller stopped"),
                Err(e) => {
                    error!(error = %e, "controller failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Ls => {
            let ns = cli.namespace.as_deref();
            info!(ns = ?ns, "ls invoked");
            let client = KubeAppClient::new(sparkctl_kubehub::get_kube_client().await?);
            let mut apps = client.list(ns).await?;
            apps.sort_by(|a, b| (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name)));
            match cli.output {
                Output::Human => {
                    println!("NAMESPACE   NAME                 APP-ID                    AGE");
                    for app in apps.iter() {
                        let ns_col = app.metadata.namespace.clone().unwrap_or_else(|| "-".to_string());
                        let name = app.metadata.name.as_deref().unwrap_or("");
                        let age = app.metadata.creation_timestamp.as_ref().map(|t| render_age(t.0)).unwrap_or_else(|| "-".to_string());
                        println!("{:<11} {:<20} {:<25} {}", ns_col, name, app.app_id().unwrap_or("<none>"), age);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Row<'a> { namespace: &'a str, name: &'a str, uid: &'a str, app_id: Option<&'a str> }
                    let rows: Vec<_> = apps
                        .iter()
                        .map(|a| Row {
                            namespace: a.metadata.namespace.as_deref().unwrap_or(""),
                            name: a.metadata.name.as_deref().unwrap_or(""),
                            uid: a.metadata.uid.as_deref().unwrap_or(""),
                            app_id: a.app_id(),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
        Commands::AppId { name, namespace, uid } => {
            let id = sparkctl_core::compute_app_id(&name, &namespace, &uid);
            match cli.output {
                Output::Human => println!("{}", id),
                Output::Json => println!("{}", serde_json::json!({ "appId": id })),
            }
        }
    }

    Ok(())
}

fn render_age(created: chrono::DateTime<chrono::Utc>) -> String {
    let mut secs = (chrono::Utc::now() - created).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["sparkctl", "--ns", "spark", "run", "--resync-secs", "30"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("spark"));
        match cli.command {
            Commands::Run { resync_secs, status_subresource } => {
                assert_eq!(resync_secs, 30);
                assert!(!status_subresource);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_app_id() {
        let cli = Cli::try_parse_from(["sparkctl", "-o", "json", "app-id", "job1", "default", "abc-123"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::AppId { .. }));
    }

    #[test]
    fn age_rendering() {
        let now = chrono::Utc::now();
        assert_eq!(render_age(now - chrono::Duration::seconds(5)), "5s");
        assert_eq!(render_age(now - chrono::Duration::seconds(3 * 3600 + 120)), "3h2m");
        assert_eq!(render_age(now - chrono::Duration::days(2)), "2d0h");
        assert_eq!(render_age(now + chrono::Duration::seconds(30)), "0s");
    }
}
