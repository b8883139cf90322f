//! Knuto Kubernetes Operator
//!
//! Mirrors tenant Strimzi KafkaUsers and KafkaTopics into the shared Strimzi
//! namespace and hands generated credentials back to the tenants.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knuto_operator::config::{parse_bootstrap_mapping, OperatorConfig};
use knuto_operator::context::OperatorContext;
use knuto_operator::controller::run_mirror_controller;
use knuto_operator::secret_controller::run_secret_controller;
use knuto_operator::secrets::CredentialType;
use knuto_operator::store::KubeStore;
use knuto_operator::topic_controller::TopicMirror;
use knuto_operator::user_controller::UserMirror;
use kube::Client;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Knuto Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "knuto-operator")]
#[command(about = "Kubernetes operator mirroring tenant Strimzi resources into a shared Kafka namespace")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// YAML configuration file, command line flags are applied on top
    #[arg(long, env = "KNUTO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Namespace watched by Strimzi, where mirrored objects are written
    #[arg(long, env = "KNUTO_DESTINATION_NAMESPACE", global = true)]
    destination_namespace: Option<String>,

    /// Allow Read ACLs on resources of any namespace
    #[arg(long, env = "KNUTO_ENABLE_CROSS_NAMESPACE_READ", global = true)]
    enable_cross_namespace_read: bool,

    /// Allow Write ACLs on resources of any namespace
    #[arg(long, env = "KNUTO_ENABLE_CROSS_NAMESPACE_WRITE", global = true)]
    enable_cross_namespace_write: bool,

    /// Non-namespaced topics every tenant may read
    #[arg(long, env = "KNUTO_READ_ALLOWED_NON_NAMESPACED_TOPICS", value_delimiter = ',', global = true)]
    read_allowed_non_namespaced_topics: Vec<String>,

    /// Non-namespaced topics every tenant may write
    #[arg(long, env = "KNUTO_WRITE_ALLOWED_NON_NAMESPACED_TOPICS", value_delimiter = ',', global = true)]
    write_allowed_non_namespaced_topics: Vec<String>,

    /// Propagate KafkaTopic deletion to the mirrored topic
    #[arg(long, env = "KNUTO_ENABLE_TOPIC_DELETION", global = true)]
    enable_topic_deletion: bool,

    /// Bootstrap server per secret type, e.g. scram-sha-512=my-cluster-kafka-bootstrap:9092
    #[arg(
        long,
        env = "KNUTO_SECRET_TYPE_TO_BOOTSTRAP_SERVER",
        value_parser = parse_bootstrap_mapping,
        value_delimiter = ';',
        global = true
    )]
    secret_type_to_bootstrap_server: Vec<(CredentialType, String)>,

    /// Tenant namespace recognized as owner of generated credentials (repeatable)
    #[arg(long, env = "KNUTO_SOURCE_NAMESPACES", value_delimiter = ',', global = true)]
    source_namespace: Vec<String>,

    /// API version of the kafka.strimzi.io resources
    #[arg(long, env = "KNUTO_STRIMZI_API_VERSION", global = true)]
    strimzi_api_version: Option<String>,

    /// Namespace to watch for tenant objects (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "", global = true)]
    namespace: String,

    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080", global = true)]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081", global = true)]
    health_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    log_json: bool,
}

/// Controllers to run
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Mirror KafkaUsers and KafkaTopics into the destination namespace
    UserTopic,
    /// Mirror generated credential secrets back to the tenants
    Secrets,
    /// Run every controller
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level, args.log_json);

    let config = build_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?args.command,
        namespace = if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        },
        "Starting Knuto Kubernetes Operator"
    );
    info!(config = ?config, "Effective configuration");

    install_metrics_exporter(args.metrics_addr)?;

    let health = TcpListener::bind(args.health_addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", args.health_addr))?;
    info!(address = %args.health_addr, "Serving liveness checks");
    tokio::spawn(async move {
        if let Err(e) = serve_health(health).await {
            tracing::error!(error = %e, "Health endpoint stopped");
        }
    });

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let operator = OperatorContext::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(config),
    );

    // Parse namespace (empty string means cluster-wide)
    let namespace = if args.namespace.is_empty() {
        None
    } else {
        Some(args.namespace.clone())
    };

    let users = run_mirror_controller(client.clone(), operator.clone(), UserMirror, namespace.clone());
    let topics = run_mirror_controller(client.clone(), operator.clone(), TopicMirror, namespace);
    let secrets = run_secret_controller(client, operator);

    match args.command {
        Command::UserTopic => {
            tokio::try_join!(users, topics).context("Controller failed")?;
        }
        Command::Secrets => {
            secrets.await.context("Controller failed")?;
        }
        Command::All => {
            tokio::try_join!(users, topics, secrets).context("Controller failed")?;
        }
    }

    Ok(())
}

/// Assemble the operator configuration from the optional file and the flags
fn build_config(args: &Args) -> Result<OperatorConfig> {
    let mut config = match &args.config {
        Some(path) => OperatorConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OperatorConfig::default(),
    };

    let policy = &mut config.policy;
    if let Some(namespace) = &args.destination_namespace {
        policy.destination_namespace = namespace.clone();
    }
    policy.cross_namespace_read_enabled |= args.enable_cross_namespace_read;
    policy.cross_namespace_write_enabled |= args.enable_cross_namespace_write;
    policy.topic_deletion_enabled |= args.enable_topic_deletion;
    policy
        .read_allowlist
        .extend(args.read_allowed_non_namespaced_topics.iter().cloned());
    policy
        .write_allowlist
        .extend(args.write_allowed_non_namespaced_topics.iter().cloned());

    config
        .bootstrap_servers
        .extend(args.secret_type_to_bootstrap_server.iter().cloned());
    config
        .source_namespaces
        .extend(args.source_namespace.iter().cloned());
    if let Some(version) = &args.strimzi_api_version {
        config.strimzi_api_version = version.clone();
    }

    config.validated().context("Invalid configuration")
}

/// Plain text logs by default, one JSON object per line with `--log-json`
fn init_logging(level: Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    match json {
        true => builder.json().init(),
        false => builder.init(),
    }
}

/// Expose the `knuto_*` counters and histograms on `addr`.
///
/// The exporter runs its HTTP listener on the current runtime.
fn install_metrics_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to expose metrics on {}", addr))?;
    info!(address = %addr, "Serving Prometheus metrics");
    Ok(())
}

const HEALTH_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";

/// Answer every request on `listener` with `200 OK`
async fn serve_health(listener: TcpListener) -> Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await.context("Health endpoint accept")?;
        tokio::spawn(async move {
            let mut request = [0u8; 1024];
            if socket.read(&mut request).await.is_err() {
                return;
            }
            if let Err(e) = socket.write_all(HEALTH_RESPONSE).await {
                tracing::debug!(%peer, error = %e, "Health check client went away");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn test_flags_layer_on_defaults() {
        let args = Args::try_parse_from([
            "knuto-operator",
            "--destination-namespace",
            "kafka",
            "--enable-cross-namespace-read",
            "--write-allowed-non-namespaced-topics",
            "shared-a,shared-b",
            "--secret-type-to-bootstrap-server",
            "scram-sha-512=my-cluster-kafka-bootstrap:9092",
            "--source-namespace",
            "team-a",
            "all",
        ])
        .unwrap();

        assert_eq!(args.command, Command::All);
        let config = build_config(&args).unwrap();
        assert_eq!(config.policy.destination_namespace, "kafka");
        assert!(config.policy.cross_namespace_read_enabled);
        assert!(!config.policy.cross_namespace_write_enabled);
        assert_eq!(config.policy.write_allowlist.len(), 2);
        assert_eq!(
            config.bootstrap_server(CredentialType::ScramSha512),
            Some("my-cluster-kafka-bootstrap:9092")
        );
        assert!(config.is_source_namespace("team-a"));
    }

    #[test]
    fn test_rejects_unknown_secret_type() {
        let result = Args::try_parse_from([
            "knuto-operator",
            "--secret-type-to-bootstrap-server",
            "tls=broker:9093",
            "secrets",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_destination_namespace() {
        let args = Args::try_parse_from(["knuto-operator", "user-topic"]).unwrap();
        assert!(build_config(&args).is_err());
    }

    #[tokio::test]
    async fn test_health_endpoint_answers_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_health(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 200 OK"));
        assert!(response.ends_with(b"OK"));
    }
}
