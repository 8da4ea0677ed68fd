//! kubegate - operator CLI
//!
//! Inspects local configuration and talks to a running kubegate HTTP
//! surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kubegate::registry::PredefinedResources;
use kubegate::remote::{ORG_HEADER, USER_HEADER};
use kubegate::server::CLUSTER_SCOPE;
use kubegate::{Config, ErrorBody};

/// Kubegate operator CLI
#[derive(Parser)]
#[command(name = "kubegate")]
#[command(version)]
#[command(about = "Multi-cluster resource gateway CLI")]
struct Args {
    /// Gateway address
    #[arg(
        short,
        long,
        env = "KUBEGATE_ADDRESS",
        default_value = "http://127.0.0.1:9742"
    )]
    address: String,

    /// Platform user id sent as User-ID
    #[arg(long, env = "KUBEGATE_USER_ID", default_value = "")]
    user: String,

    /// Platform org id sent as Org-ID
    #[arg(long, env = "KUBEGATE_ORG_ID", default_value = "")]
    org: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and print the resolved configuration
    Config {
        /// Config file (default: ~/.kubegate/config.toml, then /etc/kubegate/config.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Print the predefined RBAC payload for a system namespace
    Predefined {
        #[arg(default_value = "kubegate-system")]
        namespace: String,
    },

    /// List ready and bootstrapping clusters
    Clusters,

    /// List resources
    List {
        cluster: String,
        kind: String,
        #[arg(short, long)]
        namespace: Option<String>,
        #[arg(short = 'l', long)]
        label_selector: Option<String>,
    },

    /// Get one resource
    Get {
        cluster: String,
        kind: String,
        name: String,
        /// Omit for cluster-scoped objects
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Mark a node unschedulable
    Cordon { cluster: String, node: String },

    /// Mark a node schedulable
    Uncordon { cluster: String, node: String },

    /// Cordon a node and evict its pods
    Drain { cluster: String, node: String },
}

struct Client {
    http: reqwest::Client,
    base: String,
    user: String,
    org: String,
}

impl Client {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base.trim_end_matches('/')))
            .header(USER_HEADER, &self.user)
            .header(ORG_HEADER, &self.org)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, Box<dyn std::error::Error>> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => Err(format!("{} ({}): {}", err.code, status, err.message).into()),
            Err(_) => Err(format!("HTTP {status}: {body}").into()),
        }
    }
}

fn pretty(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| body.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Args {
        address,
        user,
        org,
        command,
    } = Args::parse();
    let client = Client {
        http: reqwest::Client::new(),
        base: address,
        user,
        org,
    };

    let req = match command {
        // Local commands; no gateway needed
        Command::Config { path } => {
            let config = Config::load(path.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Command::Predefined { namespace } => {
            let payload = PredefinedResources::for_namespace(&namespace).to_json();
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }
        Command::Clusters => client.request(reqwest::Method::GET, "/clusters"),
        Command::List {
            cluster,
            kind,
            namespace,
            label_selector,
        } => {
            let path = match namespace {
                Some(ns) => format!("/resources/{cluster}/{kind}/{ns}"),
                None => format!("/resources/{cluster}/{kind}"),
            };
            let mut req = client.request(reqwest::Method::GET, &path);
            if let Some(selector) = label_selector {
                req = req.query(&[("labelSelector", selector)]);
            }
            req
        }
        Command::Get {
            cluster,
            kind,
            name,
            namespace,
        } => {
            let ns = namespace.unwrap_or_else(|| CLUSTER_SCOPE.to_string());
            client.request(
                reqwest::Method::GET,
                &format!("/resources/{cluster}/{kind}/{ns}/{name}"),
            )
        }
        Command::Cordon { cluster, node } => {
            client.request(reqwest::Method::PUT, &format!("/nodes/{cluster}/{node}/cordon"))
        }
        Command::Uncordon { cluster, node } => client.request(
            reqwest::Method::PUT,
            &format!("/nodes/{cluster}/{node}/uncordon"),
        ),
        Command::Drain { cluster, node } => {
            client.request(reqwest::Method::PUT, &format!("/nodes/{cluster}/{node}/drain"))
        }
    };

    let body = client.send(req).await?;
    if !body.is_empty() {
        println!("{}", pretty(&body));
    }
    Ok(())
}
