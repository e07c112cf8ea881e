//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate, health), and their associated argument
//! structs. Every flag has an environment variable equivalent for
//! container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Host- and path-based ingress edge proxy",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        switchyard run -m ingresses.yaml         Serve routes from a manifest\n  \
        switchyard run --kubernetes              Watch Ingress objects in-cluster\n  \
        switchyard validate ingresses.yaml       Check a manifest without serving"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the edge proxy
    Run(Box<RunArgs>),

    /// Validate a manifest file and print the derived routes
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        switchyard run -m ingresses.yaml --resolver manifest   Local routing table\n  \
        switchyard run -m ingresses.yaml -p 8080 --pretty      Local dev mode\n  \
        switchyard run --kubernetes -n shop                    One namespace in-cluster")]
pub struct RunArgs {
    // -- Event Sources --
    /// Manifest file with ingress resources (.yaml, .json)
    #[arg(short, long, env = "MANIFEST_FILE", help_heading = "Event Sources")]
    pub manifest: Option<PathBuf>,

    /// Watch Ingress objects through the Kubernetes API
    #[cfg(feature = "kubernetes")]
    #[arg(
        long,
        env = "K8S_MODE",
        conflicts_with = "manifest",
        help_heading = "Event Sources"
    )]
    pub kubernetes: bool,

    /// Namespace to watch (all namespaces when unset)
    #[cfg(feature = "kubernetes")]
    #[arg(short, long, env = "WATCH_NAMESPACE", help_heading = "Event Sources")]
    pub namespace: Option<String>,

    /// Kubeconfig file (in-cluster config or `$KUBECONFIG` when unset)
    #[cfg(feature = "kubernetes")]
    #[arg(long, help_heading = "Event Sources")]
    pub kubeconfig: Option<PathBuf>,

    // -- Listeners --
    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Proxy listen port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Admin listen port (`/healthz`, `/routes`)
    #[arg(long, env = "ADMIN_PORT", default_value_t = 10254)]
    pub admin_port: u16,

    // -- Backends --
    /// How backend services are turned into addresses
    #[arg(
        long,
        env = "BACKEND_RESOLVER",
        default_value = "dns",
        help_heading = "Backends"
    )]
    pub resolver: ResolverKind,

    /// Cluster DNS domain used by the dns resolver
    #[arg(
        long,
        env = "CLUSTER_DOMAIN",
        default_value = "cluster.local",
        help_heading = "Backends"
    )]
    pub cluster_domain: String,

    /// Add X-Forwarded-For/-Host/-Proto and X-Real-IP to upstream requests
    #[arg(long, env = "FORWARDED_HEADERS", help_heading = "Backends")]
    pub forwarded_headers: bool,

    // -- Status --
    /// Hostname published in ingress status
    #[arg(long, env = "PUBLISH_HOSTNAME", help_heading = "Status")]
    pub publish_hostname: Option<String>,

    /// IP address published in ingress status
    #[arg(long, env = "PUBLISH_IP", help_heading = "Status")]
    pub publish_ip: Option<String>,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Tuning --
    /// Upstream response timeout in milliseconds
    #[arg(
        long,
        env = "REQUEST_TIMEOUT_MS",
        default_value_t = 5000,
        help_heading = "Tuning"
    )]
    pub timeout: u64,

    /// Backend resolution timeout in milliseconds
    #[arg(
        long,
        env = "RESOLVE_TIMEOUT_MS",
        default_value_t = 2000,
        help_heading = "Tuning"
    )]
    pub resolve_timeout: u64,

    /// Reject request bodies larger than this many bytes with 413 (unlimited when unset)
    #[arg(long, env = "MAX_BODY_SIZE", help_heading = "Tuning")]
    pub max_body: Option<usize>,

    /// Manifest poll interval in seconds
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 5,
        help_heading = "Tuning"
    )]
    pub poll_interval: u64,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Manifest file to validate
    #[arg(default_value = "ingresses.yaml")]
    pub manifest: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// Admin URL of the running instance
    #[arg(default_value = "http://localhost:10254")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ResolverKind {
    /// Cluster DNS (`svc.namespace.svc.<cluster-domain>`)
    Dns,
    /// The `services` section of the manifest file
    Manifest,
    /// Service objects from the Kubernetes API
    #[cfg(feature = "kubernetes")]
    Kube,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["switchyard", "run", "-m", "routes.yaml"]).unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.manifest.as_deref(), Some(std::path::Path::new("routes.yaml")));
        assert_eq!(args.admin_port, 10254);
        assert_eq!(args.resolver, ResolverKind::Dns);
        assert_eq!(args.cluster_domain, "cluster.local");
        assert!(!args.forwarded_headers);
        assert_eq!(args.max_body, None);
    }

    #[cfg(feature = "kubernetes")]
    #[test]
    fn kubeconfig_path_is_optional() {
        let cli = Cli::try_parse_from([
            "switchyard",
            "run",
            "--kubernetes",
            "--kubeconfig",
            "/etc/switchyard/kubeconfig",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert!(args.kubernetes);
        assert_eq!(
            args.kubeconfig.as_deref(),
            Some(std::path::Path::new("/etc/switchyard/kubeconfig"))
        );
    }

    #[test]
    fn json_and_pretty_conflict() {
        assert!(Cli::try_parse_from(["switchyard", "run", "--json", "--pretty"]).is_err());
    }
}
