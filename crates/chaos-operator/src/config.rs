//! Command line and validated controller configuration

use std::time::Duration;

use chaos_common::duration::parse_duration;
use chaos_common::Error;
use chaos_controller::{PipelineConfig, DEFAULT_CACHE_CAPACITY};
use chaos_selector::ScopeOptions;
use clap::{ArgAction, Parser, Subcommand};
use regex::Regex;

/// Chaos controller - drives chaos experiments between injected and recovered
#[derive(Parser, Debug)]
#[command(name = "chaos-controller", version, about, long_about = None)]
pub struct Cli {
    /// Print every CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// What to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the experiment controllers (default mode)
    Controller(ControllerArgs),
}

impl Cli {
    /// Controller flags, falling back to defaults and environment when no
    /// subcommand was given
    pub fn controller_args(self) -> Result<ControllerArgs, clap::Error> {
        match self.command {
            Some(Commands::Controller(args)) => Ok(args),
            None => ControllerArgs::try_parse_from(["controller"]),
        }
    }
}

/// Flags of the `controller` subcommand
#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Scan every namespace for targets
    #[arg(long, env = "CLUSTER_SCOPED", default_value_t = true, action = ArgAction::Set)]
    pub cluster_scoped: bool,

    /// Only namespace scanned when not cluster scoped
    #[arg(long, env = "TARGET_NAMESPACE", default_value = "default")]
    pub target_namespace: String,

    /// Require the inject annotation on a target's namespace
    #[arg(long, env = "ENABLE_FILTER_NAMESPACE", default_value_t = false, action = ArgAction::Set)]
    pub enable_filter_namespace: bool,

    /// Regex a target namespace must match
    #[arg(long, env = "ALLOWED_NAMESPACES")]
    pub allowed_namespaces: Option<String>,

    /// Regex a target namespace must not match
    #[arg(long, env = "IGNORED_NAMESPACES")]
    pub ignored_namespaces: Option<String>,

    /// Concurrent reconciles per experiment kind
    #[arg(long, env = "CHAOS_WORKERS", default_value_t = 1)]
    pub workers: u16,

    /// Deadline for one injector call (e.g. 60s, 2m)
    #[arg(long, env = "INJECTOR_TIMEOUT", default_value = "60s")]
    pub injector_timeout: String,

    /// Objects remembered by the version cache
    #[arg(long, env = "VERSION_CACHE_CAPACITY", default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: usize,

    /// Requeue delay after a reconcile asks for a retry
    #[arg(long, env = "RETRY_INTERVAL", default_value = "10s")]
    pub retry_interval: String,

    /// Grace period in seconds used by pod-kill when the experiment sets none
    #[arg(long, default_value_t = 0)]
    pub pod_kill_grace_period: u32,

    /// Only run controllers while holding the leader lease
    #[arg(long, env = "ENABLE_LEADER_ELECTION", default_value_t = false, action = ArgAction::Set)]
    pub leader_election: bool,

    /// Server-side apply every CRD at startup
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub install_crds: bool,
}

/// Validated settings for the controller process
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace limits for target selection
    pub scope: ScopeOptions,
    /// Concurrent reconciles per kind
    pub workers: u16,
    /// Pipeline tunables
    pub pipeline: PipelineConfig,
    /// Version cache capacity
    pub cache_capacity: usize,
    /// Fallback grace period for pod-kill
    pub pod_kill_grace_period: u32,
    /// Run behind a leader lease
    pub leader_election: bool,
    /// Install CRDs at startup
    pub install_crds: bool,
}

fn namespace_regex(flag: &str, pattern: Option<&str>) -> Result<Option<Regex>, Error> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(|e| Error::config(format!("--{flag}: {e}"))))
        .transpose()
}

fn positive_duration(flag: &str, raw: &str) -> Result<Duration, Error> {
    let duration = parse_duration(raw).map_err(|e| Error::config(format!("--{flag}: {e}")))?;
    if duration.is_zero() {
        return Err(Error::config(format!("--{flag} must be greater than zero")));
    }
    Ok(duration)
}

impl ControllerConfig {
    /// Validate command line flags
    pub fn from_args(args: &ControllerArgs) -> Result<Self, Error> {
        let scope = ScopeOptions {
            cluster_scoped: args.cluster_scoped,
            target_namespace: args.target_namespace.clone(),
            enable_filter_namespace: args.enable_filter_namespace,
            allowed_namespaces: namespace_regex(
                "allowed-namespaces",
                args.allowed_namespaces.as_deref(),
            )?,
            ignored_namespaces: namespace_regex(
                "ignored-namespaces",
                args.ignored_namespaces.as_deref(),
            )?,
        };

        if !scope.cluster_scoped {
            if scope.target_namespace.is_empty() {
                return Err(Error::config(
                    "--target-namespace is required when not cluster scoped",
                ));
            }
            if !scope.is_namespace_allowed(&scope.target_namespace) {
                return Err(Error::config(format!(
                    "target namespace {:?} is excluded by the allowed/ignored namespace filters",
                    scope.target_namespace
                )));
            }
        }

        if args.workers == 0 {
            return Err(Error::config("--workers must be at least 1"));
        }

        let pipeline = PipelineConfig {
            injector_timeout: positive_duration("injector-timeout", &args.injector_timeout)?,
            retry_interval: positive_duration("retry-interval", &args.retry_interval)?,
            ..PipelineConfig::default()
        };

        Ok(Self {
            scope,
            workers: args.workers,
            pipeline,
            cache_capacity: args.cache_capacity,
            pod_kill_grace_period: args.pod_kill_grace_period,
            leader_election: args.leader_election,
            install_crds: args.install_crds,
        })
    }
}
