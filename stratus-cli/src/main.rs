use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use log::LevelFilter;
use serde::Deserialize;

use stratus_core::effect::Effect;
use stratus_core::interpreter::ResolvedExport;
use stratus_core::{
    ClusterBuilder, ClusterNetwork, ClusterSpec, Interpreter, InterpreterConfig, NetworkBuilder,
    NetworkSpec, Plan, Provider, Resource, Value,
};
use stratus_state::{LocalBackend, OutputState, StateBackend, StateFile, StateProvider};

const DEFAULT_CONFIG_FILE: &str = "stratus.json";
const DEFAULT_REGION: &str = "us-east-1";
const SECRET_MASK: &str = "(sensitive)";

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Compose and apply AWS networks and EKS clusters", long_about = None)]
struct Cli {
    /// Logging verbosity [off|error|warn|info|debug|trace]; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stack configuration without touching any state
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Show the resources the stack would create
    Plan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Create every resource of the stack and record the outputs
    Apply {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Print secret outputs instead of masking them
        #[arg(long)]
        show_secrets: bool,

        /// Upper bound on resources created at the same time
        #[arg(long)]
        max_concurrency: Option<NonZeroUsize>,
    },
    /// Print the outputs recorded by the last apply
    Outputs {
        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,

        #[arg(long)]
        show_secrets: bool,
    },
    /// Inspect or repair the state file
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List recorded resources
    List {
        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Remove a lock left behind by an interrupted apply
    Unlock {
        lock_id: String,

        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
}

/// Contents of the stack configuration file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackConfig {
    name: String,
    #[serde(default = "default_region")]
    region: String,
    network: NetworkSpec,
    #[serde(default)]
    cluster: Option<ClusterSpec>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl StackConfig {
    fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    fn parse(content: &str) -> Result<Self, String> {
        let mut config: StackConfig =
            serde_json::from_str(content).map_err(|e| format!("Invalid configuration: {}", e))?;
        if config.name.is_empty() {
            return Err("Invalid configuration: 'name' must not be empty".to_string());
        }
        // Unnamed network and cluster take the stack name
        if config.network.name.is_empty() {
            config.network.name = config.name.clone();
        }
        if let Some(cluster) = &mut config.cluster
            && cluster.name.is_empty()
        {
            cluster.name = config.name.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.log_level);

    let result = match cli.command {
        Commands::Validate { config } => run_validate(&config).await,
        Commands::Plan { config, state } => run_plan(&config, &state).await,
        Commands::Apply {
            config,
            state,
            show_secrets,
            max_concurrency,
        } => {
            run_apply(
                &config,
                &state,
                show_secrets,
                max_concurrency.map(NonZeroUsize::get),
            )
            .await
        }
        Commands::Outputs {
            state,
            show_secrets,
        } => run_outputs(&state, show_secrets).await,
        Commands::State { command } => run_state_command(command).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stratus", &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// RUST_LOG overrides `--log-level`; otherwise only Stratus crates log
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => env_logger::Builder::from_default_env().init(),
        None => env_logger::Builder::new()
            .filter(Some("stratus_core"), level)
            .filter(Some("stratus_state"), level)
            .filter(Some(env!("CARGO_CRATE_NAME")), level)
            .init(),
    }
}

/// Register the network and, when configured, the cluster into a new plan
async fn build_plan<P: Provider>(config: &StackConfig, provider: &P) -> Result<Plan, String> {
    let mut plan = Plan::new(config.name.as_str());

    let network = NetworkBuilder::new(&config.network)
        .build(&mut plan)
        .map_err(|e| format!("network '{}': {}", config.network.name, e))?;

    if let Some(cluster) = &config.cluster {
        ClusterBuilder::new(cluster, provider)
            .build(&mut plan, &ClusterNetwork::from(&network))
            .await
            .map_err(|e| format!("cluster '{}': {}", cluster.name, e))?;
    }

    Ok(plan)
}

async fn open_provider(
    state: &Path,
    region: &str,
) -> Result<StateProvider<LocalBackend>, String> {
    StateProvider::open(LocalBackend::with_path(state), region)
        .await
        .map_err(|e| format!("Failed to open state {}: {}", state.display(), e))
}

async fn run_validate(config_path: &Path) -> Result<(), String> {
    let config = StackConfig::load(config_path)?;

    println!("{}", "Validating...".cyan());

    // Throwaway state so validation never reads or writes a real one
    let scratch = std::env::temp_dir().join(format!("stratus-validate-{}.json", std::process::id()));
    let provider = open_provider(&scratch, &config.region).await?;
    let plan = build_plan(&config, &provider).await?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", plan.len())
            .green()
            .bold()
    );
    for effect in plan.effects() {
        println!("  • {}", effect.resource().id);
    }
    Ok(())
}

async fn run_plan(config_path: &Path, state_path: &Path) -> Result<(), String> {
    let config = StackConfig::load(config_path)?;
    let provider = open_provider(state_path, &config.region).await?;
    let plan = build_plan(&config, &provider).await?;

    print_plan(&plan, &provider.snapshot().await);
    Ok(())
}

async fn run_apply(
    config_path: &Path,
    state_path: &Path,
    show_secrets: bool,
    max_concurrency: Option<usize>,
) -> Result<(), String> {
    let config = StackConfig::load(config_path)?;

    let backend = LocalBackend::with_path(state_path);
    let lock = backend
        .acquire_lock("apply")
        .await
        .map_err(|e| e.to_string())?;

    let result = apply_locked(&config, state_path, show_secrets, max_concurrency).await;

    if let Err(e) = backend.release_lock(&lock).await {
        log::warn!("Failed to release lock {}: {}", lock.id, e);
        eprintln!(
            "{} lock {} was not released; run `stratus state unlock {}`",
            "Warning:".yellow().bold(),
            lock.id,
            lock.id
        );
    }
    result
}

async fn apply_locked(
    config: &StackConfig,
    state_path: &Path,
    show_secrets: bool,
    max_concurrency: Option<usize>,
) -> Result<(), String> {
    let provider = open_provider(state_path, &config.region).await?;
    let plan = build_plan(config, &provider).await?;

    print_plan(&plan, &provider.snapshot().await);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let interpreter =
        Interpreter::new(&provider).with_config(InterpreterConfig { max_concurrency });

    let applied = match interpreter.apply(&plan).await {
        Ok(applied) => applied,
        Err(failure) => {
            for id in failure.settled.settled_order() {
                println!("  {} {}", "✓".green(), id);
            }
            println!("  {} {}", "✗".red(), failure.error);
            println!();
            return Err(format!(
                "Apply failed after {} of {} resources settled",
                failure.settled.len(),
                plan.len()
            ));
        }
    };

    for id in applied.settled_order() {
        let identifier = applied
            .state(id)
            .and_then(|state| state.identifier.clone())
            .unwrap_or_default();
        println!("  {} {} {}", "✓".green(), id, identifier.dimmed());
    }

    let exports = applied.resolve_exports(&plan).map_err(|e| e.to_string())?;
    provider
        .record_outputs(&exports)
        .await
        .map_err(|e| format!("Failed to record outputs: {}", e))?;

    println!();
    println!(
        "{}",
        format!("Apply complete! {} resources settled.", applied.len())
            .green()
            .bold()
    );

    if !exports.is_empty() {
        println!();
        println!("{}", "Outputs:".cyan().bold());
        for line in export_lines(&exports, show_secrets) {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn run_outputs(state_path: &Path, show_secrets: bool) -> Result<(), String> {
    let state = read_state(state_path).await?;
    if state.outputs.is_empty() {
        println!("{}", "No outputs recorded.".yellow());
        return Ok(());
    }
    for line in output_lines(&state.outputs, show_secrets) {
        println!("{}", line);
    }
    Ok(())
}

async fn run_state_command(command: StateCommands) -> Result<(), String> {
    match command {
        StateCommands::List { state } => {
            let state = read_state(&state).await?;
            println!(
                "{}",
                format!(
                    "Serial {} (lineage {})",
                    state.serial, state.lineage
                )
                .cyan()
            );
            for resource in &state.resources {
                println!(
                    "  {} {}",
                    resource.resource_id(),
                    resource.identifier.as_deref().unwrap_or("-").dimmed()
                );
            }
            Ok(())
        }
        StateCommands::Unlock { lock_id, state } => {
            LocalBackend::with_path(&state)
                .force_unlock(&lock_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", format!("Lock {} removed.", lock_id).green());
            Ok(())
        }
    }
}

async fn read_state(path: &Path) -> Result<StateFile, String> {
    LocalBackend::with_path(path)
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("No state found at {}", path.display()))
}

fn print_plan(plan: &Plan, recorded: &StateFile) {
    if plan.is_empty() {
        println!("{}", "Nothing to do.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let resource = effect.resource();
        let symbol = match effect {
            Effect::Read(_) => "<=".cyan().bold(),
            Effect::Create(_) if recorded.find_resource(&resource.id).is_some() => "=".normal(),
            Effect::Create(_) => "+".green().bold(),
        };
        println!("  {} {}", symbol, resource.id.to_string().bold());
        for line in attribute_lines(resource) {
            println!("      {}", line);
        }
        let waits: Vec<String> = plan
            .graph()
            .prerequisites_of(&resource.id)
            .iter()
            .map(|id| id.to_string())
            .collect();
        if !waits.is_empty() {
            println!("      {} {}", "after".dimmed(), waits.join(", ").dimmed());
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

fn attribute_lines(resource: &Resource) -> Vec<String> {
    let sorted: BTreeMap<&String, &Value> = resource.attributes.iter().collect();
    sorted
        .into_iter()
        .map(|(key, value)| format!("{}: {}", key, format_value(value)))
        .collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let strs: Vec<_> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
        Value::Ref(_) | Value::Concat(_) => match value.to_json() {
            serde_json::Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        },
    }
}

fn export_lines(exports: &[ResolvedExport], show_secrets: bool) -> Vec<String> {
    exports
        .iter()
        .map(|export| {
            let shown = if export.secret && !show_secrets {
                SECRET_MASK.to_string()
            } else {
                format_value(&export.value)
            };
            format!("  {} = {}", export.name, shown)
        })
        .collect()
}

fn output_lines(outputs: &BTreeMap<String, OutputState>, show_secrets: bool) -> Vec<String> {
    outputs
        .iter()
        .map(|(name, output)| {
            let shown = if output.secret && !show_secrets {
                SECRET_MASK.to_string()
            } else {
                output.value.to_string()
            };
            format!("{} = {}", name, shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratus_core::ResourceId;

    const MINIMAL: &str = r#"{
        "name": "dev",
        "network": {
            "cidr": "10.0.0.0/16",
            "azs": ["us-east-1a", "us-east-1b"],
            "public_subnet": { "cidrs": ["10.0.0.0/24", "10.0.1.0/24"] },
            "private_subnet": { "cidrs": ["10.0.10.0/24", "10.0.11.0/24"] },
            "nat_gateway": { "mode": "single" }
        }
    }"#;

    #[test]
    fn stack_name_fills_unnamed_network() {
        let config = StackConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.network.name, "dev");
        assert!(config.cluster.is_none());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = StackConfig::parse(r#"{"name": "dev", "network": {}, "vpc": {}}"#).unwrap_err();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = StackConfig::parse(r#"{"name": "", "network": {}}"#).unwrap_err();
        assert!(err.contains("'name'"));
    }

    #[test]
    fn cluster_takes_stack_name() {
        let config = StackConfig::parse(
            r#"{"name": "prod", "region": "eu-west-1", "network": {}, "cluster": {"version": "1.29"}}"#,
        )
        .unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.cluster.unwrap().name, "prod");
    }

    #[test]
    fn secrets_are_masked_unless_requested() {
        let exports = vec![
            ResolvedExport {
                name: "vpc_id".to_string(),
                value: Value::string("vpc-1"),
                secret: false,
            },
            ResolvedExport {
                name: "worker_nodes_ssh".to_string(),
                value: Value::string("KEY"),
                secret: true,
            },
        ];
        assert_eq!(
            export_lines(&exports, false),
            vec!["  vpc_id = \"vpc-1\"", "  worker_nodes_ssh = (sensitive)"]
        );
        assert_eq!(export_lines(&exports, true)[1], "  worker_nodes_ssh = \"KEY\"");

        let outputs: BTreeMap<String, OutputState> = [(
            "worker_nodes_ssh".to_string(),
            OutputState {
                value: json!("KEY"),
                secret: true,
            },
        )]
        .into_iter()
        .collect();
        assert_eq!(output_lines(&outputs, false), vec!["worker_nodes_ssh = (sensitive)"]);
    }

    #[test]
    fn zero_max_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["stratus", "apply", "--max-concurrency", "0"]).is_err());

        let cli = Cli::try_parse_from(["stratus", "apply", "--max-concurrency", "2"]).unwrap();
        match cli.command {
            Commands::Apply {
                max_concurrency, ..
            } => assert_eq!(max_concurrency.map(NonZeroUsize::get), Some(2)),
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn references_render_as_interpolation() {
        let reference = Value::Ref(ResourceId::new("ec2.vpc", "dev").attr("id"));
        assert_eq!(format_value(&reference), "\"${ec2.vpc.dev.id}\"");
        assert_eq!(
            format_value(&Value::List(vec![Value::Int(1), Value::Bool(true)])),
            "[1, true]"
        );
    }

    #[tokio::test]
    async fn apply_records_state_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stratus.json");
        let state_path = dir.path().join("stratus.state.json");
        fs::write(&config_path, MINIMAL).unwrap();

        run_apply(&config_path, &state_path, false, Some(4))
            .await
            .unwrap();

        let state = read_state(&state_path).await.unwrap();
        assert!(state.outputs.contains_key("vpc_id"));
        assert!(!LocalBackend::with_path(&state_path).lock_path().exists());

        // A second apply reuses everything already recorded
        let before = state.resources.clone();
        run_apply(&config_path, &state_path, false, None)
            .await
            .unwrap();
        let after = read_state(&state_path).await.unwrap();
        assert_eq!(after.resources, before);
    }

    #[tokio::test]
    async fn demo_cluster_stack_applies() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/vpc-eks.json");
        let state_path = dir.path().join("stratus.state.json");

        run_apply(&config_path, &state_path, false, None)
            .await
            .unwrap();

        let state = read_state(&state_path).await.unwrap();
        for name in [
            "vpc_id",
            "cluster_name",
            "cluster_endpoint",
            "node_group_arn",
            "oidc_provider_arn",
            "worker_nodes_ssh",
        ] {
            assert!(state.outputs.contains_key(name), "missing output {}", name);
        }
        assert!(state.outputs["worker_nodes_ssh"].secret);
        assert_eq!(state.outputs["cluster_name"].value, json!("dev"));
        assert!(
            state
                .find_resource(&ResourceId::new("eks.addon", "vpc-cni"))
                .is_some()
        );
    }

    #[tokio::test]
    async fn apply_refuses_when_locked() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stratus.json");
        let state_path = dir.path().join("stratus.state.json");
        fs::write(&config_path, MINIMAL).unwrap();

        let lock = LocalBackend::with_path(&state_path)
            .acquire_lock("apply")
            .await
            .unwrap();
        let err = run_apply(&config_path, &state_path, false, None)
            .await
            .unwrap_err();
        assert!(err.contains(&lock.id));
    }
}
