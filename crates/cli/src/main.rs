use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use url::Url;

use strato_plugins::{
    HttpRepositoryClient, InstallOptions, InstallOutcome, JsonFileRegistry, PluginError,
    PluginInstaller, PluginRegistry, Prompter, RepositoryClient, StratoHome,
    SubprocessExecutor, config::Repositories, platform::current_platform_tag,
};
use strato_stream::{Consumer, ProxySelector, sort_recent_logs};
use strato_types::{LogMessage, LogMessageType};

#[derive(Parser)]
#[command(name = "strato", version, about = "Strato cloud platform CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage CLI plugins
    #[command(subcommand)]
    Plugin(PluginCommand),
    /// Manage plugin repositories
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Tail an app's logs, or dump the buffered recent ones
    Logs(LogsArgs),
    /// Fetch an app's latest container metrics
    Metrics(StreamArgs),
}

#[derive(Subcommand)]
enum PluginCommand {
    /// Install a plugin from a local path, URL, or repository name
    Install(InstallArgs),
    /// Uninstall an installed plugin
    Uninstall {
        /// Plugin name (case-insensitive)
        name: String,
    },
    /// List installed plugins
    List,
    /// List plugins available in registered repositories
    RepoPlugins {
        /// Only list this repository
        #[arg(short = 'r', long = "repo")]
        repository: Option<String>,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// Local path, URL, or plugin name to search repositories for
    reference: String,
    /// Repository to search (must be registered)
    #[arg(short = 'r', long = "repo")]
    repository: Option<String>,
    /// Skip confirmation prompts
    #[arg(short = 'f', long = "force")]
    force: bool,
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Register a plugin repository
    Add {
        name: String,
        url: String,
    },
    /// List registered plugin repositories
    List,
}

#[derive(Args)]
struct StreamArgs {
    /// Application id
    app_id: String,
    /// Stream endpoint (ws:// or wss://); defaults to $STRATO_STREAM_ENDPOINT
    #[arg(long)]
    endpoint: Option<String>,
    /// Authorization token; defaults to $STRATO_AUTH_TOKEN
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args)]
struct LogsArgs {
    #[command(flatten)]
    stream: StreamArgs,
    /// Dump buffered recent logs instead of streaming
    #[arg(long)]
    recent: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("FAILED");
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Plugin(plugin) => run_plugin(plugin).await,
        Command::Repo(repo) => run_repo(repo),
        Command::Logs(args) => run_logs(args).await,
        Command::Metrics(args) => run_metrics(args).await,
    }
}

// ── Plugin commands ──────────────────────────────────────────

async fn run_plugin(command: PluginCommand) -> Result<ExitCode> {
    let home = StratoHome::from_env().context("resolve Strato home directory")?;

    match command {
        PluginCommand::Install(args) => {
            let registry = JsonFileRegistry::load(home.registry_path())?;
            let repositories = Repositories::load(home.repositories_path())?;
            let client = HttpRepositoryClient::new()?;
            let executor = SubprocessExecutor::new();
            let builtins = builtin_command_names();

            let installer = PluginInstaller::new(
                &registry,
                &executor,
                &client,
                repositories.all(),
                &builtins,
                home.plugins_dir(),
                current_platform_tag(),
            );
            let options = InstallOptions { force: args.force, repository: args.repository };

            println!("Installing plugin {}...", args.reference);
            match installer.install(&args.reference, &options, &mut StdinPrompter).await? {
                InstallOutcome::Installed {
                    plugin,
                    replaced,
                    uninstall_hook_warning,
                    downloaded_bytes,
                } => {
                    if let Some(bytes) = downloaded_bytes {
                        println!("{bytes} bytes downloaded...");
                    }
                    if let Some(old) = replaced {
                        println!(
                            "Uninstalled existing plugin {} {}.",
                            old.name,
                            old.display_version()
                        );
                    }
                    println!("OK");
                    println!(
                        "Plugin {} {} successfully installed.",
                        plugin.name,
                        plugin.display_version()
                    );
                    if let Some(warning) = uninstall_hook_warning {
                        eprintln!("The previous plugin's uninstall hook failed: {warning}");
                        return Ok(ExitCode::FAILURE);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                InstallOutcome::Declined => {
                    println!("Install cancelled");
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        PluginCommand::Uninstall { name } => {
            let registry = JsonFileRegistry::load(home.registry_path())?;
            let client = HttpRepositoryClient::new()?;
            let executor = SubprocessExecutor::new();
            let builtins = builtin_command_names();
            let installer = PluginInstaller::new(
                &registry,
                &executor,
                &client,
                &[],
                &builtins,
                home.plugins_dir(),
                current_platform_tag(),
            );

            println!("Uninstalling plugin {name}...");
            let outcome = installer.uninstall(&name).await?;
            println!("OK");
            println!(
                "Plugin {} {} successfully uninstalled.",
                outcome.plugin.name,
                outcome.plugin.display_version()
            );
            if let Some(warning) = outcome.hook_warning {
                eprintln!("The plugin's uninstall hook failed: {warning}");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        PluginCommand::List => {
            let registry = JsonFileRegistry::load(home.registry_path())?;
            let plugins = registry.all()?;
            if plugins.is_empty() {
                println!("No plugins installed.");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{:<24} {:<12} COMMANDS", "NAME", "VERSION");
            for plugin in plugins {
                let commands: Vec<&str> =
                    plugin.commands.iter().map(|c| c.name.as_str()).collect();
                println!(
                    "{:<24} {:<12} {}",
                    plugin.name,
                    plugin.display_version(),
                    commands.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        PluginCommand::RepoPlugins { repository } => {
            let repositories = Repositories::load(home.repositories_path())?;
            let client = HttpRepositoryClient::new()?;

            let selected: Vec<_> = match &repository {
                Some(name) => {
                    let repo = repositories
                        .find(name)
                        .ok_or_else(|| PluginError::RepositoryNotFound { name: name.clone() })?;
                    vec![repo.clone()]
                }
                None => repositories.all().to_vec(),
            };
            if selected.is_empty() {
                println!("No plugin repositories registered. Use 'strato repo add'.");
                return Ok(ExitCode::SUCCESS);
            }

            for repo in selected {
                println!("Repository: {}", repo.name);
                let plugins = client.list(&repo).await?;
                for plugin in plugins {
                    println!("  {:<24} {:<12} {}", plugin.name, plugin.version, plugin.description);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_repo(command: RepoCommand) -> Result<ExitCode> {
    let home = StratoHome::from_env().context("resolve Strato home directory")?;
    let mut repositories = Repositories::load(home.repositories_path())?;

    match command {
        RepoCommand::Add { name, url } => {
            Url::parse(&url).with_context(|| format!("invalid repository URL '{url}'"))?;
            repositories.add(strato_plugins::PluginRepository { name: name.clone(), url })?;
            println!("OK");
            println!("Repository '{name}' added.");
        }
        RepoCommand::List => {
            if repositories.all().is_empty() {
                println!("No plugin repositories registered.");
            } else {
                println!("{:<24} URL", "NAME");
                for repo in repositories.all() {
                    println!("{:<24} {}", repo.name, repo.url);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Built-in command names and aliases a plugin may not shadow.
fn builtin_command_names() -> Vec<String> {
    use clap::CommandFactory;

    let mut names = vec!["help".to_string(), "version".to_string()];
    let root = Cli::command();
    for subcommand in root.get_subcommands() {
        names.push(subcommand.get_name().to_string());
        names.extend(subcommand.get_all_aliases().map(String::from));
        for nested in subcommand.get_subcommands() {
            names.push(nested.get_name().to_string());
            names.extend(nested.get_all_aliases().map(String::from));
        }
    }
    names
}

/// Confirmation prompts on the controlling terminal. EOF reads as an
/// interrupt, not a "no".
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, prompt: &str) -> Result<bool, PluginError> {
        use std::io::Write;

        print!("{prompt}");
        std::io::stdout().flush().map_err(PluginError::Io)?;

        let mut answer = String::new();
        let read = std::io::stdin().read_line(&mut answer).map_err(PluginError::Io)?;
        if read == 0 {
            return Err(PluginError::Cancelled);
        }
        Ok(parse_answer(&answer))
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// ── Stream commands ──────────────────────────────────────────

async fn run_logs(args: LogsArgs) -> Result<ExitCode> {
    let consumer = build_consumer(&args.stream)?;
    let token = auth_token(&args.stream);

    if args.recent {
        let mut logs = consumer.recent_logs(&args.stream.app_id, &token).await?;
        sort_recent_logs(&mut logs);
        for log in logs {
            println!("{}", format_log(&log));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (mut logs, mut errors) = consumer.tailing_logs(&args.stream.app_id, &token);
    let mut errors_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = consumer.close().await;
                break;
            }
            log = logs.recv() => match log {
                Some(log) => println!("{}", format_log(&log)),
                None => break,
            },
            error = errors.recv(), if errors_open => match error {
                Some(error) => eprintln!("warning: {error}"),
                None => errors_open = false,
            },
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_metrics(args: StreamArgs) -> Result<ExitCode> {
    let consumer = build_consumer(&args)?;
    let token = auth_token(&args);

    let metrics = consumer.container_metrics(&args.app_id, &token).await?;
    if metrics.is_empty() {
        println!("No metrics available.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<10} {:>8} {:>12} {:>12}", "INSTANCE", "CPU%", "MEMORY", "DISK");
    for metric in metrics {
        println!(
            "{:<10} {:>8.2} {:>12} {:>12}",
            metric.instance_index, metric.cpu_percentage, metric.memory_bytes, metric.disk_bytes
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn build_consumer(args: &StreamArgs) -> Result<Consumer> {
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| std::env::var("STRATO_STREAM_ENDPOINT").ok())
        .context("no stream endpoint configured; pass --endpoint or set STRATO_STREAM_ENDPOINT")?;

    let mut consumer = Consumer::new(&endpoint)?;
    if let Some(selector) = proxy_from_env() {
        consumer = consumer.with_proxy(selector)?;
    }
    Ok(consumer)
}

fn auth_token(args: &StreamArgs) -> String {
    args.token
        .clone()
        .or_else(|| std::env::var("STRATO_AUTH_TOKEN").ok())
        .unwrap_or_default()
}

/// Honor HTTPS_PROXY / HTTP_PROXY for the streaming connection.
fn proxy_from_env() -> Option<ProxySelector> {
    let configured = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
        .iter()
        .find_map(|name| std::env::var(name).ok())?;
    let proxy = Url::parse(&configured).ok()?;
    Some(Arc::new(move |_target: &Url| Some(proxy.clone())))
}

fn format_log(log: &LogMessage) -> String {
    let timestamp = chrono::DateTime::from_timestamp_nanos(log.timestamp);
    let stream = if log.message_type == LogMessageType::Err as i32 { "ERR" } else { "OUT" };
    format!(
        "{} [{}/{}] {} {}",
        timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        log.source_type,
        log.source_instance,
        stream,
        log.message_text()
    )
}
