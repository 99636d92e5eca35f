use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing_subscriber::EnvFilter;

use plugin_lifecycle::cli::{Cli, Command, KindArg};
use plugin_lifecycle::config::{DEFAULT_CONFIG_FILE, RuntimeConfig};
use plugin_lifecycle::demo::{self, Outcome, Step};
use plugin_lifecycle::kinds::{Agent, Evaluation, Model, Orchestrator, Transform};
use plugin_lifecycle::runtime::Plugin;
use plugin_lifecycle::status::Watch;
use plugin_lifecycle::ui::{self, WatchView};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = RuntimeConfig::load_from(&config_path)?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Command::Describe { kind } => {
            println!("{}", describe(kind)?);
        }
        Command::Demo { kind, raw } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .max_blocking_threads(config.max_blocking_threads.max(1))
                .build()
                .context("starting tokio runtime")?;
            let outcome = runtime.block_on(run_demo(kind, raw, &config))?;
            report(&outcome, raw);
        }
        Command::Version => {
            println!("plugin-lifecycle {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_tracing(config: &RuntimeConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.log_filter.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn describe(kind: KindArg) -> Result<String> {
    let table = match kind {
        KindArg::Model => Model::blueprint()?.describe(),
        KindArg::Agent => Agent::blueprint()?.describe(),
        KindArg::Orchestrator => Orchestrator::blueprint()?.describe(),
        KindArg::Evaluation => Evaluation::blueprint()?.describe(),
        KindArg::Transform => Transform::blueprint()?.describe(),
    };
    Ok(table)
}

async fn run_demo(kind: KindArg, raw: bool, config: &RuntimeConfig) -> Result<Outcome> {
    match kind {
        KindArg::Model => drive(demo::model(), demo::model_script(), raw, config).await,
        KindArg::Agent => drive(demo::agent(), demo::agent_script(), raw, config).await,
        KindArg::Orchestrator => {
            drive(demo::orchestrator(), demo::orchestrator_script(), raw, config).await
        }
        KindArg::Evaluation => {
            drive(demo::evaluation(), demo::evaluation_script(), raw, config).await
        }
        KindArg::Transform => drive(demo::transform(), demo::transform_script(), raw, config).await,
    }
}

async fn drive<P: Plugin>(
    plugin: P,
    script: Vec<Step>,
    raw: bool,
    config: &RuntimeConfig,
) -> Result<Outcome> {
    let kind = P::blueprint()?.kind();
    if raw {
        demo::run(plugin, config, script, ui::print_raw).await
    } else {
        let view = WatchView::start(kind);
        demo::run(plugin, config, script, |watch: Watch| view.follow(watch)).await
    }
}

fn report(outcome: &Outcome, raw: bool) {
    if raw {
        return;
    }
    let bold = Style::new().bold();
    for reply in &outcome.replies {
        println!("  {} {reply}", bold.apply_to("reply"));
    }
    ui::print_tasks(&outcome.history);
    println!(
        "\n{} after {} tasks",
        bold.apply_to(outcome.final_state),
        outcome.tasks
    );
}
