use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::debug;

use bagpipe::builtin;
use bagpipe::config::RunOptions;
use bagpipe::definition::PipelineDefinition;
use bagpipe::env::EnvAssignment;
use bagpipe::execution::GraphExecutor;
use bagpipe::logging;
use bagpipe::registry::Registry;
use bagpipe::sink::ConsoleSink;
use bagpipe::strategy::StrategyKind;
use bagpipe::worker;

const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "bagpipe", version, about = "Graph-based ETL: bags of values through a DAG of transforms")]
struct Cli {
  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, env = "BAGPIPE_LOG", default_value = DEFAULT_LOG_LEVEL)]
  log_level: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline from a definition file, a directory or the built-in registry
  Run(RunArgs),
  /// Print the version and exit
  Version,
  /// List built-in pipelines and transforms
  List,
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["path", "module"])))]
struct RunArgs {
  /// Pipeline definition file, or a directory holding pipeline.toml
  path: Option<PathBuf>,

  /// Built-in pipeline to run
  #[arg(short, long, value_name = "NAME")]
  module: Option<String>,

  /// Print one minimal line per output
  #[arg(short, long)]
  quiet: bool,

  /// Execution strategy (sequential, threaded, processed)
  #[arg(short, long)]
  strategy: Option<StrategyKind>,

  /// Environment variable set for the duration of the run (repeatable)
  #[arg(short, long = "env", value_name = "KEY=VALUE")]
  env: Vec<EnvAssignment>,

  /// Cancel the run after this many milliseconds
  #[arg(long, value_name = "MS")]
  timeout_ms: Option<u64>,

  /// Bound every queue to this many bags
  #[arg(long, value_name = "N")]
  queue_capacity: Option<usize>,
}

fn main() -> ExitCode {
  let registry = builtin::registry();
  if std::env::var_os(worker::WORKER_ENV).is_some() {
    logging::init(DEFAULT_LOG_LEVEL);
  }
  if let Some(code) = worker::serve_if_requested(&registry) {
    return code;
  }

  let cli = Cli::parse();
  logging::init(&cli.log_level);

  match dispatch(cli.command, &registry) {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {:#}", err);
      ExitCode::FAILURE
    }
  }
}

fn dispatch(command: Commands, registry: &Registry) -> anyhow::Result<ExitCode> {
  match command {
    Commands::Version => {
      println!("bagpipe {}", env!("CARGO_PKG_VERSION"));
      Ok(ExitCode::SUCCESS)
    }
    Commands::List => {
      println!("pipelines:");
      for name in registry.pipeline_names() {
        println!("  {}", name);
      }
      println!("transforms:");
      for key in registry.node_keys() {
        println!("  {}", key);
      }
      Ok(ExitCode::SUCCESS)
    }
    Commands::Run(args) => run(args, registry),
  }
}

fn run(args: RunArgs, registry: &Registry) -> anyhow::Result<ExitCode> {
  let (graph, mut options) = match (&args.module, &args.path) {
    (Some(name), _) => (
      registry
        .pipeline(name)
        .with_context(|| format!("cannot build pipeline '{}'", name))?,
      RunOptions::default(),
    ),
    (None, Some(path)) => {
      let definition = PipelineDefinition::load(path)?;
      let graph = definition
        .build(registry)
        .with_context(|| format!("cannot build pipeline from {}", path.display()))?;
      (graph, definition.run)
    }
    (None, None) => anyhow::bail!("either a PATH or --module NAME is required"),
  };

  options.quiet |= args.quiet;
  if let Some(strategy) = args.strategy {
    options.strategy = strategy;
  }
  options.env.extend(args.env);
  if args.timeout_ms.is_some() {
    options.timeout_ms = args.timeout_ms;
  }
  if args.queue_capacity.is_some() {
    options.queue_capacity = args.queue_capacity;
  }
  debug!(?options, graph = %graph.name(), "resolved run options");

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("cannot start the async runtime")?;
  let quiet = options.quiet;
  let result = runtime.block_on(
    GraphExecutor::new(options)
      .with_plugin(ConsoleSink::new(quiet))
      .execute(&graph, Vec::new()),
  )?;

  Ok(if result.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}
