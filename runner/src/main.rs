use clap::{error::ErrorKind, ArgGroup, Parser, Subcommand, ValueEnum};
use ddg_runner::{
    aggregate::{aggregate_task, finalize, finalize_project},
    config::RunnerConfig,
    detect::{detect, DetectOptions},
    executors::{ExecutorKind, Executors},
    metadata::{Metadata, MetadataError},
    pipeline::{self, submit_project, submit_workers, PipelineError},
    redo::RedoList,
    restore::{merge_restore, RestoreOptions},
    resubmit::resubmit,
    split::split_positions,
    tool::install_signal_handlers,
    worker::{run_replica, RunTarget, WorkerError},
    ExitStatus,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ddg-runner", version, about = "Replica fan-out/fan-in runner for shared filesystems")]
struct Cli {
    /// log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExecutorArg {
    Slurm,
    Local,
}

impl From<ExecutorArg> for ExecutorKind {
    fn from(value: ExecutorArg) -> Self {
        match value {
            ExecutorArg::Slurm => ExecutorKind::Slurm,
            ExecutorArg::Local => ExecutorKind::Local,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Split a position list into one chunk file per site
    Split {
        #[arg(long)]
        positions: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Create a project and submit one worker array per site
    Submit {
        #[arg(long)]
        structure: PathBuf,
        #[arg(long)]
        positions: PathBuf,
        #[arg(long)]
        residues: Option<PathBuf>,
        #[arg(long)]
        project: String,
        /// YAML config, defaults apply to everything it leaves out
        #[arg(long)]
        config: Option<PathBuf>,
        /// tool executable, overrides `tool.exec` of the config
        #[arg(long)]
        tool: Option<PathBuf>,
        #[arg(long)]
        replicas: Option<u32>,
        #[arg(long, value_enum)]
        executor: Option<ExecutorArg>,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// keep driving the project until it converged
        #[arg(long)]
        run: bool,
    },
    /// Compute and stage out a single replica (array task body)
    Worker {
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        chunk: PathBuf,
        #[arg(long, env = "SLURM_ARRAY_TASK_ID")]
        replica: u32,
        /// publish into the redo root
        #[arg(long)]
        redo: bool,
    },
    /// Copy one run directory into the aggregation tree (fan-in task body)
    Aggregate {
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long, env = "SLURM_ARRAY_TASK_ID")]
        task: u32,
    },
    /// Merge all partial index fragments into the master index
    #[command(group(ArgGroup::new("source").required(true).args(["metadata", "aggregate_root"])))]
    Finalize {
        #[arg(long)]
        metadata: Option<PathBuf>,
        #[arg(long)]
        aggregate_root: Option<PathBuf>,
        #[arg(long, default_value = "mutinfo.txt")]
        index_file: String,
    },
    /// List missing replicas and pull incomplete mutations from the index
    Detect {
        aggregate_root: PathBuf,
        expected: u32,
        #[arg(long)]
        inplace: bool,
        #[arg(long, default_value = "ddg.db3")]
        artifact: String,
        #[arg(long, default_value = "mutinfo.txt")]
        index_file: String,
    },
    /// Submit one pinned replica job per redo list entry
    Resubmit {
        redo_list: PathBuf,
        #[arg(long)]
        metadata: PathBuf,
    },
    /// Merge redo runs back into the aggregation tree
    MergeRestore {
        aggregate_root: PathBuf,
        redo_list: Option<PathBuf>,
        #[arg(long)]
        metadata: PathBuf,
    },
    /// Resume the repair loop of an existing project
    Pipeline {
        #[arg(long)]
        metadata: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn execute(command: Commands) -> Result<ExitStatus, PipelineError> {
    match command {
        Commands::Split { positions, out } => {
            let stats = split_positions(&positions, &out)?;

            for chunk in &stats.chunks {
                println!("{}", chunk.to_string_lossy());
            }
        }
        Commands::Submit {
            structure,
            positions,
            residues,
            project,
            config,
            tool,
            replicas,
            executor,
            root,
            run,
        } => {
            let mut config = match (config, tool) {
                (Some(path), tool) => {
                    let mut config = RunnerConfig::load(&path)?;
                    if let Some(tool) = tool {
                        config.tool.exec = tool;
                    }
                    config
                }
                (None, Some(tool)) => RunnerConfig::for_tool(tool),
                (None, None) => {
                    error!("Either --config or --tool has to name the tool to run");

                    return Ok(ExitStatus::Usage);
                }
            };

            for input in [Some(&structure), Some(&positions), residues.as_ref()]
                .into_iter()
                .flatten()
            {
                if !input.is_file() {
                    return Err(MetadataError::InputMissing(input.clone()).into());
                }
            }

            config.project = Some(project);
            config.inputs.structure = Some(structure);
            config.inputs.positions = Some(positions);
            config.inputs.residues = residues.or(config.inputs.residues);
            if let Some(replicas) = replicas {
                config.parameters.replicas = replicas;
            }
            if let Some(executor) = executor {
                config.executor.name = executor.into();
            }

            if config.preflight_checks() {
                error!("Config contains errors, nothing was submitted");

                return Ok(ExitStatus::Usage);
            }

            let (metadata, chunks) = submit_project(&config, &root)?;
            let executors = Executors::load(&metadata)?;

            if run {
                let report = pipeline::run(&metadata, &executors, &chunks)?;
                info!(sites = report.sites, cycles = report.cycles, "Project complete");
            } else {
                for id in submit_workers(&metadata, &executors, &chunks)? {
                    println!("{id}");
                }
            }
        }
        Commands::Worker {
            metadata,
            chunk,
            replica,
            redo,
        } => {
            let metadata = Metadata::load(&metadata)?;
            install_signal_handlers()?;

            let target = if redo {
                RunTarget::Redo
            } else {
                RunTarget::Primary
            };
            let outcome = match run_replica(&metadata, &chunk, replica, target) {
                Ok(outcome) => outcome,
                Err(WorkerError::InvalidReplica) => return Ok(ExitStatus::Usage),
                Err(error) => return Err(error.into()),
            };

            if !outcome.succeeded() {
                warn!(tool = ?outcome.tool, "Replica staged out without a successful tool run");

                return Ok(ExitStatus::Internal);
            }
        }
        Commands::Aggregate { metadata, task } => {
            let metadata = Metadata::load(&metadata)?;
            aggregate_task(&metadata, task)?;
        }
        Commands::Finalize {
            metadata,
            aggregate_root,
            index_file,
        } => match (metadata, aggregate_root) {
            (Some(metadata), _) => {
                finalize_project(&Metadata::load(&metadata)?)?;
            }
            (None, Some(aggregate_root)) => {
                finalize(&aggregate_root, &index_file)?;
            }
            (None, None) => return Ok(ExitStatus::Usage),
        },
        Commands::Detect {
            aggregate_root,
            expected,
            inplace,
            artifact,
            index_file,
        } => {
            let report = detect(
                &aggregate_root,
                &DetectOptions {
                    expected,
                    artifact: &artifact,
                    index_file: &index_file,
                    inplace,
                },
            )?;

            println!("{}", report.redo_list.to_string_lossy());
        }
        Commands::Resubmit { redo_list, metadata } => {
            let list = RedoList::load(&redo_list)?;
            let metadata = Metadata::load(&metadata)?;
            let executors = Executors::load(&metadata)?;

            for (entry, id) in resubmit(&metadata, &executors, &list)?.submitted {
                println!("{entry} {id}");
            }
        }
        Commands::MergeRestore {
            aggregate_root,
            redo_list,
            metadata,
        } => {
            let metadata = Metadata::load(&metadata)?;
            let list = redo_list.as_deref().map(RedoList::load).transpose()?;

            merge_restore(
                &RestoreOptions::from_metadata(&metadata, &aggregate_root),
                list.as_ref(),
            )?;
        }
        Commands::Pipeline { metadata } => {
            let metadata = Metadata::load(&metadata)?;
            let executors = Executors::load(&metadata)?;
            let report = pipeline::resume(&metadata, &executors)?;

            info!(cycles = report.cycles, "Project complete");
        }
    }

    Ok(ExitStatus::Success)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();

            return match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitStatus::Success.into(),
                _ => ExitStatus::Usage.into(),
            };
        }
    };

    init_tracing(cli.verbose);

    match execute(cli.command) {
        Ok(status) => status.into(),
        Err(error) => {
            error!(error = ?error, "{error}");

            error.exit_status().into()
        }
    }
}
