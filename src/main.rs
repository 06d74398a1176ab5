use clap::{Parser, Subcommand};
use stampede::config::Project;
use stampede::runner::Coordinator;
use stampede::script::ScriptRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "stampede", version, about = "Multi-group, multi-agent load generation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a load-test project, or serve it for remote triggering.
    Run {
        /// Project name or path to a project directory.
        project: Option<String>,

        /// Listen for remote start/status requests instead of running now.
        #[arg(short, long)]
        port: Option<u16>,

        /// Produce verbose output.
        #[arg(short, long)]
        verbose: bool,

        /// Reanalyze the results in the given directory instead of running.
        #[arg(short = 'R', long, value_name = "DIR")]
        reanalyze_results: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let Cli { command } = Cli::parse();
    let Command::Run {
        project,
        port,
        verbose,
        reanalyze_results,
    } = command;

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let Some(name) = project else {
        error!("no project specified");
        error!("usage: stampede run <project>");
        return ExitCode::FAILURE;
    };
    let Some(project) = Project::locate(&name) else {
        error!("can not find project: {name}");
        return ExitCode::FAILURE;
    };
    debug!("project path is {}", project.path.display());

    let coordinator = Coordinator::new(ScriptRegistry::discover());

    if let Some(results_dir) = reanalyze_results {
        return match coordinator.reanalyze(&results_dir) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    if let Some(port) = port {
        return serve(port, project, coordinator);
    }

    match coordinator.run(&project) {
        Ok(output_dir) => {
            info!("results written to {}", output_dir.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn serve(port: u16, project: Project, coordinator: Coordinator) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("can not start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(stampede::server::serve(port, project, coordinator)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("remote control endpoint failed: {err}");
            ExitCode::FAILURE
        }
    }
}
