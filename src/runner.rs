//! The run coordinator: configure, launch, watch, drain, report.
use crate::collector::{result_channel, ResultsWriter, RunCounters, RESULTS_FILE};
use crate::config::{Project, TestConfig, CONFIG_FILE};
use crate::error::RunError;
use crate::group::{GroupHandle, UserGroup};
use crate::progress::ProgressBar;
use crate::report::{ReportRenderer, ResultsDbLoader};
use crate::script::ScriptRegistry;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Shared run state observed by the remote control endpoint.
#[derive(Debug, Default)]
pub struct RunState {
    inner: Mutex<RunStateInner>,
}

#[derive(Debug, Default, Clone)]
struct RunStateInner {
    running: bool,
    output_dir: Option<PathBuf>,
}

impl RunState {
    /// Claims the run slot. Returns false if a run is already in progress.
    pub fn try_begin(&self) -> bool {
        let mut state = self.lock();
        if state.running {
            false
        } else {
            state.running = true;
            state.output_dir = None;
            true
        }
    }

    pub fn mark_launched(&self) {
        let mut state = self.lock();
        state.running = true;
        state.output_dir = None;
    }

    pub fn mark_finished(&self, output_dir: Option<PathBuf>) {
        let mut state = self.lock();
        state.running = false;
        state.output_dir = output_dir;
    }

    pub fn snapshot(&self) -> (bool, Option<PathBuf>) {
        let state = self.lock();
        (state.running, state.output_dir.clone())
    }

    fn lock(&self) -> MutexGuard<'_, RunStateInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Drives one run end to end and owns the wiring to the external
/// post-processing collaborators.
pub struct Coordinator {
    registry: ScriptRegistry,
    renderer: Option<Arc<dyn ReportRenderer>>,
    db_loader: Option<Arc<dyn ResultsDbLoader>>,
    state: Option<Arc<RunState>>,
}

impl Coordinator {
    pub fn new(registry: ScriptRegistry) -> Self {
        Self {
            registry,
            renderer: None,
            db_loader: None,
            state: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_db_loader(mut self, db_loader: Arc<dyn ResultsDbLoader>) -> Self {
        self.db_loader = Some(db_loader);
        self
    }

    pub fn with_state(mut self, state: Arc<RunState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Runs the project to completion and returns the output directory.
    ///
    /// A group whose script is unregistered or whose agents all fail
    /// construction simply contributes zero records; only configuration and
    /// output-directory failures abort the run.
    pub fn run(&self, project: &Project) -> Result<PathBuf, RunError> {
        let config = TestConfig::load(&project.config_path())?;
        info!(
            "starting run for project {}: {} user groups",
            project.name,
            config.groups.len()
        );

        let output_dir = project
            .results_root()
            .join(format!("results_{}", timestamp()));
        debug!("run output directory: {}", output_dir.display());

        // The writer must be ready before any record can be produced.
        let (tx, rx) = result_channel();
        let writer = ResultsWriter::new(rx, &output_dir, config.run.console_logging)?;
        let counters = writer.counters();
        let writer_handle = writer.spawn();

        if let Some(state) = &self.state {
            state.mark_launched();
        }

        let (groups, total_threads) = self.plan_groups(&config);

        let start = Instant::now();
        let handles: Vec<GroupHandle> = groups.into_iter().map(|g| g.start(tx.clone())).collect();

        if config.run.console_logging {
            for handle in handles {
                handle.join();
            }
        } else {
            interactive_wait(handles, &counters, config.run.run_time, total_threads, start);
        }

        // Drain handshake: every pool has joined, so closing the channel and
        // joining the writer guarantees every in-flight record is persisted.
        tx.close();
        if writer_handle.join().is_err() {
            error!("results writer panicked");
        }

        info!("analyzing results...");
        self.render_report(&output_dir, &config);

        // Keep the resolved configuration next to the results for audit.
        if let Err(err) = std::fs::copy(project.config_path(), output_dir.join(CONFIG_FILE)) {
            error!(
                "can not copy configuration into {}: {err}",
                output_dir.display()
            );
        }

        if let Some(database) = &config.run.results_database {
            match &self.db_loader {
                Some(loader) => {
                    info!("loading results into database: {database}");
                    if let Err(err) = loader.load(
                        &project.name,
                        &output_dir,
                        database,
                        &config.run,
                        &config.groups,
                    ) {
                        error!("results database load failed: {err}");
                    }
                }
                None => debug!("results_database configured but no loader wired in"),
            }
        }

        if let Some(script) = &config.run.post_run_script {
            info!("running post_run_script: {}", script.display());
            match Command::new(script).status() {
                Ok(status) if !status.success() => {
                    error!("post_run_script exited with {status}")
                }
                Ok(_) => {}
                Err(err) => error!("post_run_script failed to start: {err}"),
            }
        }

        info!("done.");
        if let Some(state) = &self.state {
            state.mark_finished(Some(output_dir.clone()));
        }
        Ok(output_dir)
    }

    /// Re-runs the report renderer over an existing results directory using
    /// the configuration copy stored inside it.
    pub fn reanalyze(&self, results_dir: &Path) -> Result<(), RunError> {
        let config = TestConfig::load(&results_dir.join(CONFIG_FILE))?;
        info!("re-analyzing results in {}", results_dir.display());
        self.render_report(results_dir, &config);
        Ok(())
    }

    /// Resolves each configured group against the registry. A group whose
    /// script is unregistered is skipped with a critical log and does not
    /// count towards the thread total shown in the interactive banner.
    fn plan_groups(&self, config: &TestConfig) -> (Vec<UserGroup>, usize) {
        let run_time = Duration::from_secs(config.run.run_time);
        let rampup = Duration::from_secs(config.run.rampup);
        let mut groups = Vec::with_capacity(config.groups.len());
        let mut total_threads = 0;
        for (process_num, group_config) in config.groups.iter().enumerate() {
            let Some(factory) = self.registry.get(&group_config.script) else {
                error!(
                    "no script registered under {:?}; user group {} will produce no results",
                    group_config.script, group_config.name
                );
                continue;
            };
            total_threads += group_config.threads;
            groups.push(UserGroup::new(
                group_config.clone(),
                process_num,
                factory,
                run_time,
                rampup,
            ));
        }
        (groups, total_threads)
    }

    fn render_report(&self, output_dir: &Path, config: &TestConfig) {
        match &self.renderer {
            Some(renderer) => {
                let results_csv = output_dir.join(RESULTS_FILE);
                if let Err(err) =
                    renderer.render(output_dir, &results_csv, &config.run, &config.groups)
                {
                    error!("report renderer failed: {err}");
                } else {
                    info!("created: {}", output_dir.join("results.html").display());
                }
            }
            None => debug!("no report renderer wired in; skipping analysis"),
        }
    }
}

/// Interactive display mode: a 1s-cadence progress bar with live counters
/// until the deadline, then a waiting indicator while straggler groups
/// finish their in-flight iterations.
fn interactive_wait(
    handles: Vec<GroupHandle>,
    counters: &RunCounters,
    run_time: u64,
    total_threads: usize,
    start: Instant,
) {
    println!("\n  user groups: {}", handles.len());
    println!("  threads: {total_threads}\n");

    let mut bar = ProgressBar::new(run_time);
    let mut elapsed = 0;
    while elapsed < run_time + 1 {
        bar.update_time(elapsed);
        print!(
            "\r{bar}   transactions: {}  timers: {}  errors: {}",
            counters.transactions(),
            counters.timers(),
            counters.errors(),
        );
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_secs(1));
        elapsed = start.elapsed().as_secs();
    }
    println!();

    while handles.iter().any(|handle| !handle.is_finished()) {
        print!("\rwaiting for all requests to finish...");
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_millis(500));
    }
    println!();

    for handle in handles {
        debug!("user group {} joined", handle.name());
        handle.join();
    }
}

fn timestamp() -> String {
    let format =
        time::macros::format_description!("[year].[month].[day]_[hour].[minute].[second]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
