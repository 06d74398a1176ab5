//! User groups: cohorts of agents staggered in over a ramp-up window.
use crate::agent::{Agent, GroupStart};
use crate::collector::ResultSender;
use crate::config::GroupConfig;
use crate::script::{ScriptContext, TransactionFactory};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// One user group. Each group runs on a dedicated OS thread hosting its own
/// runtime, so CPU-bound scripts in one group cannot starve another; its
/// agents are lightweight tasks on that runtime.
pub struct UserGroup {
    config: GroupConfig,
    process_num: usize,
    factory: Arc<dyn TransactionFactory>,
    run_time: Duration,
    rampup: Duration,
}

impl UserGroup {
    pub fn new(
        config: GroupConfig,
        process_num: usize,
        factory: Arc<dyn TransactionFactory>,
        run_time: Duration,
        rampup: Duration,
    ) -> Self {
        Self {
            config,
            process_num,
            factory,
            run_time,
            rampup,
        }
    }

    /// Starts the group's thread. Every agent shares the group-start
    /// timestamp taken inside it and the same absolute deadline; ramp-up
    /// only shortens a late-starting agent's effective window.
    pub fn start(self, results: ResultSender) -> GroupHandle {
        let name = self.config.name.clone();
        let handle = thread::spawn(move || self.run(results));
        GroupHandle { name, handle }
    }

    fn run(self, results: ResultSender) {
        let UserGroup {
            config,
            process_num,
            factory,
            run_time,
            rampup,
        } = self;
        let group_name: Arc<str> = config.name.as_str().into();
        let group_start = GroupStart::now();

        // Scripts are opaque and routinely drive sockets, so the runtime
        // needs the IO driver as well as timers.
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("can not build runtime for user group {group_name}: {err}");
                return;
            }
        };

        runtime.block_on(async {
            let mut agents = Vec::with_capacity(config.threads);
            for thread_num in 0..config.threads {
                let agent = Agent {
                    cx: ScriptContext {
                        thread_num,
                        process_num,
                    },
                    group_name: Arc::clone(&group_name),
                    start_delay: ramp_delay(thread_num, config.threads, rampup),
                    run_time,
                    group_start,
                    factory: Arc::clone(&factory),
                    results: results.clone(),
                };
                agents.push(tokio::spawn(agent.run()));
            }
            for agent in agents {
                if agent.await.is_err() {
                    error!("agent panicked in user group {group_name}");
                }
            }
        });

        debug!("user group {group_name} finished");
    }
}

/// Delay before agent `i` of `n` starts, measured against the group-start
/// baseline rather than the previous agent, so total start skew across the
/// group is bounded by the ramp-up window regardless of thread count.
pub(crate) fn ramp_delay(index: usize, threads: usize, rampup: Duration) -> Duration {
    if threads == 0 {
        return Duration::ZERO;
    }
    rampup.mul_f64(index as f64 / threads as f64)
}

/// Join handle for a running user group.
pub struct GroupHandle {
    name: String,
    handle: thread::JoinHandle<()>,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("user group {} panicked", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::result_channel;
    use crate::script::{BoxFuture, CustomTimers, ScriptError, Transaction};
    use std::time::Instant;

    #[test]
    fn ramp_delays_are_cumulative_against_one_baseline() {
        let rampup = Duration::from_secs(8);
        assert_eq!(ramp_delay(0, 4, rampup), Duration::ZERO);
        assert_eq!(ramp_delay(1, 4, rampup), Duration::from_secs(2));
        assert_eq!(ramp_delay(3, 4, rampup), Duration::from_secs(6));
        // The last agent starts strictly inside the window.
        assert!(ramp_delay(3, 4, rampup) < rampup);
    }

    #[test]
    fn zero_rampup_starts_everyone_immediately() {
        assert_eq!(ramp_delay(5, 10, Duration::ZERO), Duration::ZERO);
    }

    struct Tick;

    impl Transaction for Tick {
        fn run<'a>(
            &'a mut self,
            _timers: &'a mut CustomTimers,
        ) -> BoxFuture<'a, Result<(), ScriptError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            })
        }
    }

    #[test]
    fn group_runs_all_agents_to_the_shared_deadline() {
        let config = GroupConfig {
            name: "Home".to_string(),
            threads: 3,
            script: "tick".to_string(),
        };
        let factory: Arc<dyn TransactionFactory> =
            Arc::new(|_cx: &ScriptContext| -> Result<Box<dyn Transaction>, ScriptError> {
                Ok(Box::new(Tick))
            });

        let (tx, rx) = result_channel();
        let started = Instant::now();
        let handle = UserGroup::new(
            config,
            0,
            factory,
            Duration::from_millis(100),
            Duration::ZERO,
        )
        .start(tx.clone());
        handle.join();
        tx.close();

        // In-flight iterations finish after the deadline, never before it.
        assert!(started.elapsed() >= Duration::from_millis(100));

        let mut count = 0;
        while let Ok(record) = rx.recv_blocking() {
            assert_eq!(record.group_name.as_ref(), "Home");
            count += 1;
        }
        // Three agents looping 5ms iterations for 100ms.
        assert!(count >= 3);
    }

    struct Echo;

    impl Transaction for Echo {
        fn run<'a>(
            &'a mut self,
            timers: &'a mut CustomTimers,
        ) -> BoxFuture<'a, Result<(), ScriptError>> {
            Box::pin(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
                let addr = listener.local_addr()?;
                let start = Instant::now();
                let (connected, accepted) =
                    tokio::join!(tokio::net::TcpStream::connect(addr), listener.accept());
                connected?;
                accepted?;
                timers.insert("connect".to_string(), start.elapsed().as_secs_f64());
                Ok(())
            })
        }
    }

    #[test]
    fn agents_can_drive_network_io() {
        let config = GroupConfig {
            name: "Sockets".to_string(),
            threads: 1,
            script: "echo".to_string(),
        };
        let factory: Arc<dyn TransactionFactory> =
            Arc::new(|_cx: &ScriptContext| -> Result<Box<dyn Transaction>, ScriptError> {
                Ok(Box::new(Echo))
            });

        let (tx, rx) = result_channel();
        let handle = UserGroup::new(
            config,
            0,
            factory,
            Duration::from_millis(100),
            Duration::ZERO,
        )
        .start(tx.clone());
        handle.join();
        tx.close();

        let mut count = 0;
        while let Ok(record) = rx.recv_blocking() {
            assert!(record.error.is_empty(), "socket round-trip failed: {}", record.error);
            assert!(record.custom_timers.contains_key("connect"));
            count += 1;
        }
        assert!(count >= 1, "network transaction produced no rows");
    }
}
