//! Workflow Engine
//!
//! Drives a built [`WorkflowGraph`] to completion:
//! - one joiner per task correlates arriving input items into instances
//! - a scheduler dispatches ready instances up to the concurrency ceiling
//! - worker threads run instances in fingerprint-keyed sandboxes
//! - successes are recorded in the cache and fed to downstream channels
//!
//! The engine itself is a single event loop over an mpsc channel; joiners
//! and workers communicate with it exclusively through events, so no
//! scheduling state is ever shared across threads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::channel::Item;
use crate::error::{EngineError, Result};
use crate::execution::instance::{Fingerprint, TaskInstance};
use crate::execution::joiner::Joiner;
use crate::execution::sandbox::{self, LocalBackend, SandboxBackend, TaskOutputs};
use crate::execution::scheduler::{InstanceState, Scheduler};
use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor, ResourceSummary};
use crate::workflow::{OutputArity, PublishMode, TaskDescriptor, WorkflowGraph};

/// Run-wide execution settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the fingerprint-keyed work directory tree.
    pub work_dir: PathBuf,
    /// Global ceiling on concurrently running instances.
    pub max_parallel: usize,
    /// Per-label concurrency ceilings, a level below the global one.
    pub label_limits: HashMap<String, usize>,
    /// Cancel all queued work after the first permanent failure.
    pub stop_on_failure: bool,
    /// Consult the cache before dispatching. Successes are recorded
    /// either way, so a later resumed run can still pick them up.
    pub resume: bool,
    /// Sample process CPU/memory during the run.
    pub monitor_resources: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            max_parallel: num_cpus::get(),
            label_limits: HashMap::new(),
            stop_on_failure: false,
            resume: true,
            monitor_resources: false,
        }
    }
}

/// Per-instance outcome included in the run result.
#[derive(Debug, Clone)]
pub struct InstanceReport {
    /// Owning task's name.
    pub task: String,
    /// Tagged display name as shown in logs and the timeline.
    pub display_name: String,
    /// Final state.
    pub state: InstanceState,
    /// Number of dispatches (1 means no retries happened).
    pub attempts: u32,
    /// True when the result was replayed from the cache.
    pub cached: bool,
    /// Hex fingerprint.
    pub fingerprint: String,
    /// Sandbox directory.
    pub work_dir: PathBuf,
    /// Trailing stderr for failed instances.
    pub stderr_tail: Option<String>,
}

/// Outcome of a whole run.
pub struct RunResult {
    /// True when every instance succeeded and no task starved.
    pub success: bool,
    /// One report per instance, in creation order.
    pub instances: Vec<InstanceReport>,
    /// Files materialized into publish directories.
    pub published: Vec<PathBuf>,
    /// Non-fatal findings: pairing orphans, join leftovers, publish
    /// hiccups.
    pub warnings: Vec<String>,
    /// Tasks that never received a complete input set because an
    /// upstream task failed or starved.
    pub starved_tasks: Vec<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Instance lifecycle events for the Gantt chart.
    pub timeline: ExecutionTimeline,
    /// Resource usage summary, when monitoring was enabled.
    pub resources: Option<ResourceSummary>,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("success", &self.success)
            .field("instances", &self.instances.len())
            .field("published", &self.published.len())
            .field("warnings", &self.warnings)
            .field("starved_tasks", &self.starved_tasks)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl RunResult {
    /// Reports for one task, in instance creation order.
    pub fn instances_for(&self, task: &str) -> Vec<&InstanceReport> {
        self.instances.iter().filter(|i| i.task == task).collect()
    }

    /// Number of instances that finished successfully.
    pub fn succeeded(&self) -> usize {
        self.instances
            .iter()
            .filter(|i| i.state == InstanceState::Succeeded)
            .count()
    }
}

/// Messages flowing into the engine's event loop.
enum Event {
    /// A joiner assembled a complete input set for a task.
    Join { task: usize, inputs: Vec<Item> },
    /// A joiner saw all of its ports close.
    JoinerDone { task: usize, orphans: Vec<String> },
    /// A worker finished an instance.
    WorkerDone { id: u64, result: Result<TaskOutputs> },
    /// A configuration error surfaced mid-run; the run must stop.
    Fatal { error: EngineError },
}

/// Executes a workflow graph.
pub struct Engine {
    graph: WorkflowGraph,
    config: RunConfig,
    backend: Arc<dyn SandboxBackend>,
}

impl Engine {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            config: RunConfig::default(),
            backend: Arc::new(LocalBackend),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Swaps the sandbox backend, mainly for instrumented test doubles.
    pub fn with_backend(mut self, backend: impl SandboxBackend + 'static) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    /// Runs the workflow to completion.
    ///
    /// Configuration errors abort the run and surface as `Err`; instance
    /// failures are reported through [`RunResult`] instead.
    pub fn run(mut self) -> Result<RunResult> {
        let started = Instant::now();
        let mut timeline = ExecutionTimeline::new();
        let cache = CacheStore::new(&self.config.work_dir);
        let mut warnings = std::mem::take(&mut self.graph.warnings);
        let task_count = self.graph.tasks.len();

        info!(
            "Starting workflow: {} task(s), max_parallel={}, resume={}",
            task_count, self.config.max_parallel, self.config.resume
        );

        let (tx, rx) = mpsc::channel::<Event>();
        let monitor = start_monitor(self.config.monitor_resources);

        // One joiner per task with inputs; zero-input tasks get a single
        // synthetic empty join so they run exactly once.
        let mut aux_handles = spawn_joiners(&self.graph, &tx)?;
        for (index, node) in self.graph.tasks.iter().enumerate() {
            if node.inputs.is_empty() {
                let _ = tx.send(Event::Join {
                    task: index,
                    inputs: Vec::new(),
                });
                let _ = tx.send(Event::JoinerDone {
                    task: index,
                    orphans: Vec::new(),
                });
            }
        }

        let mut scheduler =
            Scheduler::new(self.config.max_parallel, self.config.label_limits.clone());
        let mut instances: Vec<TaskInstance> = Vec::new();
        let mut published: Vec<PathBuf> = Vec::new();
        let mut joiner_done = vec![false; task_count];
        let mut joiners_pending = task_count;
        let mut live = vec![0usize; task_count];
        let mut task_failed = vec![false; task_count];
        let mut outstanding = 0usize;
        let mut cancelled = false;
        let mut fatal: Option<EngineError> = None;

        while joiners_pending > 0 || !scheduler.is_idle() || outstanding > 0 {
            let event = match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            };

            match event {
                Event::Join { task, inputs } => {
                    if cancelled {
                        continue;
                    }
                    let descriptor = self.graph.tasks[task].descriptor.clone();
                    let fingerprint = Fingerprint::compute(&descriptor, &inputs);
                    let bindings = descriptor.bind_inputs(&inputs);
                    let tag = match &descriptor.tag {
                        Some(template) => match template.render(&bindings) {
                            Ok(tag) => Some(tag),
                            Err(error) => {
                                fatal.get_or_insert(error);
                                cancel_run(&self.graph, &mut scheduler, &mut instances, &mut live);
                                cancelled = true;
                                continue;
                            }
                        },
                        None => None,
                    };

                    let mut instance = TaskInstance {
                        id: instances.len() as u64,
                        task_index: task,
                        task_name: descriptor.name.clone(),
                        inputs,
                        work_dir: cache.work_dir(&fingerprint),
                        fingerprint,
                        state: InstanceState::Pending,
                        attempts: 0,
                        tag,
                        cached: false,
                        stderr_tail: None,
                    };
                    timeline.add_event(instance.display_name(), EventType::Submitted);

                    let hit = if self.config.resume {
                        cache.lookup(&instance.fingerprint)
                    } else {
                        None
                    };
                    if let Some(entry) = hit {
                        info!("Cached: {}", instance.display_name());
                        instance.state = InstanceState::Succeeded;
                        instance.cached = true;
                        timeline.add_event(instance.display_name(), EventType::CacheHit);
                        replay_publish(&descriptor, &instance, &entry, &mut published, &mut warnings);
                        feed_downstream(&self.graph, task, &entry.outputs, &instance);
                        instances.push(instance);
                        // The instance never became live, so the output
                        // channels may be closable already.
                        if joiner_done[task] && live[task] == 0 {
                            close_task_outputs(&self.graph, task);
                        }
                        continue;
                    }

                    live[task] += 1;
                    scheduler.enqueue(instance.id, descriptor.label.clone());
                    instances.push(instance);
                }

                Event::JoinerDone { task, orphans } => {
                    joiner_done[task] = true;
                    joiners_pending -= 1;
                    warnings.extend(orphans);
                    if live[task] == 0 {
                        close_task_outputs(&self.graph, task);
                    }
                }

                Event::WorkerDone { id, result } => {
                    outstanding -= 1;
                    let task = instances[id as usize].task_index;
                    let descriptor = self.graph.tasks[task].descriptor.clone();
                    scheduler.finish(descriptor.label.as_deref());

                    match result {
                        Ok(outputs) => {
                            let instance = &mut instances[id as usize];
                            instance.state = InstanceState::Succeeded;
                            info!("Completed: {}", instance.display_name());
                            timeline.add_event(instance.display_name(), EventType::Completed);

                            let entry = CacheEntry {
                                fingerprint: instance.fingerprint.to_hex(),
                                task: instance.task_name.clone(),
                                exit_code: outputs.exit_code,
                                outputs: outputs.ports,
                                command: outputs.command,
                                created_at: Utc::now(),
                            };
                            if let Err(e) = cache.record(&instance.fingerprint, &entry) {
                                warnings.push(format!(
                                    "could not record cache entry for {}: {}",
                                    instance.display_name(),
                                    e
                                ));
                            }
                            if let Some(spec) = &descriptor.publish {
                                for (_, files) in &entry.outputs {
                                    match sandbox::publish_outputs(spec, &instance.work_dir, files)
                                    {
                                        Ok(paths) => published.extend(paths),
                                        Err(e) => warnings.push(format!(
                                            "publish failed for {}: {}",
                                            instance.display_name(),
                                            e
                                        )),
                                    }
                                }
                            }

                            if !cancelled {
                                let instance = &instances[id as usize];
                                feed_downstream(&self.graph, task, &entry.outputs, instance);
                            }
                            live[task] -= 1;
                            if joiner_done[task] && live[task] == 0 {
                                close_task_outputs(&self.graph, task);
                            }
                        }
                        Err(error) if error.is_configuration() => {
                            fatal.get_or_insert(error);
                            instances[id as usize].state = InstanceState::Failed;
                            live[task] -= 1;
                            if !cancelled {
                                cancel_run(&self.graph, &mut scheduler, &mut instances, &mut live);
                                cancelled = true;
                            }
                        }
                        Err(error) => {
                            let attempts = instances[id as usize].attempts;
                            let may_retry = error.is_retryable()
                                || (error.is_logic_error() && descriptor.retry_logic_errors);
                            if may_retry && attempts <= descriptor.retries && !cancelled {
                                let instance = &mut instances[id as usize];
                                warn!(
                                    "Retrying {} (attempt {} of {}): {}",
                                    instance.display_name(),
                                    attempts + 1,
                                    descriptor.retries + 1,
                                    error
                                );
                                instance.state = InstanceState::Ready;
                                scheduler.enqueue(id, descriptor.label.clone());
                            } else {
                                let instance = &mut instances[id as usize];
                                error!("Failed: {}: {}", instance.display_name(), error);
                                instance.state = InstanceState::Failed;
                                instance.stderr_tail =
                                    sandbox::read_stderr_tail(&instance.work_dir)
                                        .or_else(|| Some(error.to_string()));
                                timeline.add_event(instance.display_name(), EventType::Failed);
                                task_failed[task] = true;
                                live[task] -= 1;
                                if joiner_done[task] && live[task] == 0 {
                                    close_task_outputs(&self.graph, task);
                                }
                                if self.config.stop_on_failure && !cancelled {
                                    warn!("Stopping on first failure");
                                    cancel_run(
                                        &self.graph,
                                        &mut scheduler,
                                        &mut instances,
                                        &mut live,
                                    );
                                    cancelled = true;
                                }
                            }
                        }
                    }
                }

                Event::Fatal { error } => {
                    fatal.get_or_insert(error);
                    if !cancelled {
                        cancel_run(&self.graph, &mut scheduler, &mut instances, &mut live);
                        cancelled = true;
                    }
                }
            }

            // Fill freed slots.
            while !cancelled {
                let id = match scheduler.next_dispatch() {
                    Some(id) => id,
                    None => break,
                };
                let instance = &mut instances[id as usize];
                instance.state = InstanceState::Running;
                instance.attempts += 1;
                let event_type = if instance.attempts > 1 {
                    EventType::Retried
                } else {
                    EventType::Started
                };
                timeline.add_event(instance.display_name(), event_type);
                debug!(
                    "Dispatching {} (attempt {})",
                    instance.display_name(),
                    instance.attempts
                );

                let descriptor = self.graph.tasks[instance.task_index].descriptor.clone();
                let inputs = instance.inputs.clone();
                let work_dir = instance.work_dir.clone();
                let attempt = instance.attempts;
                let tag = instance.tag.clone();
                let backend = self.backend.clone();
                let worker_tx = tx.clone();
                outstanding += 1;
                aux_handles.push(thread::spawn(move || {
                    let result = sandbox::run_instance(
                        &descriptor,
                        &inputs,
                        &work_dir,
                        attempt,
                        tag.as_deref(),
                        &*backend,
                    );
                    let _ = worker_tx.send(Event::WorkerDone { id, result });
                }));
            }
        }
        drop(tx);

        for handle in aux_handles {
            let _ = handle.join();
        }
        for handle in std::mem::take(&mut self.graph.handles) {
            let _ = handle.join();
        }
        let resources = stop_monitor(monitor);

        if let Some(error) = fatal {
            return Err(error);
        }

        let starved_tasks = find_starved(&self.graph, &instances, &task_failed);
        for task in &starved_tasks {
            warn!(
                "Task '{}' starved: upstream failure left it without inputs",
                task
            );
        }

        let success = starved_tasks.is_empty()
            && instances
                .iter()
                .all(|i| i.state == InstanceState::Succeeded);
        let reports: Vec<InstanceReport> = instances
            .iter()
            .map(|i| InstanceReport {
                task: i.task_name.clone(),
                display_name: i.display_name(),
                state: i.state,
                attempts: i.attempts,
                cached: i.cached,
                fingerprint: i.fingerprint.to_hex(),
                work_dir: i.work_dir.clone(),
                stderr_tail: i.stderr_tail.clone(),
            })
            .collect();

        let elapsed = started.elapsed();
        info!(
            "Workflow finished in {:.1}s: {}/{} instance(s) succeeded",
            elapsed.as_secs_f64(),
            reports
                .iter()
                .filter(|r| r.state == InstanceState::Succeeded)
                .count(),
            reports.len()
        );

        Ok(RunResult {
            success,
            instances: reports,
            published,
            warnings,
            starved_tasks,
            elapsed,
            timeline,
            resources,
        })
    }
}

/// Spawns joiner machinery for every task with at least one input: one
/// pump thread per port forwarding items into a per-task coordinator.
fn spawn_joiners(graph: &WorkflowGraph, tx: &mpsc::Sender<Event>) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    for (index, node) in graph.tasks.iter().enumerate() {
        if node.inputs.is_empty() {
            continue;
        }
        let descriptor = node.descriptor.clone();
        let (port_tx, port_rx) = mpsc::channel::<(usize, Option<Item>)>();

        for (port, &channel) in node.inputs.iter().enumerate() {
            let mut subscription = graph.channels[channel].subscribe()?;
            let pump_tx = port_tx.clone();
            handles.push(thread::spawn(move || {
                while let Some(item) = subscription.recv() {
                    if pump_tx.send((port, Some(item))).is_err() {
                        return;
                    }
                }
                let _ = pump_tx.send((port, None));
            }));
        }
        drop(port_tx);

        let events = tx.clone();
        handles.push(thread::spawn(move || {
            let port_names: Vec<String> =
                descriptor.inputs.iter().map(|p| p.name.clone()).collect();
            let mut joiner = Joiner::new(&descriptor.name, descriptor.join, port_names);
            let mut poisoned = false;

            while let Ok((port, message)) = port_rx.recv() {
                match message {
                    Some(item) => {
                        if poisoned {
                            continue;
                        }
                        if let Err(error) = descriptor.inputs[port].accepts(&item) {
                            let _ = events.send(Event::Fatal { error });
                            poisoned = true;
                            continue;
                        }
                        match joiner.offer(port, item) {
                            Ok(groups) => {
                                for inputs in groups {
                                    let _ = events.send(Event::Join { task: index, inputs });
                                }
                            }
                            Err(error) => {
                                let _ = events.send(Event::Fatal { error });
                                poisoned = true;
                            }
                        }
                    }
                    None => {
                        joiner.close(port);
                        if joiner.all_closed() {
                            break;
                        }
                    }
                }
            }

            let orphans = if poisoned { Vec::new() } else { joiner.orphans() };
            let _ = events.send(Event::JoinerDone {
                task: index,
                orphans,
            });
        }));
    }

    Ok(handles)
}

/// Emits a finished instance's outputs onto its task's output channels.
fn feed_downstream(
    graph: &WorkflowGraph,
    task: usize,
    outputs: &[(String, Vec<PathBuf>)],
    instance: &TaskInstance,
) {
    let node = &graph.tasks[task];
    for (port_index, port) in node.descriptor.outputs.iter().enumerate() {
        let files = &outputs[port_index].1;
        let mut item = match port.arity {
            OutputArity::Single => {
                // An optional single port with no match emits nothing.
                match files.first() {
                    Some(file) => Item::file(instance.work_dir.join(file)),
                    None => continue,
                }
            }
            OutputArity::Multiple => Item::List(
                files
                    .iter()
                    .map(|f| Item::file(instance.work_dir.join(f)))
                    .collect(),
            ),
        };
        if port.keyed {
            match instance.join_key() {
                Some(key) => item = Item::Tuple(vec![Item::Str(key), item]),
                None => warn!(
                    "{}: keyed port '{}' has no join key, emitting unkeyed",
                    instance.display_name(),
                    port.name
                ),
            }
        }
        graph.channels[node.outputs[port_index]].emit(item);
    }
}

/// Re-materializes a cache hit's outputs into the publish directory.
fn replay_publish(
    descriptor: &TaskDescriptor,
    instance: &TaskInstance,
    entry: &CacheEntry,
    published: &mut Vec<PathBuf>,
    warnings: &mut Vec<String>,
) {
    let spec = match &descriptor.publish {
        Some(spec) => spec,
        None => return,
    };
    if spec.mode == PublishMode::Move {
        warn!(
            "{}: publishing a cached result in move mode empties its work directory",
            instance.display_name()
        );
    }
    for (_, files) in &entry.outputs {
        match sandbox::publish_outputs(spec, &instance.work_dir, files) {
            Ok(paths) => published.extend(paths),
            Err(e) => warnings.push(format!(
                "publish failed for cached {}: {}",
                instance.display_name(),
                e
            )),
        }
    }
}

/// Cancels everything still queued and unblocks all joiners by closing
/// every task output channel.
fn cancel_run(
    graph: &WorkflowGraph,
    scheduler: &mut Scheduler,
    instances: &mut [TaskInstance],
    live: &mut [usize],
) {
    for id in scheduler.drain() {
        let instance = &mut instances[id as usize];
        instance.state = InstanceState::Cancelled;
        live[instance.task_index] -= 1;
    }
    for task in 0..graph.tasks.len() {
        close_task_outputs(graph, task);
    }
}

fn close_task_outputs(graph: &WorkflowGraph, task: usize) {
    for &channel in &graph.tasks[task].outputs {
        graph.channels[channel].close();
    }
}

/// A task starves when it spawned no instances and sits downstream of a
/// failed, cancelled or starved task. Computed as a fixpoint so whole
/// chains behind one failure are reported.
fn find_starved(
    graph: &WorkflowGraph,
    instances: &[TaskInstance],
    task_failed: &[bool],
) -> Vec<String> {
    let mut spawned = vec![false; graph.tasks.len()];
    let mut bad = task_failed.to_vec();
    for instance in instances {
        spawned[instance.task_index] = true;
        if instance.state == InstanceState::Cancelled {
            bad[instance.task_index] = true;
        }
    }

    let mut starved = vec![false; graph.tasks.len()];
    loop {
        let mut changed = false;
        for (index, node) in graph.tasks.iter().enumerate() {
            if spawned[index] || starved[index] {
                continue;
            }
            if node.upstream.iter().any(|&u| bad[u] || starved[u]) {
                starved[index] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    graph
        .tasks
        .iter()
        .enumerate()
        .filter(|(i, _)| starved[*i])
        .map(|(_, n)| n.descriptor.name.clone())
        .collect()
}

fn start_monitor(enabled: bool) -> Option<(Arc<AtomicBool>, JoinHandle<ResourceSummary>)> {
    if !enabled {
        return None;
    }
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let handle = thread::spawn(move || {
        let mut monitor = ResourceMonitor::new();
        while flag.load(Ordering::Relaxed) {
            monitor.sample();
            thread::sleep(Duration::from_millis(300));
        }
        monitor.summary()
    });
    Some((running, handle))
}

fn stop_monitor(
    monitor: Option<(Arc<AtomicBool>, JoinHandle<ResourceSummary>)>,
) -> Option<ResourceSummary> {
    let (running, handle) = monitor?;
    running.store(false, Ordering::Relaxed);
    handle.join().ok()
}
