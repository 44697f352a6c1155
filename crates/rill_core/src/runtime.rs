//! Runtime handle
//!
//! Everything a component instance needs from its environment besides its
//! sources: the scheduler that owns time, the configuration, the instance
//! counter used for diagnostics and the error channel.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rill_stream::{Scheduler, Stream, Subject};

use crate::config::RuntimeConfig;
use crate::error::ComponentError;

/// Monotonic instance numbering, shared by every component of a runtime
#[derive(Clone, Default)]
pub struct InstanceCounter(Rc<Cell<u64>>);

impl InstanceCounter {
    pub fn next(&self) -> u64 {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }

    pub fn issued(&self) -> u64 {
        self.0.get()
    }
}

/// Shared runtime handle; cloning is cheap
#[derive(Clone)]
pub struct Runtime {
    scheduler: Scheduler,
    config: Rc<RuntimeConfig>,
    counter: InstanceCounter,
    errors: Subject<ComponentError>,
    reported: Rc<RefCell<Vec<ComponentError>>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let scheduler = Scheduler::with_task_limit(config.scheduler.max_tasks_per_run);
        Self::with_scheduler(config, scheduler)
    }

    pub fn with_scheduler(config: RuntimeConfig, scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            config: Rc::new(config),
            counter: InstanceCounter::default(),
            errors: Subject::new(),
            reported: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn counter(&self) -> &InstanceCounter {
        &self.counter
    }

    /// Errors raised while the component graph is running.
    pub fn errors(&self) -> Stream<ComponentError> {
        self.errors.stream()
    }

    /// Every error reported so far, including those raised before anyone
    /// subscribed to [`Runtime::errors`].
    pub fn reported_errors(&self) -> Vec<ComponentError> {
        self.reported.borrow().clone()
    }

    pub fn report(&self, error: ComponentError) {
        tracing::error!(error = %error, "component error");
        self.reported.borrow_mut().push(error.clone());
        self.errors.push(error);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .field("instances", &self.counter.issued())
            .finish()
    }
}

/// Per-instance diagnostics: every line carries the component name and
/// instance number.
#[derive(Clone)]
pub(crate) struct Diag {
    component: Rc<str>,
    instance: u64,
    verbose: bool,
}

impl Diag {
    pub(crate) fn new(component: &str, instance: u64, verbose: bool) -> Self {
        Self {
            component: Rc::from(component),
            instance,
            verbose,
        }
    }

    pub(crate) fn component(&self) -> &str {
        &self.component
    }

    /// Flow logging: `debug`, or `info` for components flagged `debug`.
    pub(crate) fn trace(&self, message: fmt::Arguments<'_>) {
        if self.verbose {
            tracing::info!(component = %self.component, instance = self.instance, "{}", message);
        } else {
            tracing::debug!(component = %self.component, instance = self.instance, "{}", message);
        }
    }

    pub(crate) fn warn(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(component = %self.component, instance = self.instance, "{}", message);
    }

    pub(crate) fn error(&self, message: fmt::Arguments<'_>) {
        tracing::error!(component = %self.component, instance = self.instance, "{}", message);
    }
}
