//! Parent delegation and the root zone's behavior.
//!
//! A hook installed on zone `Z` receives a [`ZoneDelegate`] that continues the hook
//! search at `Z`'s parent. When no ancestor overrides an operation, the root
//! implementations at the bottom of this file run.

use crate::builder::UncaughtErrorPolicy;
use crate::error::Failure;
use crate::runtime::context;
use crate::timer::Timer;
use crate::zone::spec::ErasedCallback;
use crate::zone::{Zone, ZoneSpecification, ZoneValues};

use std::time::Duration;

use tracing::{debug, error, trace};

/// Handle to the parent chain of the zone whose hook is running.
pub struct ZoneDelegate {
    parent: Option<Zone>,
}

impl ZoneDelegate {
    pub(crate) fn new(parent: Option<Zone>) -> Self {
        Self { parent }
    }

    /// The zone where the search for the next hook starts.
    pub fn parent(&self) -> Option<&Zone> {
        self.parent.as_ref()
    }

    pub fn run(&self, zone: &Zone, body: &mut dyn FnMut()) {
        match super::lookup(self.parent.clone(), |hooks| hooks.run.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, body),
            None => root_run(zone, body),
        }
    }

    pub fn run_unary(&self, zone: &Zone, body: &mut dyn FnMut()) {
        match super::lookup(self.parent.clone(), |hooks| hooks.run_unary.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, body),
            None => root_run(zone, body),
        }
    }

    pub fn run_binary(&self, zone: &Zone, body: &mut dyn FnMut()) {
        match super::lookup(self.parent.clone(), |hooks| hooks.run_binary.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, body),
            None => root_run(zone, body),
        }
    }

    pub fn register_callback(&self, zone: &Zone, callback: ErasedCallback) -> ErasedCallback {
        match super::lookup(self.parent.clone(), |hooks| hooks.register_callback.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, callback),
            None => callback,
        }
    }

    pub fn register_unary_callback(&self, zone: &Zone, callback: ErasedCallback) -> ErasedCallback {
        match super::lookup(self.parent.clone(), |hooks| hooks.register_unary_callback.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, callback),
            None => callback,
        }
    }

    pub fn register_binary_callback(&self, zone: &Zone, callback: ErasedCallback) -> ErasedCallback {
        match super::lookup(self.parent.clone(), |hooks| hooks.register_binary_callback.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, callback),
            None => callback,
        }
    }

    pub fn error_callback(&self, zone: &Zone, failure: &Failure) -> Option<Failure> {
        match super::lookup(self.parent.clone(), |hooks| hooks.error_callback.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, failure),
            None => None,
        }
    }

    pub fn schedule_microtask(&self, zone: &Zone, task: Box<dyn FnOnce()>) {
        match super::lookup(self.parent.clone(), |hooks| hooks.schedule_microtask.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, task),
            None => root_schedule_microtask(zone, task),
        }
    }

    pub fn create_timer(&self, zone: &Zone, duration: Duration, callback: Box<dyn FnOnce()>) -> Timer {
        match super::lookup(self.parent.clone(), |hooks| hooks.create_timer.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, duration, callback),
            None => root_create_timer(zone, duration, callback),
        }
    }

    pub fn create_periodic_timer(
        &self,
        zone: &Zone,
        period: Duration,
        callback: Box<dyn FnMut(&Timer)>,
    ) -> Timer {
        match super::lookup(self.parent.clone(), |hooks| hooks.create_periodic_timer.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, period, callback),
            None => root_create_periodic_timer(zone, period, callback),
        }
    }

    pub fn handle_uncaught_error(&self, zone: &Zone, failure: Failure) {
        match super::lookup(self.parent.clone(), |hooks| hooks.handle_uncaught_error.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, failure),
            None => root_handle_uncaught_error(failure),
        }
    }

    pub fn print(&self, zone: &Zone, line: &str) {
        match super::lookup(self.parent.clone(), |hooks| hooks.print.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, line),
            None => root_print(line),
        }
    }

    pub fn fork(&self, zone: &Zone, spec: ZoneSpecification, values: ZoneValues) -> Zone {
        match super::lookup(self.parent.clone(), |hooks| hooks.fork.clone()) {
            Some((delegate, hook)) => hook(&delegate, zone, spec, values),
            None => root_fork(zone, spec, values),
        }
    }
}

pub(crate) fn root_run(zone: &Zone, body: &mut dyn FnMut()) {
    let _guard = zone.enter();
    body();
}

pub(crate) fn root_schedule_microtask(zone: &Zone, task: Box<dyn FnOnce()>) {
    let task = zone.bind_once(task);
    context::enqueue_microtask(task);
}

pub(crate) fn root_create_timer(zone: &Zone, duration: Duration, callback: Box<dyn FnOnce()>) -> Timer {
    let callback = zone.bind_once(callback);
    Timer::one_shot(duration, callback)
}

pub(crate) fn root_create_periodic_timer(
    zone: &Zone,
    period: Duration,
    callback: Box<dyn FnMut(&Timer)>,
) -> Timer {
    let callback = zone.bind_periodic(callback);
    Timer::periodic(period, callback)
}

pub(crate) fn root_handle_uncaught_error(failure: Failure) {
    match context::uncaught_errors() {
        UncaughtErrorPolicy::Log => {
            error!(error = %failure.error, trace = %failure.trace, "uncaught asynchronous error");
        }
        UncaughtErrorPolicy::Panic => {
            panic!("uncaught asynchronous error: {}", failure.error);
        }
    }
}

pub(crate) fn root_print(line: &str) {
    trace!(line, "zone print");
    println!("{line}");
}

pub(crate) fn root_fork(zone: &Zone, spec: ZoneSpecification, values: ZoneValues) -> Zone {
    debug!(
        custom_error_zone = spec.handle_uncaught_error.is_some(),
        values = !values.is_empty(),
        "zone forked"
    );
    Zone::new_child(zone, spec, values)
}
