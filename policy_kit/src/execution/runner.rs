//! Control execution.
//!
//! Controls run strictly in declaration order on a single thread. A test
//! block's resource is instantiated once and shared by all of its
//! assertions. Per-assertion errors and panics become `error` results;
//! only connection faults abort the run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::assertion::{evaluate, Subject};
use super::selection::ControlSelector;
use crate::error::{AssertionError, AuditError};
use crate::filter_table::Condition;
use crate::profile::{Control, Profile, TestBlock};
use crate::resources::registry::panic_message;
use crate::resources::{ResourceInstance, ResourceRegistry, ResourceStatus};
use crate::results::{ControlResult, ProfileResult, TestResult, TestStatus};
use crate::transport::Connection;
use crate::value::Value;
use crate::{log_debug, log_info, log_warn};

pub struct ControlRunner<'a> {
    registry: &'a ResourceRegistry,
    conn: &'a Arc<Connection>,
    selector: &'a ControlSelector,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> ControlRunner<'a> {
    pub fn new(registry: &'a ResourceRegistry, conn: &'a Arc<Connection>, selector: &'a ControlSelector) -> Self {
        Self {
            registry,
            conn,
            selector,
            cancel: None,
        }
    }

    /// Stop before the next control once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Run the selected controls of `profile`
    ///
    /// `overrides` replace the profile's input defaults.
    pub fn run_profile(
        &self,
        profile: &Profile,
        overrides: &BTreeMap<String, Value>,
        parent: Option<&str>,
    ) -> Result<ProfileResult, AuditError> {
        let mut inputs = profile.inputs.clone();
        inputs.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut result = ProfileResult::new(profile, parent);
        for control in profile.controls.iter().filter(|c| self.selector.matches(&c.id)) {
            if self.cancelled() {
                log_warn!("Run cancelled", "profile" => profile.label(), "next_control" => &control.id);
                return Err(AuditError::Cancelled {
                    next_control: control.id.clone(),
                });
            }
            result.controls.push(self.run_control(control, &inputs)?);
        }

        log_info!("Profile executed",
            "profile" => profile.label(),
            "controls" => result.controls.len(),
            "target" => self.conn.target()
        );
        Ok(result)
    }

    pub fn run_control(&self, control: &Control, inputs: &BTreeMap<String, Value>) -> Result<ControlResult, AuditError> {
        let mut results = Vec::new();
        for test in &control.tests {
            self.run_test(test, inputs, &mut results)?;
        }
        let result = ControlResult::new(control, results);
        log_debug!("Control executed", "control" => &control.id, "status" => result.status);
        Ok(result)
    }

    fn run_test(
        &self,
        test: &TestBlock,
        inputs: &BTreeMap<String, Value>,
        results: &mut Vec<TestResult>,
    ) -> Result<(), AuditError> {
        let instance = self.registry.instantiate(&test.resource, &test.params, self.conn)?;
        let subject = test
            .title
            .clone()
            .unwrap_or_else(|| subject_description(&instance, &test.conditions));

        for assertion in &test.assertions {
            let code_desc = format!("{} {}", subject, assertion.describe());
            let base = |status| TestResult::new(status, code_desc.clone(), &test.resource, &test.location);

            let result = match instance.status() {
                ResourceStatus::Skipped(reason) => base(TestStatus::Skipped).with_message(reason.clone()),
                ResourceStatus::Failed(error) => base(TestStatus::Error)
                    .with_message(format!("resource '{}' could not be constructed: {}", test.resource, error)),
                ResourceStatus::Active => {
                    let started = Instant::now();
                    let evaluated = catch_unwind(AssertUnwindSafe(|| {
                        let subject = Subject::new(&instance, &test.conditions)?;
                        evaluate(&subject, assertion, inputs)
                    }))
                    .unwrap_or_else(|panic| Err(AssertionError::Panic(panic_message(panic.as_ref()))));

                    let result = match evaluated {
                        Ok(outcome) if outcome.passed => base(TestStatus::Passed),
                        Ok(outcome) => {
                            let failed = base(TestStatus::Failed);
                            match outcome.message {
                                Some(message) => failed.with_message(message),
                                None => failed,
                            }
                        }
                        Err(AssertionError::Connection(e)) => return Err(e.into()),
                        Err(e) => {
                            log_warn!("Assertion raised an error", "test" => &code_desc, "error" => &e);
                            base(TestStatus::Error).with_message(e.to_string())
                        }
                    };
                    result.with_run_time(started.elapsed())
                }
            };
            results.push(result);
        }
        Ok(())
    }
}

fn subject_description(instance: &ResourceInstance, conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return instance.describe();
    }
    let clauses: Vec<String> = conditions.iter().map(Condition::to_string).collect();
    format!("{} where {}", instance.describe(), clauses.join(" and "))
}
