//! In-process deployment engine.
//!
//! Backs `--engine memory` dry runs and every service test. Behaves like a
//! real stack backend where it matters to the orchestrators: names are unique
//! per project, removal requires a prior destroy, and a unit with an
//! operation in flight rejects a second one with `ConcurrentModification`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use vmgr_common::{DeploymentUnit, NETWORK_UNIT, OutputMap, OutputValue, UNIT_PREFIX, UnitSummary};

use crate::application::ports::{UnitCatalog, UnitLifecycle};
use crate::domain::error::{EngineError, Step};
use crate::domain::graph::REGION_CONFIG_KEY;
use crate::domain::outputs::{
    BUCKET_ID_OUTPUT, IP_OUTPUT, RESOURCE_GROUP_OUTPUT, SUBNET_OUTPUT, WEBSITE_URL_OUTPUT,
};

type Key = (String, String);

fn key(unit: &DeploymentUnit) -> Key {
    (unit.project.clone(), unit.name.clone())
}

/// One engine call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub step: Step,
    pub unit: String,
}

#[derive(Debug, Clone, Default)]
struct StoredUnit {
    config: BTreeMap<String, String>,
    outputs: OutputMap,
    last_update: Option<DateTime<Utc>>,
    /// Resources exist; cleared by destroy.
    deployed: bool,
}

struct FailureRule {
    step: Step,
    unit: String,
    error: EngineError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    units: BTreeMap<Key, StoredUnit>,
    in_flight: HashSet<Key>,
    calls: Vec<EngineCall>,
    failures: Vec<FailureRule>,
}

/// Thread-safe in-memory engine. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<State>>,
    apply_delay: Duration,
}

/// Releases the in-flight marker when an operation ends, even on cancellation.
struct InFlight {
    state: Arc<Mutex<State>>,
    key: Key,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.in_flight.remove(&self.key);
    }
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every apply take `delay`, so concurrent operations overlap.
    #[must_use]
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a unit as if it had been applied at `last_update`.
    pub fn insert_unit(
        &self,
        project: &str,
        name: &str,
        last_update: Option<DateTime<Utc>>,
        outputs: OutputMap,
    ) {
        self.lock().units.insert(
            (project.to_string(), name.to_string()),
            StoredUnit {
                config: BTreeMap::new(),
                deployed: last_update.is_some(),
                outputs,
                last_update,
            },
        );
    }

    /// Fail the next `times` calls of `step` on `unit` with `error`.
    pub fn fail_times(&self, step: Step, unit: &str, error: EngineError, times: u32) {
        self.lock().failures.push(FailureRule {
            step,
            unit: unit.to_string(),
            error,
            remaining: Some(times),
        });
    }

    /// Fail every call of `step` on `unit` with `error`.
    pub fn fail_always(&self, step: Step, unit: &str, error: EngineError) {
        self.lock().failures.push(FailureRule {
            step,
            unit: unit.to_string(),
            error,
            remaining: None,
        });
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Calls of one step, as unit names in order.
    #[must_use]
    pub fn calls_of(&self, step: Step) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.step == step)
            .map(|c| c.unit.clone())
            .collect()
    }

    /// Current configuration of a unit.
    #[must_use]
    pub fn config_of(&self, project: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock()
            .units
            .get(&(project.to_string(), name.to_string()))
            .map(|u| u.config.clone())
    }

    /// Record the call and return an injected failure, if one matches.
    fn enter(&self, step: Step, unit: &DeploymentUnit) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall {
            step,
            unit: unit.name.clone(),
        });
        let Some(pos) = state
            .failures
            .iter()
            .position(|f| f.step == step && f.unit == unit.name)
        else {
            return Ok(());
        };
        let rule = &mut state.failures[pos];
        let error = rule.error.clone();
        let exhausted = match rule.remaining.as_mut() {
            Some(n) if *n <= 1 => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        };
        if exhausted {
            state.failures.remove(pos);
        }
        Err(error)
    }

    /// Mark the unit busy for the lifetime of the returned guard.
    fn begin(&self, unit: &DeploymentUnit) -> Result<InFlight, EngineError> {
        let mut state = self.lock();
        let key = key(unit);
        if !state.units.contains_key(&key) {
            return Err(EngineError::NotFound {
                unit: unit.name.clone(),
            });
        }
        if !state.in_flight.insert(key.clone()) {
            return Err(EngineError::ConcurrentModification {
                unit: unit.name.clone(),
            });
        }
        Ok(InFlight {
            state: Arc::clone(&self.state),
            key,
        })
    }

    fn with_unit<T>(
        &self,
        unit: &DeploymentUnit,
        f: impl FnOnce(&mut StoredUnit) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut state = self.lock();
        let stored = state
            .units
            .get_mut(&key(unit))
            .ok_or_else(|| EngineError::NotFound {
                unit: unit.name.clone(),
            })?;
        f(stored)
    }
}

/// What the in-process programs produce for each kind of unit.
fn program_outputs(unit: &DeploymentUnit, config: &BTreeMap<String, String>) -> OutputMap {
    let mut out = OutputMap::new();
    let name = unit.name.as_str();
    if name == NETWORK_UNIT {
        let rg = format!("rg-{}", unit.project);
        out.insert(
            SUBNET_OUTPUT.into(),
            OutputValue::plain(format!("/resourceGroups/{rg}/subnets/default")),
        );
        out.insert(RESOURCE_GROUP_OUTPUT.into(), OutputValue::plain(rg));
    } else if name == "website" {
        let bucket = format!("{}-website-bucket", unit.project);
        let region = config
            .get(REGION_CONFIG_KEY)
            .map_or("us-east-1", String::as_str);
        out.insert(
            WEBSITE_URL_OUTPUT.into(),
            OutputValue::plain(format!("http://{bucket}.s3-website-{region}.amazonaws.com")),
        );
        out.insert(BUCKET_ID_OUTPUT.into(), OutputValue::plain(bucket));
    } else if name == "content" {
        // Reads its bucket from config; "unset" exposes an apply that ran
        // before the upstream output was wired in.
        let bucket = config.get("bucket").map_or("unset", String::as_str);
        out.insert("bucket".into(), OutputValue::plain(bucket));
        out.insert(
            "objectKey".into(),
            OutputValue::plain(format!("{bucket}/index.html")),
        );
    } else if name.starts_with(UNIT_PREFIX) {
        let octet = name.bytes().fold(0u32, |acc, b| (acc + u32::from(b)) % 250) + 1;
        out.insert(IP_OUTPUT.into(), OutputValue::plain(format!("10.0.0.{octet}")));
        out.insert(
            "adminPassword".into(),
            OutputValue::secret(format!("pw-{name}")),
        );
    } else {
        for (k, v) in config {
            out.insert(k.clone(), OutputValue::plain(v.clone()));
        }
    }
    out
}

impl UnitLifecycle for MemoryEngine {
    async fn create(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.enter(Step::Create, unit)?;
        let mut state = self.lock();
        let key = key(unit);
        if state.units.contains_key(&key) {
            return Err(EngineError::AlreadyExists {
                unit: unit.name.clone(),
            });
        }
        state.units.insert(key, StoredUnit::default());
        Ok(())
    }

    async fn select(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.enter(Step::Select, unit)?;
        self.with_unit(unit, |_| Ok(()))
    }

    async fn set_config(
        &self,
        unit: &DeploymentUnit,
        key: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        self.enter(Step::Config, unit)?;
        self.with_unit(unit, |u| {
            u.config.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn refresh(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.enter(Step::Refresh, unit)?;
        let _guard = self.begin(unit)?;
        Ok(())
    }

    async fn apply(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        self.enter(Step::Apply, unit)?;
        let _guard = self.begin(unit)?;
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        self.with_unit(unit, |u| {
            u.outputs = program_outputs(unit, &u.config);
            u.last_update = Some(Utc::now());
            u.deployed = true;
            Ok(u.outputs.clone())
        })
    }

    async fn outputs(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        self.enter(Step::Outputs, unit)?;
        self.with_unit(unit, |u| Ok(u.outputs.clone()))
    }

    async fn destroy(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.enter(Step::Destroy, unit)?;
        let _guard = self.begin(unit)?;
        self.with_unit(unit, |u| {
            u.outputs.clear();
            u.deployed = false;
            u.last_update = Some(Utc::now());
            Ok(())
        })
    }

    async fn remove(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.enter(Step::Remove, unit)?;
        let guard = self.begin(unit)?;
        let deployed = self.with_unit(unit, |u| Ok(u.deployed))?;
        if deployed {
            return Err(EngineError::Operation {
                unit: unit.name.clone(),
                op: Step::Remove,
                message: "unit still has resources; destroy it first".into(),
            });
        }
        drop(guard);
        self.lock().units.remove(&key(unit));
        Ok(())
    }
}

impl UnitCatalog for MemoryEngine {
    async fn list(&self, project: &str) -> Result<Vec<UnitSummary>, EngineError> {
        let scope = DeploymentUnit::new(project, project);
        self.enter(Step::List, &scope)?;
        Ok(self
            .lock()
            .units
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|((_, name), u)| UnitSummary {
                name: name.clone(),
                last_update: u.last_update,
            })
            .collect())
    }
}
