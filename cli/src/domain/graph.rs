//! Static dependency graphs between deployment units.
//!
//! Edges are declared when an orchestration is designed, never discovered at
//! runtime. Ordering is pure: `topological_order` takes the declaration in
//! and returns unit names out.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::error::ConfigurationError;
use crate::domain::outputs::BUCKET_ID_OUTPUT;

/// Container unit of the static site; its outputs carry the site URL.
pub const SITE_CONTAINER_UNIT: &str = "website";

/// Config key the cloud region is written under for every site unit.
pub const REGION_CONFIG_KEY: &str = "aws:region";

/// Static configuration for one unit in a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    /// Config values written on every acquisition (explicit overrides).
    pub config: BTreeMap<String, String>,
}

impl UnitSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// `downstream` consumes `upstream`'s output `output_key` as config `config_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDependencyEdge {
    pub upstream: String,
    pub downstream: String,
    pub output_key: String,
    pub config_key: String,
}

/// A project's units and the edges between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitGraph {
    pub project: String,
    pub units: Vec<UnitSpec>,
    pub edges: Vec<UnitDependencyEdge>,
}

impl UnitGraph {
    /// The two-unit static website chain: a `website` container unit whose
    /// `bucketID` output feeds the `bucket` config of the `content` unit.
    #[must_use]
    pub fn static_site(project: &str, region: &str) -> Self {
        Self {
            project: project.to_string(),
            units: vec![
                UnitSpec::new(SITE_CONTAINER_UNIT).with_config(REGION_CONFIG_KEY, region),
                UnitSpec::new("content").with_config(REGION_CONFIG_KEY, region),
            ],
            edges: vec![UnitDependencyEdge {
                upstream: SITE_CONTAINER_UNIT.into(),
                downstream: "content".into(),
                output_key: BUCKET_ID_OUTPUT.into(),
                config_key: "bucket".into(),
            }],
        }
    }

    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitSpec> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Edges whose downstream is `unit`, in declaration order.
    pub fn inbound<'a>(&'a self, unit: &'a str) -> impl Iterator<Item = &'a UnitDependencyEdge> {
        self.edges.iter().filter(move |e| e.downstream == unit)
    }

    /// Deploy order: every upstream before its downstreams. Units with no
    /// ordering constraint between them keep their declaration order.
    ///
    /// # Errors
    ///
    /// `UnknownUnit` if an edge names an undeclared unit, `DependencyCycle`
    /// if the edges do not form a DAG.
    pub fn topological_order(&self) -> Result<Vec<String>, ConfigurationError> {
        let declared: HashSet<&str> = self.units.iter().map(|u| u.name.as_str()).collect();
        for edge in &self.edges {
            for end in [&edge.upstream, &edge.downstream] {
                if !declared.contains(end.as_str()) {
                    return Err(ConfigurationError::UnknownUnit(end.clone()));
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> =
            self.units.iter().map(|u| (u.name.as_str(), 0)).collect();
        for edge in &self.edges {
            *in_degree.entry(edge.downstream.as_str()).or_default() += 1;
        }

        let mut order: Vec<String> = Vec::with_capacity(self.units.len());
        let mut placed: HashSet<&str> = HashSet::new();
        // Repeatedly take the first declared unit with no unplaced upstreams.
        while order.len() < self.units.len() {
            let Some(next) = self
                .units
                .iter()
                .map(|u| u.name.as_str())
                .find(|n| !placed.contains(n) && in_degree.get(n).copied() == Some(0))
            else {
                return Err(ConfigurationError::DependencyCycle(self.find_cycle(&placed)));
            };
            placed.insert(next);
            order.push(next.to_string());
            for edge in self.edges.iter().filter(|e| e.upstream == next) {
                if let Some(d) = in_degree.get_mut(edge.downstream.as_str()) {
                    *d = d.saturating_sub(1);
                }
            }
        }
        Ok(order)
    }

    /// Teardown order: exactly the reverse of [`Self::topological_order`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::topological_order`].
    pub fn teardown_order(&self) -> Result<Vec<String>, ConfigurationError> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Walk upstream links among unplaced units until a name repeats.
    fn find_cycle(&self, placed: &HashSet<&str>) -> Vec<String> {
        let Some(start) = self
            .units
            .iter()
            .map(|u| u.name.as_str())
            .find(|n| !placed.contains(n))
        else {
            return Vec::new();
        };
        let mut path: Vec<&str> = vec![start];
        let mut current = start;
        loop {
            let Some(up) = self
                .edges
                .iter()
                .find(|e| e.downstream == current && !placed.contains(e.upstream.as_str()))
                .map(|e| e.upstream.as_str())
            else {
                return path.into_iter().map(str::to_owned).collect();
            };
            if let Some(pos) = path.iter().position(|n| *n == up) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().rev().map(|n| (*n).to_string()).collect();
                cycle.insert(0, up.to_string());
                return cycle;
            }
            path.push(up);
            current = up;
        }
    }
}
