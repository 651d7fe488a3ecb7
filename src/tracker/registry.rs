use crate::runtime::config::NodeConfig;
use crate::tracker::{BalanceTracker, CurrentVariablesTracker, GasTracker, Tracker};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

pub type TrackerConstructor = Box<dyn Fn(&NodeConfig) -> Result<Box<dyn Tracker>> + Send + Sync>;

/// Trackers built for one scheduler, plus the configured names that were
/// left out.
pub struct BuiltTrackers {
    pub trackers: Vec<Box<dyn Tracker>>,
    pub unknown: Vec<String>,
    /// Known names whose constructor failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Maps configured tracker names to constructors.
pub struct TrackerRegistry {
    constructors: BTreeMap<String, TrackerConstructor>,
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TrackerRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry knowing `gas`, `balance` and `current_variables`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("gas", |config| {
            Ok(Box::new(GasTracker::new(config.gas_feed_url())) as Box<dyn Tracker>)
        });
        registry.register("balance", |config| {
            let address = config
                .public_address()
                .context("balance tracker needs a public address")?;
            Ok(Box::new(BalanceTracker::new(address)?) as Box<dyn Tracker>)
        });
        registry.register("current_variables", |_| {
            Ok(Box::new(CurrentVariablesTracker) as Box<dyn Tracker>)
        });
        registry
    }

    /// Adds or replaces the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&NodeConfig) -> Result<Box<dyn Tracker>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiates `config.trackers()` in order. Unknown names and failing
    /// constructors are each reported in a single warning and omitted; the
    /// remaining trackers are still built.
    pub fn build(&self, config: &NodeConfig) -> BuiltTrackers {
        let mut trackers = Vec::with_capacity(config.trackers().len());
        let mut unknown = Vec::new();
        let mut failed = Vec::new();

        for name in config.trackers() {
            match self.constructors.get(name) {
                Some(constructor) => match constructor(config) {
                    Ok(tracker) => trackers.push(tracker),
                    Err(err) => failed.push((name.clone(), format!("{err:#}"))),
                },
                None => unknown.push(name.clone()),
            }
        }

        if !unknown.is_empty() {
            tracing::warn!(
                unknown = ?unknown,
                known = ?self.constructors.keys().collect::<Vec<_>>(),
                "ignoring unknown trackers"
            );
        }
        if !failed.is_empty() {
            tracing::warn!(failed = ?failed, "ignoring trackers that could not be created");
        }

        BuiltTrackers {
            trackers,
            unknown,
            failed,
        }
    }
}
