//! Retry lists
//!
//! Both lists use remove-before-retry: an entry leaves the list before its
//! retry starts and only comes back if the retry blocks again. A nested
//! reconcile (triggered by a load inside the loop) therefore never retries
//! the same plugin twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::Registry;
use crate::plugin::Plugin;

/// Upper bound on unmet-requirement passes per reconcile
pub const MAX_RECONCILE_PASSES: usize = 32;

/// Which retry list to work through
#[derive(Debug, Clone, Copy)]
enum Stuck {
    NoLoader,
    Unmet,
}

impl Registry {
    /// Retry plugins waiting on requirements until no pass makes progress
    pub(crate) async fn reconcile_unmet_requirements(&self) {
        for pass in 1..=MAX_RECONCILE_PASSES {
            let before = self.stuck_len(Stuck::Unmet);
            if before == 0 {
                return;
            }

            self.retry(Stuck::Unmet, |_| true).await;

            let after = self.stuck_len(Stuck::Unmet);
            if after >= before {
                self.report_unresolved();
                return;
            }
            tracing::debug!(pass, before, after, "reconcile pass made progress");
        }

        tracing::warn!(
            passes = MAX_RECONCILE_PASSES,
            "reconcile pass limit reached"
        );
        self.report_unresolved();
    }

    /// Retry plugins whose type now has a loader
    pub(crate) async fn reconcile_no_loader(&self) {
        let types: HashSet<String> = self.loader_types().into_iter().collect();
        self.retry(Stuck::NoLoader, |plugin| types.contains(plugin.plugin_type()))
            .await;
    }

    async fn retry(&self, list: Stuck, eligible: impl Fn(&Plugin) -> bool + Send) {
        let snapshot: Vec<Arc<Plugin>> = self
            .stuck(list)
            .into_iter()
            .filter(|plugin| eligible(plugin.as_ref()))
            .collect();

        for plugin in snapshot {
            if self.take_stuck(list, &plugin) {
                self.attempt_load(plugin).await;
            }
        }
    }

    fn stuck(&self, list: Stuck) -> Vec<Arc<Plugin>> {
        let state = self.lock();
        match list {
            Stuck::NoLoader => state.no_loader.clone(),
            Stuck::Unmet => state.unmet.clone(),
        }
    }

    fn stuck_len(&self, list: Stuck) -> usize {
        let state = self.lock();
        match list {
            Stuck::NoLoader => state.no_loader.len(),
            Stuck::Unmet => state.unmet.len(),
        }
    }

    /// Remove a plugin from a list, returning false if someone else already did
    fn take_stuck(&self, list: Stuck, plugin: &Arc<Plugin>) -> bool {
        let mut state = self.lock();
        let entries = match list {
            Stuck::NoLoader => &mut state.no_loader,
            Stuck::Unmet => &mut state.unmet,
        };
        match entries.iter().position(|p| Arc::ptr_eq(p, plugin)) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn report_unresolved(&self) {
        let graph: HashMap<String, Vec<String>> = self
            .stuck(Stuck::Unmet)
            .iter()
            .map(|p| (p.name().to_string(), p.requires()))
            .collect();
        if graph.is_empty() {
            return;
        }

        let mut names: Vec<&String> = graph.keys().collect();
        names.sort();
        tracing::debug!(plugins = ?names, "plugins waiting on requirements");

        if let Some(cycle) = find_cycle(&graph) {
            tracing::warn!(cycle = %cycle.join(" -> "), "plugins require each other");
        }
    }
}

/// First requirement cycle among stuck plugins, as a closed path
pub(crate) fn find_cycle(graph: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    fn visit(
        node: &str,
        graph: &HashMap<String, Vec<String>>,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }

        path.push(node.to_string());
        for next in graph.get(node).into_iter().flatten() {
            if graph.contains_key(next)
                && let Some(cycle) = visit(next, graph, path, done)
            {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node.to_string());
        None
    }

    let mut roots: Vec<&String> = graph.keys().collect();
    roots.sort();

    let mut done = HashSet::new();
    roots
        .into_iter()
        .find_map(|root| visit(root, graph, &mut Vec::new(), &mut done))
}
