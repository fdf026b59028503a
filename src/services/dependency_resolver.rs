//! Dependency resolution over a workflow's TodoList.
//!
//! Cycle detection, topological ordering, and ready-set computation. The
//! orchestrator rejects any list whose dependencies do not form a DAG.

use std::collections::{HashMap, HashSet};

use crate::domain::models::{TaskStatus, TodoItem};
use crate::domain::ports::WorkflowError;

/// Service for resolving task dependencies and detecting cycles.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone DFS helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: &str,
    graph: &HashMap<&str, Vec<&str>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                // Cycle found: trim the path to the cycle and close it
                if let Some(start) = path.iter().position(|id| id == neighbor) {
                    path.drain(0..start);
                    path.push(neighbor.to_string());
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Detect a circular dependency among the items, returning the cycle
    /// path when one exists.
    pub fn detect_cycle(&self, items: &[TodoItem]) -> Option<Vec<String>> {
        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        for item in items {
            graph
                .entry(item.id.as_str())
                .or_default()
                .extend(item.dependencies.iter().map(String::as_str));
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        let mut roots: Vec<&str> = graph.keys().copied().collect();
        roots.sort_unstable();
        for node in roots {
            if !visited.contains(node)
                && detect_cycle_util(node, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// Validate the full DAG: list-local invariants plus acyclicity.
    pub fn validate(&self, items: &[TodoItem]) -> Result<(), WorkflowError> {
        if let Some(cycle) = self.detect_cycle(items) {
            return Err(WorkflowError::CyclicDependency(cycle));
        }
        Ok(())
    }

    /// Topologically sort items (dependencies before dependents) using
    /// Kahn's algorithm. Ties break by (priority, id) so ordering is stable.
    pub fn topological_sort(&self, items: &[TodoItem]) -> Result<Vec<TodoItem>, WorkflowError> {
        if let Some(cycle) = self.detect_cycle(items) {
            return Err(WorkflowError::CyclicDependency(cycle));
        }

        let item_map: HashMap<&str, &TodoItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for item in items {
            in_degree.entry(item.id.as_str()).or_insert(0);
            for dep in &item.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(item.id.as_str());
                *in_degree.entry(item.id.as_str()).or_insert(0) += 1;
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut sorted = Vec::with_capacity(items.len());

        while !ready.is_empty() {
            // Lower priority first, then id, for a deterministic order
            ready.sort_by(|a, b| {
                let pa = item_map.get(a).map_or(0, |i| i.priority);
                let pb = item_map.get(b).map_or(0, |i| i.priority);
                pa.cmp(&pb).then_with(|| a.cmp(b))
            });
            let id = ready.remove(0);
            if let Some(item) = item_map.get(id) {
                sorted.push((*item).clone());
            }
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    let degree = in_degree.get_mut(child).expect("child in degree map");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(child);
                    }
                }
            }
        }

        Ok(sorted)
    }

    /// Tasks ready to dispatch: `pending` with every dependency `completed`,
    /// ordered by (priority, id).
    pub fn ready_items<'a>(
        &self,
        items: &'a [TodoItem],
        status_of: &HashMap<String, TaskStatus>,
    ) -> Vec<&'a TodoItem> {
        let mut ready: Vec<&TodoItem> = items
            .iter()
            .filter(|item| {
                status_of.get(&item.id).copied().unwrap_or_default() == TaskStatus::Pending
                    && item.dependencies.iter().all(|dep| {
                        status_of.get(dep).copied().unwrap_or_default() == TaskStatus::Completed
                    })
            })
            .collect();
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        ready
    }

    /// Pending tasks that can never run because a dependency is failed or
    /// skipped. These are marked `skipped`.
    pub fn blocked_items<'a>(
        &self,
        items: &'a [TodoItem],
        status_of: &HashMap<String, TaskStatus>,
    ) -> Vec<&'a TodoItem> {
        items
            .iter()
            .filter(|item| {
                status_of.get(&item.id).copied().unwrap_or_default() == TaskStatus::Pending
                    && item.dependencies.iter().any(|dep| {
                        matches!(
                            status_of.get(dep).copied().unwrap_or_default(),
                            TaskStatus::Failed | TaskStatus::Skipped
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentRole;

    fn item(id: &str, deps: &[&str]) -> TodoItem {
        let mut item = TodoItem::new(id, format!("task {id}"), AgentRole::Coder);
        for dep in deps {
            item = item.with_dependency(*dep);
        }
        item
    }

    #[test]
    fn test_no_cycle_in_linear_chain() {
        let resolver = DependencyResolver::new();
        let items = vec![item("t1", &[]), item("t2", &["t1"]), item("t3", &["t2"])];
        assert!(resolver.detect_cycle(&items).is_none());
        assert!(resolver.validate(&items).is_ok());
    }

    #[test]
    fn test_detects_two_node_cycle() {
        let resolver = DependencyResolver::new();
        let items = vec![item("t1", &["t2"]), item("t2", &["t1"])];
        let cycle = resolver.detect_cycle(&items).unwrap();
        assert!(cycle.len() >= 2);
        assert!(matches!(
            resolver.validate(&items),
            Err(WorkflowError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_detects_self_cycle_through_longer_path() {
        let resolver = DependencyResolver::new();
        let items = vec![
            item("t1", &["t3"]),
            item("t2", &["t1"]),
            item("t3", &["t2"]),
        ];
        assert!(resolver.detect_cycle(&items).is_some());
    }

    #[test]
    fn test_topological_sort_dependencies_first() {
        let resolver = DependencyResolver::new();
        let items = vec![item("t3", &["t1", "t2"]), item("t2", &["t1"]), item("t1", &[])];
        let sorted = resolver.topological_sort(&items).unwrap();
        let ids: Vec<&str> = sorted.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_topological_sort_priority_tiebreak() {
        let resolver = DependencyResolver::new();
        let mut a = item("a", &[]);
        a.priority = 5;
        let mut b = item("b", &[]);
        b.priority = 1;
        let sorted = resolver.topological_sort(&[a, b]).unwrap();
        let ids: Vec<&str> = sorted.iter().map(|i| i.id.as_str()).collect();
        // Lower priority value runs earlier
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_ready_items_requires_completed_deps() {
        let resolver = DependencyResolver::new();
        let items = vec![item("t1", &[]), item("t2", &["t1"])];

        let mut statuses = HashMap::new();
        statuses.insert("t1".to_string(), TaskStatus::Pending);
        statuses.insert("t2".to_string(), TaskStatus::Pending);
        let ready = resolver.ready_items(&items, &statuses);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "t1");

        statuses.insert("t1".to_string(), TaskStatus::Completed);
        let ready = resolver.ready_items(&items, &statuses);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "t2");
    }

    #[test]
    fn test_blocked_items_after_dependency_failure() {
        let resolver = DependencyResolver::new();
        let items = vec![item("t1", &[]), item("t2", &["t1"]), item("t3", &["t2"])];

        let mut statuses = HashMap::new();
        statuses.insert("t1".to_string(), TaskStatus::Failed);
        statuses.insert("t2".to_string(), TaskStatus::Pending);
        statuses.insert("t3".to_string(), TaskStatus::Pending);

        let blocked = resolver.blocked_items(&items, &statuses);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, "t2");

        // Once t2 is skipped, t3 becomes blocked too
        statuses.insert("t2".to_string(), TaskStatus::Skipped);
        let blocked = resolver.blocked_items(&items, &statuses);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, "t3");
    }
}
