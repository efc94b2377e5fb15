//! Dependency graph over a `DerivedRolesPolicy`'s definitions.
//!
//! Edges run from a derived role to the other derived roles among its own
//! `parentRoles` (base roles supplied by the caller are not nodes in this
//! graph — they carry no further dependency). Kahn's algorithm yields an
//! evaluation order in which a derived role's dependencies always precede it;
//! a non-empty remainder after the queue drains means a cycle, which is then
//! localized with DFS for a readable error message.

use crate::policy::types::DerivedRoleDef;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("circular dependency detected: {0}")]
    CircularDependency(String),
    #[error("duplicate derived role name: {0}")]
    DuplicateRole(String),
}

#[derive(Debug, Clone)]
struct GraphNode {
    dependencies: Vec<String>,
}

/// Topologically sort `definitions` so dependencies precede dependents.
/// Returns the role names in evaluation order.
pub fn resolve_order(definitions: &[DerivedRoleDef]) -> Result<Vec<String>, GraphError> {
    let names: HashSet<String> = definitions.iter().map(|d| d.name.clone()).collect();

    let mut nodes: HashMap<String, GraphNode> = HashMap::new();
    for def in definitions {
        if nodes.contains_key(&def.name) {
            return Err(GraphError::DuplicateRole(def.name.clone()));
        }
        let deps: Vec<String> = def
            .parent_roles
            .iter()
            .filter(|p| names.contains(*p) && **p != def.name)
            .cloned()
            .collect();
        nodes.insert(def.name.clone(), GraphNode { dependencies: deps });
    }

    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut reverse_edges: HashMap<String, Vec<String>> =
        nodes.keys().map(|n| (n.clone(), Vec::new())).collect();
    let mut in_degree: HashMap<String, usize> = nodes.keys().map(|n| (n.clone(), 0)).collect();

    for (name, node) in &nodes {
        for dep in &node.dependencies {
            reverse_edges.get_mut(dep).unwrap().push(name.clone());
            *in_degree.get_mut(name).unwrap() += 1;
        }
    }

    let mut queue: VecDeque<String> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    // Deterministic order for equal in-degree nodes.
    let mut queue: Vec<String> = queue.drain(..).collect();
    queue.sort();
    let mut queue: VecDeque<String> = queue.into();

    let mut sorted = Vec::new();
    while let Some(current) = queue.pop_front() {
        sorted.push(current.clone());
        if let Some(dependents) = reverse_edges.get(&current) {
            let mut newly_ready = Vec::new();
            for dependent in dependents {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent.clone());
                }
            }
            newly_ready.sort();
            for n in newly_ready {
                queue.push_back(n);
            }
        }
    }

    if sorted.len() != nodes.len() {
        let cycle = find_cycle(&nodes);
        return Err(GraphError::CircularDependency(cycle.join(" -> ")));
    }

    Ok(sorted)
}

fn find_cycle(nodes: &HashMap<String, GraphNode>) -> Vec<String> {
    let mut state: HashMap<&str, u8> = nodes.keys().map(|n| (n.as_str(), 0)).collect();
    let mut path: Vec<String> = Vec::new();

    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();

    for start in names {
        if state[start.as_str()] == 0 {
            if let Some(cycle) = dfs(start, nodes, &mut state, &mut path) {
                return cycle;
            }
        }
    }
    vec!["unknown cycle".to_string()]
}

fn dfs<'a>(
    node: &'a str,
    nodes: &'a HashMap<String, GraphNode>,
    state: &mut HashMap<&'a str, u8>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    match state.get(node) {
        Some(1) => {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        Some(2) => return None,
        _ => {}
    }
    state.insert(node, 1);
    path.push(node.to_string());

    if let Some(graph_node) = nodes.get(node) {
        for dep in &graph_node.dependencies {
            if let Some(cycle) = dfs(dep.as_str(), nodes, state, path) {
                return Some(cycle);
            }
        }
    }

    state.insert(node, 2);
    path.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, parents: &[&str]) -> DerivedRoleDef {
        DerivedRoleDef {
            name: name.to_string(),
            parent_roles: parents.iter().map(|s| s.to_string()).collect(),
            condition: None,
        }
    }

    #[test]
    fn empty_graph_resolves_to_empty_order() {
        assert_eq!(resolve_order(&[]).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn single_role_with_base_parent_resolves() {
        let defs = vec![def("manager", &["employee"])];
        assert_eq!(resolve_order(&defs).unwrap(), vec!["manager"]);
    }

    #[test]
    fn linear_dependency_respects_order() {
        let defs = vec![def("senior_manager", &["manager"]), def("manager", &["employee"])];
        let order = resolve_order(&defs).unwrap();
        let m = order.iter().position(|r| r == "manager").unwrap();
        let s = order.iter().position(|r| r == "senior_manager").unwrap();
        assert!(m < s);
    }

    #[test]
    fn diamond_dependency_orders_both_branches_first() {
        let defs = vec![
            def("tech_lead", &["manager", "developer"]),
            def("manager", &["employee"]),
            def("developer", &["contributor"]),
        ];
        let order = resolve_order(&defs).unwrap();
        let m = order.iter().position(|r| r == "manager").unwrap();
        let d = order.iter().position(|r| r == "developer").unwrap();
        let t = order.iter().position(|r| r == "tech_lead").unwrap();
        assert!(m < t);
        assert!(d < t);
    }

    #[test]
    fn two_role_cycle_is_rejected() {
        let defs = vec![def("role_a", &["role_b"]), def("role_b", &["role_a"])];
        let err = resolve_order(&defs).unwrap_err();
        match err {
            GraphError::CircularDependency(msg) => {
                assert!(msg.contains("role_a") && msg.contains("role_b"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn multi_role_cycle_is_rejected() {
        let defs = vec![
            def("role_a", &["role_b"]),
            def("role_b", &["role_c"]),
            def("role_c", &["role_a"]),
        ];
        assert!(resolve_order(&defs).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let defs = vec![def("manager", &["employee"]), def("manager", &["contributor"])];
        assert!(matches!(resolve_order(&defs), Err(GraphError::DuplicateRole(_))));
    }

    #[test]
    fn complex_hierarchy_resolves_consistently() {
        let defs = vec![
            def("verified_user", &["base_user"]),
            def("premium_user", &["verified_user"]),
            def("contributor", &["base_user"]),
            def("maintainer", &["contributor"]),
            def("admin", &["maintainer"]),
        ];
        let order = resolve_order(&defs).unwrap();
        let idx = |n: &str| order.iter().position(|r| r == n).unwrap();
        assert!(idx("verified_user") < idx("premium_user"));
        assert!(idx("contributor") < idx("maintainer"));
        assert!(idx("maintainer") < idx("admin"));
    }
}
