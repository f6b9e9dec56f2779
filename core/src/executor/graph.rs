use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::ExecutorError;

use super::types::{
    ExpansionRequirement, StateTransition, TaskDefinition, TaskInstance, TaskState,
    EXPANSION_SEPARATOR,
};

/// Task dependency graph (DAG)
///
/// Dependencies name *definitions*. Once a dynamic template is expanded, a
/// dependency on it is satisfied only when every instance produced from it has
/// completed. A dependency naming a definition absent from the graph is
/// vacuously satisfied.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Instances in declaration order; expansion splices in place.
    nodes: Vec<TaskInstance>,

    /// instance id -> position in `nodes`
    index: HashMap<String, usize>,

    /// definition name -> positions of its instances
    members: HashMap<String, Vec<usize>>,

    frozen: bool,
}

impl TaskGraph {
    /// Construct an unfrozen graph; dynamic templates stay as placeholders.
    pub fn from_definitions(definitions: Vec<TaskDefinition>) -> Result<Self, ExecutorError> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(definitions.len());

        for def in definitions {
            if def.name.trim().is_empty() || def.name.contains(EXPANSION_SEPARATOR) {
                return Err(ExecutorError::InvalidTaskName(def.name));
            }
            if !seen.insert(def.name.clone()) {
                return Err(ExecutorError::DuplicateTaskId(def.name));
            }
            nodes.push(TaskInstance::from_definition(Arc::new(def)));
        }

        let mut graph = Self {
            nodes,
            index: HashMap::new(),
            members: HashMap::new(),
            frozen: false,
        };
        graph.reindex();
        Ok(graph)
    }

    /// Construct and freeze in one step (templates fall back to one instance).
    pub fn build(definitions: Vec<TaskDefinition>) -> Result<Self, ExecutorError> {
        let mut graph = Self::from_definitions(definitions)?;
        graph.freeze()?;
        Ok(graph)
    }

    fn reindex(&mut self) {
        self.index.clear();
        self.members.clear();
        for (pos, node) in self.nodes.iter().enumerate() {
            self.index.insert(node.id.clone(), pos);
            self.members
                .entry(node.name().to_string())
                .or_default()
                .push(pos);
        }
    }

    /// Dynamic templates still waiting for expansion.
    pub fn templates(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.placeholder)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Replace a template with one instance per requirement.
    ///
    /// Returns the ids now standing for the template. An empty requirement
    /// list keeps the template itself as the single concrete instance.
    pub fn expand(
        &mut self,
        template: &str,
        requirements: Vec<ExpansionRequirement>,
    ) -> Result<Vec<String>, ExecutorError> {
        let pos = self.template_position(template)?;

        if requirements.is_empty() {
            self.nodes[pos].placeholder = false;
            self.nodes[pos].fallback = true;
            return Ok(vec![template.to_string()]);
        }

        let definition = self.nodes[pos].definition.clone();
        let mut used = HashSet::new();
        let expanded: Vec<TaskInstance> = requirements
            .into_iter()
            .enumerate()
            .map(|(i, req)| {
                let id = unique_instance_id(template, &req.id, i, &mut used);
                TaskInstance::expanded(definition.clone(), id, req)
            })
            .collect();
        let ids = expanded.iter().map(|t| t.id.clone()).collect();

        self.nodes.splice(pos..=pos, expanded);
        self.reindex();
        Ok(ids)
    }

    /// Keep a template as its own single instance (expansion fallback).
    pub fn keep_template(&mut self, template: &str) -> Result<(), ExecutorError> {
        self.expand(template, Vec::new()).map(|_| ())
    }

    fn template_position(&self, template: &str) -> Result<usize, ExecutorError> {
        if self.frozen {
            return Err(ExecutorError::GraphFrozen);
        }
        let pos = *self
            .index
            .get(template)
            .ok_or_else(|| ExecutorError::UnknownTask(template.to_string()))?;
        if !self.nodes[pos].placeholder {
            return Err(ExecutorError::NotATemplate(template.to_string()));
        }
        Ok(pos)
    }

    /// Check the dependency relation among present definitions is acyclic.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(ExecutorError::CircularDependency(cycle));
        }
        Ok(())
    }

    /// Finalize the graph. Unexpanded templates fall back to one instance.
    pub fn freeze(&mut self) -> Result<(), ExecutorError> {
        if self.frozen {
            return Ok(());
        }
        self.validate()?;
        for node in self.nodes.iter_mut().filter(|n| n.placeholder) {
            node.placeholder = false;
            node.fallback = true;
        }
        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TaskInstance> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All instances in declaration order.
    pub fn instances(&self) -> impl Iterator<Item = &TaskInstance> {
        self.nodes.iter()
    }

    /// Instances produced from one definition.
    pub fn members_of(&self, name: &str) -> Vec<&TaskInstance> {
        self.members
            .get(name)
            .map(|positions| positions.iter().map(|&p| &self.nodes[p]).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    fn dependency_satisfied(&self, dep: &str) -> bool {
        match self.members.get(dep) {
            None => true,
            Some(positions) => positions
                .iter()
                .all(|&p| self.nodes[p].state == TaskState::Completed),
        }
    }

    /// Pending tasks whose dependencies are all satisfied, ordered by
    /// descending priority then declaration order.
    pub fn ready_tasks(&self) -> Vec<String> {
        let mut ready: Vec<(usize, &TaskInstance)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                n.state == TaskState::Pending
                    && !n.placeholder
                    && n.dependencies().iter().all(|d| self.dependency_satisfied(d))
            })
            .collect();

        ready.sort_by(|(pa, a), (pb, b)| b.priority().cmp(&a.priority()).then(pa.cmp(pb)));
        ready.into_iter().map(|(_, n)| n.id.clone()).collect()
    }

    /// Pending tasks that can never run because an upstream instance failed,
    /// mapped to the failed instances responsible.
    pub fn blocked_tasks(&self) -> BTreeMap<String, Vec<String>> {
        let mut memo = HashMap::new();
        let mut blocked = BTreeMap::new();
        for (pos, node) in self.nodes.iter().enumerate() {
            if node.state != TaskState::Pending {
                continue;
            }
            let roots = self.failed_roots(pos, &mut memo);
            if !roots.is_empty() {
                blocked.insert(node.id.clone(), roots.into_iter().collect());
            }
        }
        blocked
    }

    fn failed_roots(
        &self,
        pos: usize,
        memo: &mut HashMap<usize, BTreeSet<String>>,
    ) -> BTreeSet<String> {
        if let Some(roots) = memo.get(&pos) {
            return roots.clone();
        }
        // Guards against re-entry on a graph that was never validated.
        memo.insert(pos, BTreeSet::new());

        let mut roots = BTreeSet::new();
        if self.nodes[pos].state == TaskState::Pending {
            for dep in self.nodes[pos].dependencies() {
                let Some(positions) = self.members.get(dep) else {
                    continue;
                };
                for &m in positions {
                    match self.nodes[m].state {
                        TaskState::Failed => {
                            roots.insert(self.nodes[m].id.clone());
                        }
                        TaskState::Pending => roots.extend(self.failed_roots(m, memo)),
                        _ => {}
                    }
                }
            }
        }

        memo.insert(pos, roots.clone());
        roots
    }

    /// Pending tasks that are neither ready nor blocked by a failure.
    pub fn stuck_tasks(&self) -> Vec<String> {
        let ready: HashSet<String> = self.ready_tasks().into_iter().collect();
        let blocked = self.blocked_tasks();
        self.nodes
            .iter()
            .filter(|n| n.state == TaskState::Pending)
            .filter(|n| !ready.contains(&n.id) && !blocked.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every task is terminal or blocked by a failed upstream task.
    pub fn is_settled(&self) -> bool {
        let blocked = self.blocked_tasks();
        self.nodes
            .iter()
            .all(|n| n.is_terminal() || blocked.contains_key(&n.id))
    }

    /// The single place task state changes; only the scheduler calls this.
    pub(crate) fn transition(
        &mut self,
        id: &str,
        to: TaskState,
    ) -> Result<&mut TaskInstance, ExecutorError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| ExecutorError::UnknownTask(id.to_string()))?;
        let node = &mut self.nodes[pos];
        if !StateTransition::is_valid(node.state, to) {
            return Err(ExecutorError::InvalidTransition {
                task: id.to_string(),
                from: node.state,
                to,
            });
        }
        node.state = to;
        Ok(node)
    }

    /// Definition names in declaration order.
    fn definition_order(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.name())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(&first) = self.members.get(name).and_then(|p| p.first()) else {
            return Vec::new();
        };
        self.nodes[first]
            .dependencies()
            .iter()
            .map(String::as_str)
            .filter(|dep| self.members.contains_key(*dep))
            .collect()
    }

    /// Detect circular dependencies using DFS
    ///
    /// # Time Complexity
    ///
    /// O(V + E) where V = number of definitions, E = number of dependencies
    fn detect_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in self.definition_order() {
            if !visited.contains(name) && self.dfs_cycle(name, &mut visited, &mut stack) {
                return Some(format_cycle_path(&stack));
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> bool {
        visited.insert(node.to_string());
        stack.push(node.to_string());

        for dep in self.dependencies_of(node) {
            // Check if dependency is in current path (cycle detected)
            if let Some(pos) = stack.iter().position(|x| x == dep) {
                stack.push(dep.to_string());
                *stack = stack[pos..].to_vec();
                return true;
            }

            if !visited.contains(dep) && self.dfs_cycle(dep, visited, stack) {
                return true;
            }
        }

        stack.pop();
        false
    }
}

fn format_cycle_path(stack: &[String]) -> String {
    stack.join(" -> ")
}

fn unique_instance_id(
    template: &str,
    discriminator: &str,
    position: usize,
    used: &mut HashSet<String>,
) -> String {
    let discriminator = discriminator.trim();
    let base = if discriminator.is_empty() {
        format!("{}{}{}", template, EXPANSION_SEPARATOR, position + 1)
    } else {
        format!("{}{}{}", template, EXPANSION_SEPARATOR, discriminator)
    };

    let mut id = base.clone();
    let mut n = 2;
    while !used.insert(id.clone()) {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    id
}
