use stackup_types::{CompletionCondition, ProcessSpec, StackError, StackResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Validated set of processes with a deterministic topological order.
/// Ties are broken by declaration order.
#[derive(Clone, Debug)]
pub struct ProcessGraph {
    specs: Vec<ProcessSpec>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    dependents: Vec<Vec<usize>>,
}

impl ProcessGraph {
    pub fn new(specs: Vec<ProcessSpec>) -> StackResult<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(StackError::Graph(format!("Process #{} has an empty name", i + 1)));
            }
            if spec.command.trim().is_empty() {
                return Err(StackError::Graph(format!(
                    "Process '{}' has an empty command",
                    spec.name
                )));
            }
            if spec.readiness.as_ref().is_some_and(|r| r.poll_interval_ms == 0) {
                return Err(StackError::Graph(format!(
                    "Process '{}' has a readiness poll interval of 0 ms",
                    spec.name
                )));
            }
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(StackError::Graph(format!(
                    "Process '{}' is declared more than once",
                    spec.name
                )));
            }
        }

        let mut dependents = vec![Vec::new(); specs.len()];
        let mut in_degree = vec![0usize; specs.len()];

        for (i, spec) in specs.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &spec.depends_on {
                if dep.name == spec.name {
                    return Err(StackError::Graph(format!(
                        "Process '{}' depends on itself",
                        spec.name
                    )));
                }
                let target = *index.get(&dep.name).ok_or_else(|| {
                    StackError::Graph(format!(
                        "Process '{}' depends on unknown process '{}'",
                        spec.name, dep.name
                    ))
                })?;
                if dep.condition == CompletionCondition::ProcessHealthy
                    && specs[target].readiness.is_none()
                {
                    return Err(StackError::Graph(format!(
                        "Process '{}' waits for '{}' to be healthy, but '{}' has no readiness check",
                        spec.name, dep.name, dep.name
                    )));
                }
                if seen.insert(target) {
                    dependents[target].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(specs.len());

        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != specs.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| specs[i].name.as_str())
                .collect();
            stuck.sort_unstable();
            return Err(StackError::Graph(format!(
                "Dependency cycle among: {}",
                stuck.join(", ")
            )));
        }

        Ok(Self {
            specs,
            index,
            order,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, name: &str) -> Option<&ProcessSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    pub fn start_order(&self) -> impl Iterator<Item = &ProcessSpec> + '_ {
        self.order.iter().map(move |&i| &self.specs[i])
    }

    /// Every process that can only start after `name`, directly or not.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&root) = self.index.get(name) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            for &next in &self.dependents[i] {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }

        self.order
            .iter()
            .filter(|i| seen.contains(*i))
            .map(|&i| self.specs[i].name.as_str())
            .collect()
    }

    /// Restricts the graph to `names` plus everything they depend on.
    pub fn select(&self, names: &[String]) -> StackResult<Self> {
        let mut keep = HashSet::new();
        let mut stack = Vec::new();
        for name in names {
            let &i = self.index.get(name).ok_or_else(|| {
                StackError::Config(format!("Unknown process '{}'", name))
            })?;
            stack.push(i);
        }

        while let Some(i) = stack.pop() {
            if keep.insert(i) {
                for dep in &self.specs[i].depends_on {
                    if let Some(&d) = self.index.get(&dep.name) {
                        stack.push(d);
                    }
                }
            }
        }

        let specs = self
            .specs
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, spec)| spec.clone())
            .collect();
        Self::new(specs)
    }
}
