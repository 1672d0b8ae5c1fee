use std::collections::{HashMap, HashSet, VecDeque};

use vigil_types::{Result, VigilError};

use crate::model::{Edge, Plan, END, START};

/// Adjacency view over a plan's edges, built once per plan.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    node_ids: Vec<String>,
    known: HashSet<String>,
    edges: Vec<Edge>,
    /// Maps node_id to a range (start, count) into the sorted `edges` vec.
    /// Edges are stable-sorted by `from` so each node's outgoing edges are
    /// contiguous and keep their declaration order.
    adjacency: HashMap<String, (usize, usize)>,
    incoming: HashMap<String, usize>,
}

impl PlanGraph {
    pub fn build(plan: &Plan) -> Self {
        Self::new(plan.nodes.iter().map(|n| n.id.clone()), &plan.edges)
    }

    pub fn new(node_ids: impl IntoIterator<Item = String>, edges: &[Edge]) -> Self {
        let node_ids: Vec<String> = node_ids.into_iter().collect();
        let known = node_ids.iter().cloned().collect();

        let mut edges = edges.to_vec();
        edges.sort_by(|a, b| a.from.cmp(&b.from));

        let mut adjacency: HashMap<String, (usize, usize)> = HashMap::new();
        let mut i = 0;
        while i < edges.len() {
            let start = i;
            let from = &edges[i].from;
            while i < edges.len() && edges[i].from == *from {
                i += 1;
            }
            adjacency.insert(from.clone(), (start, i - start));
        }

        let mut incoming: HashMap<String, usize> = HashMap::new();
        for e in &edges {
            *incoming.entry(e.to.clone()).or_default() += 1;
        }

        Self {
            node_ids,
            known,
            edges,
            adjacency,
            incoming,
        }
    }

    /// Node ids in declaration order, sentinels excluded.
    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    /// True for a declared node or one of the sentinels.
    pub fn contains(&self, id: &str) -> bool {
        id == START || id == END || self.known.contains(id)
    }

    pub fn outgoing_edges(&self, node_id: &str) -> &[Edge] {
        match self.adjacency.get(node_id) {
            Some(&(start, count)) => &self.edges[start..start + count],
            None => &[],
        }
    }

    pub fn incoming_count(&self, node_id: &str) -> usize {
        self.incoming.get(node_id).copied().unwrap_or(0)
    }

    pub fn all_edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Every id reachable from `START`, including the sentinels reached.
    pub fn reachable_from_start(&self) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(START.to_string());
        queue.push_back(START.to_string());
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing_edges(&current) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        visited
    }

    /// Find one cycle, returned as the ids along it.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &PlanGraph,
            id: &str,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let pos = stack.iter().position(|s| s == id).unwrap_or(0);
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);
            stack.push(id.to_string());
            for edge in graph.outgoing_edges(id) {
                if let Some(cycle) = visit(graph, &edge.to, marks, stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        let roots = std::iter::once(START).chain(self.node_ids.iter().map(String::as_str));
        for root in roots {
            if let Some(cycle) = visit(self, root, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// Nodes in execution order: a topological walk from `START` that breaks
    /// ties by edge declaration order. Sentinels are excluded.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let reachable = self.reachable_from_start();

        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for e in &self.edges {
            if reachable.contains(&e.from) {
                *indegree.entry(e.to.as_str()).or_default() += 1;
            }
        }

        let mut order = Vec::new();
        let mut seen = 0usize;
        let mut queue = VecDeque::from([START]);
        while let Some(current) = queue.pop_front() {
            seen += 1;
            if current != START && current != END {
                order.push(current.to_string());
            }
            for edge in self.outgoing_edges(current) {
                if let Some(d) = indegree.get_mut(edge.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }

        if seen != reachable.len() {
            return Err(VigilError::schema(
                "plan graph",
                "cycle detected among nodes reachable from START",
            ));
        }
        Ok(order)
    }
}
