//! Validated stage dependency graph.
//!
//! Validation happens once, before any stage runs: duplicate names, unknown
//! dependencies, bad progress ranges and cycles are all rejected with a
//! [`GraphError`].

use std::collections::{HashMap, VecDeque};

use super::progress::ProgressRange;
use super::stage::StageDef;
use crate::error::GraphError;

#[derive(Debug)]
pub struct StageGraph {
    stages: Vec<StageDef>,
    /// `deps[i]` are the indices stage `i` waits on.
    deps: Vec<Vec<usize>>,
    /// `dependents[i]` are the indices waiting on stage `i`.
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl StageGraph {
    pub fn new(stages: Vec<StageDef>) -> Result<Self, GraphError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
            if !stage.range.is_valid() {
                return Err(GraphError::InvalidRange {
                    stage: stage.name.clone(),
                    lo: stage.range.lo,
                    hi: stage.range.hi,
                });
            }
        }

        let mut deps = vec![Vec::new(); stages.len()];
        let mut dependents = vec![Vec::new(); stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            for dep in &stage.deps {
                let &j = index
                    .get(dep.as_str())
                    .ok_or_else(|| GraphError::MissingDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    })?;
                if !deps[i].contains(&j) {
                    deps[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        let order = toposort(&deps, &dependents).map_err(|i| GraphError::CycleDetected {
            stage: stages[i].name.clone(),
        })?;

        Ok(Self {
            stages,
            deps,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: usize) -> &StageDef {
        &self.stages[index]
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn deps_of(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }

    pub fn dependents_of(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Stage indices in a valid execution order, ties broken by definition order.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    pub fn ranges(&self) -> impl Iterator<Item = (String, ProgressRange)> + '_ {
        self.stages.iter().map(|s| (s.name.clone(), s.range))
    }
}

/// Kahn's algorithm. On a cycle, returns the first stage (in definition
/// order) that never reached in-degree zero.
fn toposort(deps: &[Vec<usize>], dependents: &[Vec<usize>]) -> Result<Vec<usize>, usize> {
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..deps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        let mut ready: Vec<usize> = Vec::new();
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push(d);
            }
        }
        ready.sort_unstable();
        queue.extend(ready);
    }

    if order.len() == deps.len() {
        Ok(order)
    } else {
        Err((0..deps.len()).find(|&i| in_degree[i] > 0).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::stage::{StageContext, StageOutcome, StageResult, StageRunner};

    struct Noop;

    #[async_trait]
    impl StageRunner for Noop {
        async fn run(&self, _ctx: &StageContext) -> StageOutcome {
            StageResult::ok(Vec::new()).into()
        }
    }

    fn stage(name: &str, deps: &[&str]) -> StageDef {
        deps.iter()
            .fold(StageDef::new(name, Arc::new(Noop)), |s, d| s.depends_on(*d))
    }

    fn names(graph: &StageGraph) -> Vec<&str> {
        graph
            .topological_order()
            .iter()
            .map(|&i| graph.stage(i).name.as_str())
            .collect()
    }

    #[test]
    fn interview_shape_orders_dependencies_first() {
        let graph = StageGraph::new(vec![
            stage("word_flagging", &["transcription"]),
            stage("acquisition", &[]),
            stage("facial_motion", &["acquisition"]),
            stage("transcription", &["acquisition"]),
        ])
        .unwrap();

        assert_eq!(
            names(&graph),
            vec!["acquisition", "facial_motion", "transcription", "word_flagging"]
        );
        assert_eq!(graph.dependents_of(1), &[2, 3]);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = StageGraph::new(vec![
            stage("a", &["c"]),
            stage("b", &["a"]),
            stage("c", &["b"]),
        ])
        .unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { stage: "a".into() });
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = StageGraph::new(vec![stage("loop", &["loop"])]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn cycle_behind_a_valid_prefix_is_rejected() {
        let err = StageGraph::new(vec![
            stage("root", &[]),
            stage("x", &["root", "y"]),
            stage("y", &["x"]),
        ])
        .unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { stage: "x".into() });
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let err = StageGraph::new(vec![stage("flagging", &["transcription"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                stage: "flagging".into(),
                dependency: "transcription".into(),
            }
        );
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let err = StageGraph::new(vec![stage("a", &[]), stage("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateStage("a".into()));
    }

    #[test]
    fn invalid_range_is_rejected() {
        let bad = stage("a", &[]).with_range(ProgressRange::new(60, 20));
        let err = StageGraph::new(vec![bad]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidRange { .. }));
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let graph = StageGraph::new(vec![stage("a", &[]), stage("b", &["a", "a"])]).unwrap();
        assert_eq!(graph.deps_of(1), &[0]);
        assert_eq!(graph.dependents_of(0), &[1]);
    }

    #[test]
    fn empty_graph_is_valid() {
        let graph = StageGraph::new(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().is_empty());
    }
}
