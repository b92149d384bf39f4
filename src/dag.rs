//! Step dependency graph built from deferred references

use crate::error::{SagePipeError, Result};
use crate::models::{PropertyPath, Reference, Step};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Dependency graph over the steps of one pipeline or workflow.
///
/// An edge `a -> b` means `b` consumes an output of `a` (or, for chains,
/// that `b` directly follows `a`).
#[derive(Debug)]
pub struct DagEngine {
    graph: DiGraph<String, ()>,
    step_indices: HashMap<String, NodeIndex>,
}

impl DagEngine {
    /// Build the graph from the steps' deferred references.
    ///
    /// Steps are taken in declaration order. A reference must name a step
    /// declared earlier in the list, and an output that step declares.
    pub fn build(steps: &[Step]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in steps {
            let index = graph.add_node(step.name.clone());
            if step_indices.insert(step.name.clone(), index).is_some() {
                return Err(SagePipeError::DuplicateStep(step.name.clone()));
            }
        }

        for (position, step) in steps.iter().enumerate() {
            let step_index = step_indices[&step.name];
            for reference in step.references() {
                let Reference::Step {
                    step: producer,
                    output,
                } = reference
                else {
                    continue;
                };

                let producer_index =
                    *step_indices
                        .get(producer)
                        .ok_or_else(|| SagePipeError::UnknownStep {
                            step: step.name.clone(),
                            reference: producer.clone(),
                        })?;

                // Node indices follow declaration order
                if producer_index.index() >= position {
                    return Err(SagePipeError::ForwardReference {
                        step: step.name.clone(),
                        reference: producer.clone(),
                    });
                }

                check_declared(step, &steps[producer_index.index()], output)?;
                graph.update_edge(producer_index, step_index, ());
            }
        }

        Ok(Self {
            graph,
            step_indices,
        })
    }

    /// Build the graph for a linear chain: reference edges plus an edge
    /// between every pair of consecutive steps.
    pub fn build_chain(steps: &[Step]) -> Result<Self> {
        let mut engine = Self::build(steps)?;
        for pair in steps.windows(2) {
            let from = engine.step_indices[&pair[0].name];
            let to = engine.step_indices[&pair[1].name];
            engine.graph.update_edge(from, to, ());
        }
        Ok(engine)
    }

    /// Get topologically sorted step names
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let sorted_indices = toposort(&self.graph, None).map_err(|cycle| {
            SagePipeError::CycleDetected(self.graph[cycle.node_id()].clone())
        })?;

        Ok(sorted_indices
            .iter()
            .map(|&idx| self.graph[idx].clone())
            .collect())
    }

    /// Get all steps that consume the given step
    pub fn get_dependents(&self, step_name: &str) -> Vec<String> {
        if let Some(&index) = self.step_indices.get(step_name) {
            self.graph
                .neighbors(index)
                .map(|idx| self.graph[idx].clone())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all steps the given step consumes
    pub fn get_dependencies(&self, step_name: &str) -> Vec<String> {
        if let Some(&index) = self.step_indices.get(step_name) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .map(|idx| self.graph[idx].clone())
                .collect()
        } else {
            Vec::new()
        }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

fn check_declared(consumer: &Step, producer: &Step, output: &PropertyPath) -> Result<()> {
    if producer.declared_outputs().contains(output) {
        Ok(())
    } else {
        Err(SagePipeError::UndeclaredOutput {
            step: consumer.name.clone(),
            producer: producer.name.clone(),
            output: output.dotted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LambdaSpec, ModelSpec, StepSpec, Value};
    use std::collections::BTreeMap;

    fn create_model_step(name: &str, model_data: Value) -> Step {
        Step::new(
            name,
            StepSpec::CreateModel(ModelSpec {
                model_name: None,
                role_arn: "arn:aws:iam::123456789012:role/test".to_string(),
                image_uri: "image".to_string(),
                model_data,
                environment: BTreeMap::new(),
            }),
        )
    }

    fn create_lambda_step(name: &str, model_name: Value) -> Step {
        Step::new(
            name,
            StepSpec::Lambda(LambdaSpec {
                function: Value::literal("arn:aws:lambda:us-east-1:123456789012:function:f"),
                payload: vec![("model_name".to_string(), model_name)],
                output_parameters: vec![],
            }),
        )
    }

    #[test]
    fn test_simple_chain() {
        let steps = vec![
            create_model_step("a", Value::literal("s3://bucket/model.tar.gz")),
            create_lambda_step("b", Value::step_output("a", PropertyPath::model_name())),
        ];

        let dag = DagEngine::build(&steps).unwrap();
        let sorted = dag.topological_sort().unwrap();

        assert_eq!(sorted, vec!["a", "b"]);
        assert_eq!(dag.get_dependencies("b"), vec!["a"]);
        assert_eq!(dag.get_dependents("a"), vec!["b"]);
        assert!(dag.get_dependencies("a").is_empty());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let steps = vec![
            create_lambda_step("a", Value::step_output("b", PropertyPath::model_name())),
            create_model_step("b", Value::literal("s3://bucket/model.tar.gz")),
        ];

        let result = DagEngine::build(&steps);
        assert!(matches!(
            result,
            Err(SagePipeError::ForwardReference { step, reference }) if step == "a" && reference == "b"
        ));
    }

    #[test]
    fn test_self_reference_rejected() {
        let steps = vec![create_model_step(
            "a",
            Value::step_output("a", PropertyPath::model_name()),
        )];

        let result = DagEngine::build(&steps);
        assert!(matches!(result, Err(SagePipeError::ForwardReference { .. })));
    }

    #[test]
    fn test_unknown_step_rejected() {
        let steps = vec![create_lambda_step(
            "a",
            Value::step_output("missing", PropertyPath::model_name()),
        )];

        let result = DagEngine::build(&steps);
        assert!(matches!(result, Err(SagePipeError::UnknownStep { .. })));
    }

    #[test]
    fn test_undeclared_output_rejected() {
        let steps = vec![
            create_model_step("a", Value::literal("s3://bucket/model.tar.gz")),
            create_lambda_step("b", Value::step_output("a", PropertyPath::model_artifacts())),
        ];

        let result = DagEngine::build(&steps);
        assert!(matches!(
            result,
            Err(SagePipeError::UndeclaredOutput { producer, .. }) if producer == "a"
        ));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let steps = vec![
            create_model_step("a", Value::literal("x")),
            create_model_step("a", Value::literal("y")),
        ];

        let result = DagEngine::build(&steps);
        assert!(matches!(result, Err(SagePipeError::DuplicateStep(name)) if name == "a"));
    }

    #[test]
    fn test_chain_orders_independent_steps() {
        let steps = vec![
            create_model_step("first", Value::literal("x")),
            create_model_step("second", Value::literal("y")),
            create_model_step("third", Value::literal("z")),
        ];

        let dag = DagEngine::build(&steps).unwrap();
        assert_eq!(dag.edge_count(), 0);

        let chain = DagEngine::build_chain(&steps).unwrap();
        assert_eq!(chain.edge_count(), 2);
        assert_eq!(
            chain.topological_sort().unwrap(),
            vec!["first", "second", "third"]
        );
    }
}
