use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};

use stepwise_core::error::{Result, StepwiseError};

use crate::step::{Step, StepNode};

/// Immutable, registered workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub result_schema: Option<Value>,
    nodes: Vec<StepNode>,
}

/// Listing entry for a workflow.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub step_ids: Vec<String>,
}

impl WorkflowDefinition {
    pub fn builder(id: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    /// Index of the node containing `step_id` (a node ID or a group member ID).
    pub fn node_index(&self, step_id: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.id() == step_id || node.steps().iter().any(|s| s.id == step_id))
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.nodes
            .iter()
            .flat_map(|node| node.steps())
            .find(|s| s.id == step_id)
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            step_ids: self.nodes.iter().map(|n| n.id().to_string()).collect(),
        }
    }

    /// Shape and schemas of the definition. Two definitions with equal
    /// signatures are the same workflow.
    pub fn signature(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
            "resultSchema": self.result_schema,
            "steps": self.nodes.iter().map(node_value).collect::<Vec<_>>(),
        })
    }

    /// Definition plus schemas, as served to API clients.
    pub fn describe(&self) -> Value {
        self.signature()
    }
}

fn node_value(node: &StepNode) -> Value {
    match node {
        StepNode::Sequential(step) => step_value(step),
        StepNode::Parallel { id, steps } => json!({
            "id": id,
            "kind": "parallel",
            "steps": steps.iter().map(step_value).collect::<Vec<_>>(),
        }),
    }
}

fn step_value(step: &Step) -> Value {
    json!({
        "id": step.id,
        "kind": "step",
        "description": step.description,
        "inputSchema": step.input_schema,
        "outputSchema": step.output_schema,
        "suspendSchema": step.suspend_schema,
        "resumeSchema": step.resume_schema,
    })
}

pub struct WorkflowBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    input_schema: Option<Value>,
    result_schema: Option<Value>,
    nodes: Vec<StepNode>,
}

impl WorkflowBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            input_schema: None,
            result_schema: None,
            nodes: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn result_schema(mut self, schema: Value) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Append a sequential step.
    pub fn then(mut self, step: Step) -> Self {
        self.nodes.push(StepNode::Sequential(step));
        self
    }

    /// Append a parallel group.
    pub fn and_all(mut self, group_id: impl Into<String>, steps: Vec<Step>) -> Self {
        self.nodes.push(StepNode::Parallel {
            id: group_id.into(),
            steps,
        });
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition> {
        if self.id.trim().is_empty() {
            return Err(StepwiseError::Validation("workflow id is empty".into()));
        }
        if self.nodes.is_empty() {
            return Err(StepwiseError::Validation(format!(
                "workflow {} has no steps",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if let StepNode::Parallel { id, steps } = node {
                if steps.is_empty() {
                    return Err(StepwiseError::Validation(format!(
                        "parallel group {id} in workflow {} has no steps",
                        self.id
                    )));
                }
                if !seen.insert(id.clone()) {
                    return Err(duplicate(&self.id, id));
                }
            }
            for step in node.steps() {
                if step.id.trim().is_empty() {
                    return Err(StepwiseError::Validation(format!(
                        "workflow {} has a step with an empty id",
                        self.id
                    )));
                }
                if !seen.insert(step.id.clone()) {
                    return Err(duplicate(&self.id, &step.id));
                }
            }
        }

        Ok(WorkflowDefinition {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            input_schema: self.input_schema,
            result_schema: self.result_schema,
            nodes: self.nodes,
        })
    }
}

fn duplicate(workflow_id: &str, step_id: &str) -> StepwiseError {
    StepwiseError::Validation(format!(
        "duplicate step id {step_id} in workflow {workflow_id}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepContext;

    fn step(id: &str) -> Step {
        Step::new(id, |ctx: StepContext| async move { Ok(ctx.data().clone()) })
    }

    #[test]
    fn test_build_and_lookup() {
        let wf = WorkflowDefinition::builder("w")
            .name("Research")
            .then(step("research"))
            .and_all("review", vec![step("fact-check"), step("style")])
            .then(step("publish"))
            .build()
            .unwrap();

        assert_eq!(wf.nodes().len(), 3);
        assert_eq!(wf.node_index("research"), Some(0));
        assert_eq!(wf.node_index("review"), Some(1));
        assert_eq!(wf.node_index("style"), Some(1));
        assert_eq!(wf.node_index("missing"), None);
        assert!(wf.step("fact-check").is_some());
        assert_eq!(
            wf.summary().step_ids,
            vec!["research".to_string(), "review".into(), "publish".into()]
        );
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = WorkflowDefinition::builder("w").build().unwrap_err();
        assert!(matches!(err, StepwiseError::Validation(_)));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let err = WorkflowDefinition::builder("w")
            .then(step("a"))
            .and_all("g", vec![step("b"), step("a")])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step id a"));
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = WorkflowDefinition::builder("w")
            .and_all("g", vec![])
            .build()
            .unwrap_err();
        assert!(matches!(err, StepwiseError::Validation(_)));
    }

    #[test]
    fn test_signature_tracks_schemas() {
        let a = WorkflowDefinition::builder("w").then(step("a")).build().unwrap();
        let b = WorkflowDefinition::builder("w").then(step("a")).build().unwrap();
        let c = WorkflowDefinition::builder("w")
            .then(step("a").with_resume_schema(json!({"type": "object"})))
            .build()
            .unwrap();
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_eq!(c.describe()["steps"][0]["resumeSchema"]["type"], "object");
    }
}
