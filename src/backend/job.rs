//! Units of work exchanged with workers.
//!
//! Both types are serde data so they can cross a process boundary as one
//! JSON line each.

use crate::id::{JobId, NodeId};
use crate::nodes::{CommonConfig, ConfigMap};
use crate::scripting::LogMessage;
use crate::sheet::Node;
use crate::types::{NodeKind, Value};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A node calculation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcJob {
    /// Assigned by the backend on submit; 0 before that
    pub job_id: JobId,
    pub node_id: NodeId,
    pub class: String,
    pub kind: NodeKind,
    pub inputs: Vec<Value>,
    pub config: ConfigMap,
    pub common_config: CommonConfig,
}

impl CalcJob {
    /// Snapshot of `node`'s inputs and configuration.
    pub fn for_node(node: &Node) -> Self {
        Self {
            job_id: JobId::default(),
            node_id: node.id,
            class: node.class().to_string(),
            kind: node.kind(),
            inputs: node.input_values(),
            config: node.config.get().clone(),
            common_config: node.common_config.get().clone(),
        }
    }
}

/// Outcome of a [`CalcJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcJobResult {
    pub job_id: JobId,
    pub node_id: NodeId,
    #[serde(default)]
    pub outputs: Vec<Value>,
    /// Execution time in nanoseconds
    pub duration_ns: u64,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub error_traceback: String,
    #[serde(default)]
    pub log_messages: Vec<LogMessage>,
}

impl CalcJobResult {
    pub fn success(job: &CalcJob, outputs: Vec<Value>, duration: Duration) -> Self {
        Self {
            job_id: job.job_id,
            node_id: job.node_id,
            outputs,
            duration_ns: duration_to_ns(duration),
            error: false,
            error_message: String::new(),
            error_traceback: String::new(),
            log_messages: Vec::new(),
        }
    }

    pub fn failure(
        job: &CalcJob,
        message: impl Into<String>,
        traceback: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            job_id: job.job_id,
            node_id: job.node_id,
            outputs: Vec::new(),
            duration_ns: duration_to_ns(duration),
            error: true,
            error_message: message.into(),
            error_traceback: traceback.into(),
            log_messages: Vec::new(),
        }
    }

    pub fn with_logs(mut self, log_messages: Vec<LogMessage>) -> Self {
        self.log_messages = log_messages;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ns)
    }
}

fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdProviders;
    use crate::nodes::find_registration;

    #[test]
    fn test_job_snapshot() {
        let mut ids = IdProviders::new();
        let reg = find_registration("MathAdd").unwrap();
        let node_id = ids.next_node();
        let mut node = Node::new(reg, node_id, &mut ids);
        node.inputs[0].value = Value::Int(2);
        let job = CalcJob::for_node(&node);
        assert_eq!(job.job_id, JobId(0));
        assert_eq!(job.class, "MathAdd");
        assert_eq!(job.kind, NodeKind::Simple);
        assert_eq!(job.inputs, vec![Value::Int(2), Value::Null]);
    }

    #[test]
    fn test_result_json_line() {
        let mut ids = IdProviders::new();
        let reg = find_registration("View").unwrap();
        let node_id = ids.next_node();
        let job = CalcJob::for_node(&Node::new(reg, node_id, &mut ids));
        let result = CalcJobResult::failure(&job, "boom", "", Duration::from_micros(3));
        let line = serde_json::to_string(&result).unwrap();
        assert!(!line.contains('\n'));
        let back: CalcJobResult = serde_json::from_str(&line).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.duration(), Duration::from_micros(3));
    }
}
