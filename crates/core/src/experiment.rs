//! The experiment request carried by queue messages.
//!
//! The wire format belongs to the submitting client; gantry only relies on
//! the experiment key, the declared resources, the originating database
//! project and the chat destination for operator broadcasts. Everything
//! else in the payload is tolerated and ignored.

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// A decoded experiment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub experiment: Experiment,
    #[serde(default)]
    pub config: RequestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Client-assigned experiment identifier, used in log headers.
    pub key: String,
    /// Resources the experiment declares it needs. Also becomes the
    /// queue's resource hint once the message has been handled.
    #[serde(default)]
    pub resource: Resource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runner: RunnerOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Project the experiment's artifacts live under.
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerOptions {
    /// Chat destination for broadcast notifications about this experiment.
    #[serde(default)]
    pub slack_dest: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytesize::ByteSize;

    #[test]
    fn decodes_full_payload() {
        let json = r##"{
            "experiment": {
                "key": "exp-20260801-0042",
                "resource": {"cpus": 2, "ram": "4GiB", "gpus": 1, "gpuMem": "8GiB"}
            },
            "config": {
                "database": {"project_id": "ml-lab"},
                "runner": {"slack_dest": "#experiments"}
            },
            "extra_client_field": {"ignored": true}
        }"##;
        let req: ExperimentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.experiment.key, "exp-20260801-0042");
        assert_eq!(req.experiment.resource.cpus, 2);
        assert_eq!(req.experiment.resource.ram, ByteSize::gib(4));
        assert_eq!(req.config.database.project_id, "ml-lab");
        assert_eq!(req.config.runner.slack_dest, "#experiments");
    }

    #[test]
    fn decodes_minimal_payload() {
        let json = r#"{"experiment": {"key": "exp-1"}}"#;
        let req: ExperimentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.experiment.key, "exp-1");
        assert!(req.experiment.resource.is_empty());
        assert_eq!(req.config.database.project_id, "");
        assert_eq!(req.config.runner.slack_dest, "");
    }

    #[test]
    fn rejects_payload_without_experiment_key() {
        let err = serde_json::from_str::<ExperimentRequest>(r#"{"experiment": {}}"#);
        assert!(err.is_err());
    }
}
