//! kubectl wrapper for reading live objects

use crate::error::{CloudError, Result};
use crate::lookup::{ObjectReader, ObjectRef};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

pub const KUBECTL_PROGRAM: &str = "kubectl";

#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new() -> Self {
        Self {
            program: KUBECTL_PROGRAM.to_string(),
            kubeconfig: None,
        }
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", self.program, args.join(" "));

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CloudError::ToolNotFound(self.program.clone()),
            _ => CloudError::Io(e),
        })?;

        if !output.status.success() {
            return Err(CloudError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments for `kubectl get` with a JSONPath projection
pub fn get_args(object: &ObjectRef) -> Vec<String> {
    let path = object.json_path.trim_start_matches('{').trim_end_matches('}');
    vec![
        "get".to_string(),
        object.object_type.clone(),
        object.name.clone(),
        "--namespace".to_string(),
        object.namespace.clone(),
        "--output".to_string(),
        format!("jsonpath={{{path}}}"),
    ]
}

#[async_trait]
impl ObjectReader for Kubectl {
    async fn read(&self, object: &ObjectRef) -> Result<Option<String>> {
        match self.run(&get_args(object)).await {
            Ok(value) => {
                let value = value.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            // not created yet
            Err(CloudError::CommandFailed { message, .. }) if message.contains("NotFound") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_args() {
        let object = ObjectRef::new(
            "ingress",
            "jupyterhub",
            "jupyter",
            "..status.loadBalancer.ingress[0].hostname",
        );
        assert_eq!(
            get_args(&object),
            vec![
                "get",
                "ingress",
                "jupyterhub",
                "--namespace",
                "jupyter",
                "--output",
                "jsonpath={..status.loadBalancer.ingress[0].hostname}",
            ]
        );
    }

    #[test]
    fn test_braced_path_is_not_double_wrapped() {
        let object = ObjectRef::new("svc", "argo", "argo", "{.spec.clusterIP}");
        assert_eq!(get_args(&object)[6], "jsonpath={.spec.clusterIP}");
    }
}
