//! Best-effort anonymous usage metrics
//!
//! Failures are logged and swallowed: metrics never block a deployment.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

pub const METRICS_ENDPOINT: &str = "https://metrics.awssolutionsbuilder.com/generic";

/// Stack lifecycle event the metric reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    /// Value of the `CFTemplate` field
    pub fn template_event(&self) -> &'static str {
        match self {
            RequestType::Create => "Created",
            RequestType::Update => "Updated",
            RequestType::Delete => "Deleted",
        }
    }
}

/// Drop routing keys and the ids that are sent at the top level
pub fn sanitize(properties: &Value) -> Map<String, Value> {
    let mut data = properties.as_object().cloned().unwrap_or_default();
    data.remove("ServiceToken");
    data.remove("Resource");
    data.remove("Solution");
    data.remove("UUID");
    if let Some(Value::Object(inner)) = data.get_mut("Data") {
        inner.remove("Solution");
        inner.remove("UUID");
    }
    data
}

pub struct MetricsReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl MetricsReporter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: METRICS_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Payload for one event. `properties` follow the send-data resource:
    /// `Solution`, `UUID` and a `Data` object.
    pub fn payload(&self, request_type: RequestType, properties: &Value) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "Solution".into(),
            properties.get("Solution").cloned().unwrap_or(Value::Null),
        );
        payload.insert(
            "UUID".into(),
            properties.get("UUID").cloned().unwrap_or(Value::Null),
        );
        payload.insert(
            "TimeStamp".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        payload.extend(sanitize(properties));
        payload.insert("CFTemplate".into(), json!(request_type.template_event()));
        Value::Object(payload)
    }

    /// POST the payload. Never fails.
    pub async fn send(&self, request_type: RequestType, properties: &Value) {
        let payload = self.payload(request_type, properties);
        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(response) => info!(
                status = %response.status(),
                event = request_type.template_event(),
                "Sent anonymous metrics"
            ),
            Err(e) => warn!(error = %e, "Could not send usage data"),
        }
    }
}

impl Default for MetricsReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties() -> Value {
        json!({
            "ServiceToken": "arn:aws:lambda:us-east-1:1:function:provider",
            "Resource": "AnonymousMetric",
            "Solution": "SO0141",
            "UUID": "3f0c",
            "Data": {
                "Solution": "SO0141",
                "UUID": "MY_UUID",
                "Region": "us-east-1",
                "NoAZs": "2",
            },
        })
    }

    #[test]
    fn test_sanitize() {
        let data = sanitize(&properties());
        assert!(!data.contains_key("ServiceToken"));
        assert!(!data.contains_key("Resource"));
        assert_eq!(data["Data"], json!({ "Region": "us-east-1", "NoAZs": "2" }));
    }

    #[test]
    fn test_payload() {
        let payload = MetricsReporter::new().payload(RequestType::Update, &properties());
        assert_eq!(payload["Solution"], "SO0141");
        assert_eq!(payload["UUID"], "3f0c");
        assert_eq!(payload["CFTemplate"], "Updated");
        assert_eq!(payload["Data"]["NoAZs"], "2");
        assert!(payload["TimeStamp"].as_str().unwrap().ends_with('Z'));
        assert!(payload.get("ServiceToken").is_none());
    }

    #[tokio::test]
    async fn test_send_swallows_transport_errors() {
        let reporter = MetricsReporter::new().with_endpoint("http://127.0.0.1:9/generic");
        reporter.send(RequestType::Create, &properties()).await;
    }
}
