//! Anonymous deployment metrics
//!
//! A helper function answers two custom resources: one mints a deployment
//! UUID, the other posts the metrics. Every resource here is gated by the
//! `AnonymousDatatoAWS` condition, which reads a template mapping so the
//! switch can be flipped in the synthesized template.

use crate::artifact::Storage;
use crate::handler::{self, HandlerSpec};
use crate::iam;
use etlflow_core::{Group, Ref, Resource, ResourceKind, Template, apply_condition};
use serde_json::{Map, Value, json};
use tracing::debug;

pub const GROUP: &str = "SendMetrics";
pub const MAPPING: &str = "AnonymousData";
pub const CONDITION: &str = "AnonymousDatatoAWS";
pub const HELPER_CODE_KEY: &str = "app_code/solution_helper.zip";

/// Values reported once per deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub solution: String,
    pub version: String,
    pub use_datalake_bucket: bool,
    pub use_cicd: bool,
    pub azs: usize,
}

impl Metrics {
    /// The `Data` object of the send-data resource
    pub fn data(&self) -> Value {
        let flag = |b: bool| if b { "True" } else { "False" };
        let mut data = Map::new();
        data.insert("Solution".into(), json!(self.solution));
        data.insert("Region".into(), json!(etlflow_core::aws::REGION));
        data.insert("SolutionVersion".into(), json!(self.version));
        data.insert("UUID".into(), json!("MY_UUID"));
        data.insert("UseDataLakeBucket".into(), json!(flag(self.use_datalake_bucket)));
        data.insert("UseAWSCICD".into(), json!(flag(self.use_cicd)));
        data.insert("NoAZs".into(), json!(self.azs.to_string()));
        Value::Object(data)
    }
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    pub group: Group,
    pub helper: Ref,
    pub uuid: Ref,
    pub send_data: Ref,
}

impl Telemetry {
    /// Add the mapping and condition the group's resources refer to
    pub fn register(&self, template: &mut Template) {
        template.add_mapping(MAPPING, json!({ "SendAnonymousData": { "Data": "Yes" } }));
        template.add_condition(
            CONDITION,
            json!({
                "Fn::Equals": [
                    { "Fn::FindInMap": [MAPPING, "SendAnonymousData", "Data"] },
                    "Yes",
                ],
            }),
        );
    }
}

pub fn telemetry_layer(metrics: &Metrics, storage: &Storage) -> Telemetry {
    let mut group = Group::new(GROUP);

    let helper = handler::add_handler(
        &mut group,
        HandlerSpec::new(
            "SolutionHelper",
            HELPER_CODE_KEY,
            "This function generates UUID for each deployment and sends anonymous data to the AWS Solutions team",
        )
        .with_code_bucket(storage.code_bucket())
        .with_handler("lambda_function.handler")
        .with_timeout(30),
    );
    if let Some(f) = group.find_mut(helper.function.path()) {
        f.add_dependency(storage.deployment.path());
    }

    let helper_arn = helper.function.attr("Arn");
    let provider = handler::add_handler(
        &mut group,
        HandlerSpec::new(
            "LambdaProvider/framework-onEvent",
            "handlers/provider-framework.zip",
            "AWS CDK resource provider framework - onEvent (SendMetrics/LambdaProvider)",
        )
        .with_handler("framework.onEvent")
        .with_env("USER_ON_EVENT_FUNCTION_ARN", helper_arn.clone())
        .with_statements(vec![iam::allow(
            &["lambda:InvokeFunction"],
            &[helper_arn.as_str()],
        )]),
    );

    let uuid = group.add(Resource::new(
        group.child_path("UUIDCustomResource"),
        ResourceKind::Custom("CreateUUID".into()),
        json!({ "ServiceToken": provider.service_token(), "Resource": "UUID" }),
    ));
    let send_data = group.add(
        Resource::new(
            group.child_path("SendDataCustomResource"),
            ResourceKind::Custom("AnonymousData".into()),
            json!({
                "ServiceToken": provider.service_token(),
                "Resource": "AnonymousMetric",
                "UUID": uuid.attr("UUID"),
                "Solution": metrics.solution,
                "Data": metrics.data(),
            }),
        )
        .with_dependency(uuid.path()),
    );

    let stamped = apply_condition(&mut group, &|_: &Resource| true, CONDITION);
    debug!(stamped, "Attached telemetry condition");

    Telemetry {
        group,
        helper: helper.function,
        uuid,
        send_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::storage_layer;
    use std::fs;

    fn build() -> Telemetry {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("buildspec.yaml"), "version: 0.2").unwrap();
        let storage = storage_layer(dir.path()).unwrap();
        let metrics = Metrics {
            solution: "SO0141".into(),
            version: "v1.0.0".into(),
            use_datalake_bucket: false,
            use_cicd: true,
            azs: 2,
        };
        telemetry_layer(&metrics, &storage)
    }

    #[test]
    fn test_every_resource_is_conditional() {
        let telemetry = build();
        let resources = telemetry.group.resources();
        assert!(resources.len() >= 6);
        assert!(
            resources
                .iter()
                .all(|r| r.condition.as_deref() == Some(CONDITION))
        );
    }

    #[test]
    fn test_send_data_follows_uuid() {
        let telemetry = build();
        let send = telemetry.group.find(telemetry.send_data.path()).unwrap();
        assert_eq!(send.kind.cfn_type(), "Custom::AnonymousData");
        assert!(send.depends_on.contains(&telemetry.uuid.path().to_string()));
        assert_eq!(send.properties["UUID"], "${SendMetricsUUIDCustomResource.UUID}");
        assert_eq!(send.properties["Data"]["NoAZs"], "2");
        assert_eq!(send.properties["Data"]["UseAWSCICD"], "True");
        assert_eq!(send.properties["Data"]["UseDataLakeBucket"], "False");

        let uuid = telemetry.group.find(telemetry.uuid.path()).unwrap();
        assert_eq!(uuid.kind.cfn_type(), "Custom::CreateUUID");
    }

    #[test]
    fn test_helper_code_comes_from_the_code_bucket() {
        let telemetry = build();
        let helper = telemetry.group.find(telemetry.helper.path()).unwrap();
        assert_eq!(helper.properties["Code"]["S3Bucket"], "${AppcodeAppcode}");
        assert_eq!(helper.properties["Code"]["S3Key"], HELPER_CODE_KEY);
        assert_eq!(helper.properties["Timeout"], 30);
        assert!(helper.depends_on.contains(&"appcode/DeployCode".to_string()));
    }

    #[test]
    fn test_register_mapping_and_condition() {
        let telemetry = build();
        let mut template = Template::new();
        telemetry.register(&mut template);
        assert_eq!(template.mappings[MAPPING]["SendAnonymousData"]["Data"], "Yes");
        assert!(template.conditions.contains_key(CONDITION));
    }
}
