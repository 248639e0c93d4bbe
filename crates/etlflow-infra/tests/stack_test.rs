use etlflow_config::StackConfig;
use etlflow_core::{ManifestLoader, ResourceGraph};
use etlflow_infra::{Stack, build_stack};

fn loader() -> ManifestLoader {
    ManifestLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../source"))
}

fn stack_with(edit: impl FnOnce(&mut StackConfig)) -> Stack {
    let mut config = StackConfig::default();
    edit(&mut config);
    build_stack(&config, &loader()).unwrap()
}

fn stack() -> Stack {
    stack_with(|_| {})
}

fn before(graph: &ResourceGraph, first: &str, then: &str) -> bool {
    let a = graph.position(first).unwrap_or_else(|| panic!("{first} missing"));
    let b = graph.position(then).unwrap_or_else(|| panic!("{then} missing"));
    a < b
}

#[test]
fn test_graph_is_acyclic_with_unique_ids() {
    let stack = stack();
    let graph = stack.graph().unwrap();
    assert_eq!(graph.len(), stack.root.resources().len());
    let template = stack.template().unwrap();
    assert_eq!(
        template["Resources"].as_object().unwrap().len(),
        graph.len()
    );
}

#[test]
fn test_layer_order() {
    let graph = stack().graph().unwrap();

    assert!(before(&graph, "network-sg/eksVpc", "eks_cluster/EKS"));
    assert!(before(&graph, "iam_roles/clusterAdmin", "eks_cluster/EKS"));
    assert!(before(&graph, "eks_cluster/EKS", "eks_sa/ALBServiceAcct/Role"));
    assert!(before(
        &graph,
        "eks_sa/ALBServiceAcct/manifest-ServiceAccountResource",
        "eks_base_app/ALBChart"
    ));
    assert!(before(&graph, "eks_base_app/ALBChart", "eks_base_app/SecretContrChart"));
    assert!(before(
        &graph,
        "eks_base_app/SecretContrChart",
        "spark_service_account/SparkNamespace"
    ));
    assert!(before(
        &graph,
        "spark_service_account/ETLSa/RoleBinding",
        "etl_apps/JHubChart"
    ));
    assert!(before(&graph, "etl_apps/JHubChart", "etl_apps/JHubConfig"));
    assert!(before(&graph, "etl_apps/JHubConfig", "etl_apps/ARGOChart"));
    assert!(before(&graph, "etl_apps/ARGOChart", "etl_apps/SubmitSparkWrktmpl"));
}

#[test]
fn test_secret_sync_waits_for_the_secret() {
    let graph = stack().graph().unwrap();
    assert!(graph.depends_on("eks_sa/ExSecretController/Role", "jHubPwd"));
    assert!(graph.depends_on("jHubPwd", "KMSKey"));
}

#[test]
fn test_login_secret() {
    let template = stack().template().unwrap();
    let secret = &template["Resources"]["JHubPwd"];
    assert_eq!(secret["Type"], "AWS::SecretsManager::Secret");
    assert_eq!(secret["Properties"]["Name"], "jHubPwd-spark-on-eks");
    let generate = &secret["Properties"]["GenerateSecretString"];
    assert_eq!(generate["SecretStringTemplate"], r#"{"username":"sparkoneks"}"#);
    assert_eq!(generate["GenerateStringKey"], "password");
    assert_eq!(template["Resources"]["KMSKeyAlias"]["Properties"]["AliasName"], "alias/secretsManager");
}

#[test]
fn test_project_tag_on_every_taggable_resource() {
    let stack = stack_with(|c| {
        c.tags.insert("owner".into(), "data".into());
    });
    for resource in stack.root.resources() {
        assert_eq!(resource.tags.get("project").map(String::as_str), Some("sqlbasedetl"));
        assert_eq!(resource.tags.get("owner").map(String::as_str), Some("data"));
    }
    let vpc = stack.root.find("network-sg/eksVpc").unwrap();
    assert_eq!(vpc.tags["Name"], "spark-on-eksEksVpc");
}

#[test]
fn test_outputs() {
    let template = stack().template().unwrap();
    let outputs = template["Outputs"].as_object().unwrap();
    for key in ["CODEBUCKET", "IMAGEURI", "ARGOURL", "JUPYTERURL"] {
        assert!(outputs.contains_key(key), "{key} missing");
    }
    assert_eq!(template["Parameters"]["AssetsBucket"]["Type"], "String");
}

#[test]
fn test_lookups_can_be_disabled() {
    let stack = stack_with(|c| c.lookup_hostnames = false);
    assert!(stack.apps.jhub_alb.is_none());
    let template = stack.template().unwrap();
    let outputs = template["Outputs"].as_object().unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(template["Resources"].get("EtlappsJhubALB").is_none());
}

#[test]
fn test_no_template_placeholders_left() {
    let rendered = stack().template_json().unwrap();
    for token in [
        "{{codeBucket}}",
        "{{datalakeBucket}}",
        "{{MY_SA}}",
        "{{region_name}}",
        "{{cluster_name}}",
        "{{vpc_id}}",
        "{{INBOUND_SG}}",
        "{{SECRET_NAME}}",
        "{{secretsmanager}}",
    ] {
        assert!(!rendered.contains(token), "{token} left in template");
    }
    // Argo expressions are not placeholders
    assert!(rendered.contains("{{inputs.parameters."));
}

#[test]
fn test_datalake_bucket_falls_back_to_code_bucket() {
    let policy = |stack: &Stack| {
        let resource = stack
            .root
            .find("spark_service_account/ETLSa/Role/DefaultPolicy")
            .unwrap();
        resource.properties.to_string()
    };

    let own = policy(&stack_with(|c| c.datalake_bucket = Some("my-lake".into())));
    assert!(own.contains("arn:aws:s3:::my-lake/*"));

    let blank = policy(&stack_with(|c| c.datalake_bucket = Some("  ".into())));
    assert!(!blank.contains("arn:aws:s3::: "));
    assert!(blank.contains("arn:aws:s3:::${AppcodeAppcode}/*"));
}

#[test]
fn test_node_pool_autoscaler_tags() {
    let stack = stack();
    let arm = stack
        .root
        .find("eks_cluster/EKS/Nodegrouparm-spot-mn")
        .unwrap();
    assert_eq!(arm.tags["k8s.io/cluster-autoscaler/enabled"], "true");
    assert_eq!(arm.tags["k8s.io/cluster-autoscaler/spark-on-eks"], "owned");
    assert_eq!(
        arm.tags["k8s.io/cluster-autoscaler/node-template/label/arch"],
        "arm64"
    );
    assert_eq!(arm.properties["ScalingConfig"]["MinSize"], 0);
}

#[test]
fn test_telemetry_is_opt_in() {
    let off = stack().template().unwrap();
    assert!(off.get("Conditions").is_none_or(|c| c.get("AnonymousDatatoAWS").is_none()));

    let on = stack_with(|c| c.telemetry = true).template().unwrap();
    assert!(on["Conditions"].get("AnonymousDatatoAWS").is_some());
    let send = &on["Resources"]["SendMetricsSendDataCustomResource"];
    assert_eq!(send["Condition"], "AnonymousDatatoAWS");
    assert_eq!(send["Properties"]["Data"]["UseDataLakeBucket"], "False");
}

#[test]
fn test_handler_keys() {
    let keys = stack().handler_keys().unwrap();
    for key in [
        "handlers/kubectl.zip",
        "handlers/cfn-utils.zip",
        "handlers/bucket-deployment.zip",
        "handlers/aws-sdk-call.zip",
    ] {
        assert!(keys.contains(key), "{key} missing from {keys:?}");
    }
    assert_eq!(keys.len(), 4);

    let with_telemetry = stack_with(|c| c.telemetry = true).handler_keys().unwrap();
    assert!(with_telemetry.contains("handlers/provider-framework.zip"));
    // the helper ships inside the application code, not with the handlers
    assert!(with_telemetry.iter().all(|k| k.starts_with("handlers/")));
}
