//! IAM policy document helpers

use crate::error::{InfraError, Result};
use etlflow_core::{Manifest, Ref, aws};
use serde_json::{Value, json};

pub const W12_ID: &str = "W12";

pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({ "Version": "2012-10-17", "Statement": statements })
}

pub fn allow(actions: &[&str], resources: &[&str]) -> Value {
    json!({ "Effect": "Allow", "Action": actions, "Resource": resources })
}

/// Trust policy for an AWS service principal
pub fn service_trust(service: &str) -> Value {
    policy_document(vec![json!({
        "Effect": "Allow",
        "Principal": { "Service": service },
        "Action": "sts:AssumeRole",
    })])
}

/// Trust policy for the account root
pub fn account_root_trust() -> Value {
    policy_document(vec![json!({
        "Effect": "Allow",
        "Principal": { "AWS": format!("arn:{}:iam::{}:root", aws::PARTITION, aws::ACCOUNT_ID) },
        "Action": "sts:AssumeRole",
    })])
}

pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:{}:iam::aws:policy/{}", aws::PARTITION, name)
}

/// Inline policy attached to `roles`
pub fn policy_properties(name: &str, roles: &[&Ref], statements: Vec<Value>) -> Value {
    let roles: Vec<String> = roles.iter().map(|r| r.id()).collect();
    json!({
        "PolicyName": name,
        "PolicyDocument": policy_document(statements),
        "Roles": roles,
    })
}

/// IAM statements held by a role template.
///
/// The template is a YAML list of statements, or a multi-document stream of them.
pub fn statements_from_manifest(manifest: Manifest, source_name: &str) -> Result<Vec<Value>> {
    let mut statements = Vec::new();
    for doc in manifest.into_documents() {
        match doc {
            Value::Array(items) => statements.extend(items),
            Value::Object(_) => statements.push(doc),
            other => {
                return Err(InfraError::InvalidStatement {
                    source_name: source_name.to_string(),
                    message: format!("expected a list of statements, got {other}"),
                });
            }
        }
    }
    for statement in &statements {
        validate_statement(statement, source_name)?;
    }
    Ok(statements)
}

fn validate_statement(statement: &Value, source_name: &str) -> Result<()> {
    let invalid = |message: &str| InfraError::InvalidStatement {
        source_name: source_name.to_string(),
        message: message.to_string(),
    };
    let obj = statement
        .as_object()
        .ok_or_else(|| invalid("statement must be a mapping"))?;
    match obj.get("Effect").and_then(Value::as_str) {
        Some("Allow") | Some("Deny") => {}
        _ => return Err(invalid("Effect must be Allow or Deny")),
    }
    if !obj.contains_key("Action") && !obj.contains_key("NotAction") {
        return Err(invalid("statement has no Action"));
    }
    if !obj.contains_key("Resource") && !obj.contains_key("NotResource") {
        return Err(invalid("statement has no Resource"));
    }
    Ok(())
}

/// Whether any statement grants on the `*` resource
pub fn has_wildcard_resource(statements: &[Value]) -> bool {
    statements.iter().any(|s| match s.get("Resource") {
        Some(Value::String(r)) => r == "*",
        Some(Value::Array(rs)) => rs.iter().any(|r| r.as_str() == Some("*")),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_from_list_document() {
        let manifest = Manifest::Single(json!([
            {"Effect": "Allow", "Action": ["s3:GetObject"], "Resource": "*"},
            {"Effect": "Allow", "Action": "kms:Decrypt", "Resource": ["arn:aws:kms:::key/x"]},
        ]));
        let statements = statements_from_manifest(manifest, "etl-iam-role.yaml").unwrap();
        assert_eq!(statements.len(), 2);
        assert!(has_wildcard_resource(&statements));
        assert!(!has_wildcard_resource(&statements[1..]));
    }

    #[test]
    fn test_invalid_statement() {
        let manifest = Manifest::Single(json!([{"Effect": "Maybe", "Action": "s3:*", "Resource": "*"}]));
        assert!(matches!(
            statements_from_manifest(manifest, "bad.yaml"),
            Err(InfraError::InvalidStatement { .. })
        ));

        let manifest = Manifest::Single(json!("just a string"));
        assert!(statements_from_manifest(manifest, "bad.yaml").is_err());
    }

    #[test]
    fn test_trust_policies() {
        assert_eq!(
            service_trust("ec2.amazonaws.com")["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
        assert_eq!(
            account_root_trust()["Statement"][0]["Principal"]["AWS"],
            "arn:${AWS::Partition}:iam::${AWS::AccountId}:root"
        );
        assert_eq!(
            managed_policy_arn("AmazonEKSClusterPolicy"),
            "arn:${AWS::Partition}:iam::aws:policy/AmazonEKSClusterPolicy"
        );
    }
}
