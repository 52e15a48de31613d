use crate::utils;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

#[test]
fn test_labels_to_query() {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "nginx".to_string());
    labels.insert("tier".to_string(), "frontend".to_string());
    assert_eq!(
        utils::labels_to_query(&labels),
        Some("app=nginx,tier=frontend".to_string())
    );
    assert_eq!(utils::labels_to_query(&BTreeMap::new()), None);
}

#[test]
fn test_selector_to_query_with_expressions() {
    let mut match_labels = BTreeMap::new();
    match_labels.insert("app".to_string(), "agent".to_string());
    let selector = LabelSelector {
        match_labels: Some(match_labels),
        match_expressions: Some(vec![
            LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["prod".to_string(), "staging".to_string()]),
            },
            LabelSelectorRequirement {
                key: "canary".to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            },
            LabelSelectorRequirement {
                key: "zone".to_string(),
                operator: "Exists".to_string(),
                values: None,
            },
            LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["db".to_string()]),
            },
        ]),
    };
    assert_eq!(
        utils::selector_to_query(&selector),
        Some("app=agent,env in (prod,staging),!canary,zone,tier notin (db)".to_string())
    );
}

#[test]
fn test_empty_selector_selects_nothing() {
    assert_eq!(utils::selector_to_query(&LabelSelector::default()), None);
}

#[test]
fn test_endpoint_file_name() {
    assert_eq!(utils::endpoint_file_name("GET", "/"), "GET__.yml");
    assert_eq!(
        utils::endpoint_file_name("post", "/discovery/container/targets"),
        "POST__discovery_container_targets.yml"
    );
}
