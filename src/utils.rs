use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Render a label map as an equality-based selector string.
pub fn labels_to_query(labels: &BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        None
    } else {
        Some(
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Render a LabelSelector (labels and expressions) in the API's selector syntax.
/// `None` for an empty selector, which must not be sent as "match everything".
pub fn selector_to_query(selector: &LabelSelector) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(labels) = &selector.match_labels {
        parts.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr
                .values
                .as_deref()
                .unwrap_or_default()
                .join(",");
            match expr.operator.as_str() {
                "In" => parts.push(format!("{} in ({})", expr.key, values)),
                "NotIn" => parts.push(format!("{} notin ({})", expr.key, values)),
                "Exists" => parts.push(expr.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", expr.key)),
                _ => {} // Unknown operator
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// `GET` + `/discovery/x` -> `GET__discovery_x.yml`
pub fn endpoint_file_name(method: &str, path: &str) -> String {
    format!("{}_{}.yml", method.to_uppercase(), path.replace('/', "_"))
}
