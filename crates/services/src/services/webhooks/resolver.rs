use std::collections::HashSet;

use sqlx::SqlitePool;
use uuid::Uuid;

use trellis_db::models::container::Container;

use super::WebhookPayload;

/// Resolve the concrete subscriber URLs for a container: walk the
/// ancestry deepest-first, expand each stored template list, drop
/// invalid entries and dedupe, first occurrence winning.
pub async fn resolve(
    pool: &SqlitePool,
    container_uuid: Uuid,
    payload: &WebhookPayload,
) -> Result<Vec<String>, sqlx::Error> {
    let template_lists = Container::ancestry_webhook_urls(pool, container_uuid).await?;

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for raw in template_lists.into_iter().flatten() {
        let templates: Vec<String> = match serde_json::from_str(&raw) {
            Ok(templates) => templates,
            Err(err) => {
                tracing::warn!("ignoring malformed webhook_urls column: {err}");
                continue;
            }
        };
        for template in &templates {
            let Some(url) = expand(template, payload) else {
                continue;
            };
            if seen.insert(url.clone()) {
                resolved.push(url);
            }
        }
    }
    Ok(resolved)
}

/// Substitute placeholders, normalize, and validate one template.
/// Returns None (after logging) for anything that does not yield an
/// http(s) URL with a host.
fn expand(template: &str, payload: &WebhookPayload) -> Option<String> {
    let substituted = template
        .replace("{ticket_id}", &payload.ticket_id)
        .replace("{project_id}", &payload.project_id);
    let normalized = substituted.trim().trim_end_matches('/');
    if normalized.is_empty() {
        return None;
    }
    match url::Url::parse(normalized) {
        Ok(parsed)
            if matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|host| !host.is_empty()) =>
        {
            Some(normalized.to_string())
        }
        Ok(parsed) => {
            tracing::warn!(
                url = normalized,
                scheme = parsed.scheme(),
                "skipping webhook url with unsupported scheme or missing host"
            );
            None
        }
        Err(err) => {
            tracing::warn!(url = normalized, "skipping unparseable webhook url: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> WebhookPayload {
        WebhookPayload {
            ticket_id: "T-00001".to_string(),
            ticket_uuid: Uuid::new_v4(),
            project_id: "P-00001".to_string(),
            project_uuid: Uuid::new_v4(),
            state: "open".to_string(),
            priority: 3,
            kind: "task".to_string(),
            run_status: None,
            resolution: None,
            meta: json!({}),
            etag: 2,
            cp_project_id: None,
            cp_run_id: None,
            cp_session_id: None,
            sdk_session_id: None,
        }
    }

    #[test]
    fn substitutes_both_placeholders() {
        let url = expand("http://ex.com/{project_id}/hook/{ticket_id}", &payload());
        assert_eq!(url.as_deref(), Some("http://ex.com/P-00001/hook/T-00001"));
    }

    #[test]
    fn strips_trailing_slash_and_whitespace() {
        assert_eq!(
            expand("  http://x/hook/ ", &payload()).as_deref(),
            Some("http://x/hook")
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert_eq!(expand("ftp://invalid/hook", &payload()), None);
        assert_eq!(expand("file:///etc/passwd", &payload()), None);
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert_eq!(expand("not a url", &payload()), None);
        assert_eq!(expand("   ", &payload()), None);
    }

    #[test]
    fn accepts_https_with_port() {
        assert_eq!(
            expand("https://hooks.internal:8443/t/{ticket_id}", &payload()).as_deref(),
            Some("https://hooks.internal:8443/t/T-00001")
        );
    }
}
