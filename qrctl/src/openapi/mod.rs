//! OpenAPI documentation for the two API surfaces:
//! - [`DashboardApiDoc`]: session-authenticated dashboard API plus auth, scan and inbound webhooks
//! - [`DeveloperApiDoc`]: API-key authenticated developer API at `/api/v1/*`

mod dashboard;
mod developer;

pub use dashboard::DashboardApiDoc;
pub use developer::DeveloperApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn dashboard_doc_nests_api_routes() {
        let doc = DashboardApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/auth/login"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/qr-codes/{id}"));
        assert!(paths.iter().any(|p| p.as_str() == "/webhooks/billing"));
        assert!(doc.components.unwrap().security_schemes.contains_key("SessionCookie"));
    }

    #[test]
    fn provider_webhooks_document_raw_json_body() {
        let doc = serde_json::to_value(DashboardApiDoc::openapi()).unwrap();
        for path in ["/webhooks/billing", "/webhooks/payments"] {
            let body = &doc["paths"][path]["post"]["requestBody"]["content"]["application/json"]["schema"];
            assert_eq!(body["type"], "string", "{path}");
        }
    }

    #[test]
    fn developer_doc_uses_bearer_keys() {
        let doc = DeveloperApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/qr-codes"));
        assert!(doc.paths.paths.contains_key("/webhooks/{qr_code_id}/logs"));
        assert!(doc.components.unwrap().security_schemes.contains_key("BearerAuth"));
    }
}
