//! Custom domain ownership checks over DNS-over-HTTPS.
//!
//! A domain is proven by a TXT record on the domain itself whose value contains
//! `{verification_token}.{domain}`. Lookups go through a DoH resolver speaking the
//! JSON API (`application/dns-json`), so no system resolver is involved.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::DomainsConfig;

/// DNS RR type for TXT
const TXT: u16 = 16;

#[derive(Debug, Error)]
pub enum DomainCheckError {
    #[error("DNS lookup failed: {0}")]
    Lookup(String),
    #[error("TXT record not found for {domain}")]
    RecordNotFound { domain: String },
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// TXT data arrives as one or more quoted character-strings; join them back up
fn unquote_txt(data: &str) -> String {
    let trimmed = data.trim();
    if !trimmed.starts_with('"') {
        return trimmed.to_string();
    }
    trimmed
        .split("\" \"")
        .map(|part| part.trim_matches('"'))
        .collect::<Vec<_>>()
        .concat()
}

/// All TXT values published on `domain`
#[instrument(skip(client, config), err)]
pub async fn lookup_txt(client: &reqwest::Client, config: &DomainsConfig, domain: &str) -> Result<Vec<String>, DomainCheckError> {
    let mut url = config.dns_over_https_url.clone();
    url.query_pairs_mut().append_pair("name", domain).append_pair("type", "TXT");

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/dns-json")
        .timeout(config.timeout)
        .send()
        .await
        .map_err(|e| DomainCheckError::Lookup(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DomainCheckError::Lookup(format!("resolver returned {}", response.status())));
    }

    let body: DohResponse = response.json().await.map_err(|e| DomainCheckError::Lookup(e.to_string()))?;
    // NXDOMAIN and friends just mean there is nothing to match
    if body.status != 0 {
        debug!(status = body.status, "Resolver returned non-zero status");
        return Ok(Vec::new());
    }

    Ok(body
        .answer
        .into_iter()
        .filter(|a| a.record_type == TXT)
        .map(|a| unquote_txt(&a.data))
        .collect())
}

/// Look for the expected TXT value, retrying up to `max_retries` times
#[instrument(skip(client, config, expected), err)]
pub async fn verify_txt(client: &reqwest::Client, config: &DomainsConfig, domain: &str, expected: &str) -> Result<(), DomainCheckError> {
    let attempts = config.max_retries.max(1);
    let mut last_error = DomainCheckError::RecordNotFound { domain: domain.to_string() };

    for attempt in 1..=attempts {
        match lookup_txt(client, config, domain).await {
            Ok(records) if records.iter().any(|r| r.contains(expected)) => {
                debug!(attempt, "TXT record matched");
                return Ok(());
            }
            Ok(_) => last_error = DomainCheckError::RecordNotFound { domain: domain.to_string() },
            Err(e) => last_error = e,
        }
        if attempt < attempts {
            tokio::time::sleep(config.retry_delay).await;
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, query_param},
    };

    fn config(server: &MockServer, max_retries: u32) -> DomainsConfig {
        DomainsConfig {
            dns_over_https_url: format!("{}/dns-query", server.uri()).parse().unwrap(),
            max_retries,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn joins_split_txt_strings() {
        assert_eq!(unquote_txt("\"abc.example.com\""), "abc.example.com");
        assert_eq!(unquote_txt("\"abc.\" \"example.com\""), "abc.example.com");
        assert_eq!(unquote_txt("plain"), "plain");
    }

    #[tokio::test]
    async fn matching_record_verifies() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("name", "qr.example.com"))
            .and(query_param("type", "TXT"))
            .and(header("accept", "application/dns-json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Status": 0,
                "Answer": [
                    {"name": "qr.example.com", "type": 16, "data": "\"v=spf1 -all\""},
                    {"name": "qr.example.com", "type": 16, "data": "\"tok123.qr.example.com\""}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        verify_txt(&client, &config(&server, 3), "qr.example.com", "tok123.qr.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_record_retries_then_fails() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": 3})))
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = verify_txt(&client, &config(&server, 2), "qr.example.com", "tok.qr.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainCheckError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn resolver_errors_are_reported() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = verify_txt(&client, &config(&server, 1), "qr.example.com", "x").await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
