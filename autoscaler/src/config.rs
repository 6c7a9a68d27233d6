//! Configuration loading: a list of `ScalingPolicy`s from a `file://`,
//! `http(s)://`, or `s3://` URL, grounded on `paradigm-api/src/config.rs`'s
//! `from_file`/`validate` shape.

use anyhow::{anyhow, Context, Result};
use autoscaler_core::policy::ScalingPolicy;

pub async fn load(url: &str) -> Result<Vec<ScalingPolicy>> {
    let body = fetch(url).await?;
    let policies: Vec<ScalingPolicy> =
        serde_json::from_str(&body).context("failed to parse scaling policy configuration")?;
    for policy in &policies {
        policy
            .validate()
            .map_err(|e| anyhow!("invalid policy for stream {}: {e}", policy.stream_name))?;
    }
    Ok(policies)
}

async fn fetch(url: &str) -> Result<String> {
    if let Some(path) = url.strip_prefix("file://") {
        return std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let client = reqwest::Client::new();
        let resp = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching config from {url}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("config endpoint returned {}", resp.status()));
        }
        return Ok(resp.text().await?);
    }
    if url.starts_with("s3://") {
        return Err(anyhow!(
            "s3:// configuration sources are unsupported in this deployment"
        ));
    }
    Err(anyhow!("unrecognized config_file_url scheme: {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_file_scheme() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"streamName":"orders","scaleOnOperation":["PUT"],"minShards":1,"maxShards":10,"checkInterval":60,"scaleUp":{{"scaleThresholdPct":75,"scaleAfterMins":5,"scaleCount":1,"coolOffMins":10}},"scaleDown":{{"scaleThresholdPct":25,"scaleAfterMins":5,"scaleCount":1,"coolOffMins":10}}}}]"#
        )
        .unwrap();
        let url = format!("file://{}", file.path().display());
        let policies = load(&url).await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].stream_name, "orders");
    }

    #[tokio::test]
    async fn rejects_s3_scheme() {
        let result = fetch("s3://bucket/config.json").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        let result = fetch("ftp://host/config.json").await;
        assert!(result.is_err());
    }
}
