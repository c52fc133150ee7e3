use std::time::Duration;

use anyhow::Result;
use tracing::trace;

use crate::checks::{HttpCheck, HttpsCheck};

pub(super) async fn http(client: &reqwest::Client, check: &HttpCheck) -> Result<String> {
    let url = with_scheme(&check.url, "http");
    get(client.get(&url), &url).await
}

pub(super) async fn https(client: &reqwest::Client, check: &HttpsCheck) -> Result<String> {
    let url = with_scheme(&check.url, "https");
    let request = client
        .get(&url)
        .timeout(Duration::from_secs(check.timeout));
    get(request, &url).await
}

async fn get(request: reqwest::RequestBuilder, url: &str) -> Result<String> {
    trace!("requesting {url}");

    match request.send().await {
        Ok(response) => Ok(format!(
            "Server is up -- Status: {}",
            response.status().as_u16()
        )),
        Err(e) if e.is_builder() => Err(e.into()),
        Err(e) => Ok(format!("Server unreachable -- {}", root_cause(&e))),
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Prefixes `scheme://` unless the URL already names a scheme.
fn with_scheme(url: &str, scheme: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("{scheme}://{url}")
    }
}
