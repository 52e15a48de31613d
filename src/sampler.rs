use crate::config::TlsConfig;
use crate::output::{OutputRecord, expand_template, now_rfc3339, pretty_json, write_to_file};
use crate::types::EndpointSpec;
use anyhow::Context;
use reqwest::{Client, Method, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

/// Body Go and Java TLS servers answer a plaintext request with.
pub const HTTPS_REQUIRED_MARKER: &str = "Client sent an HTTP request to an HTTPS server";

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("invalid method '{0}'")]
    InvalidMethod(String),
    #[error("failed to load client certificate: {0}")]
    ClientCertificate(String),
    #[error("{message}")]
    Request { message: String, certificate: bool },
    #[error("request failed with status code {0}")]
    Status(u16),
}

impl SampleError {
    fn from_reqwest(err: reqwest::Error) -> SampleError {
        let mut message = err.to_string();
        let mut certificate = false;
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let text = cause.to_string();
            certificate |= text.to_ascii_lowercase().contains("certificate");
            message.push_str(": ");
            message.push_str(&text);
            source = cause.source();
        }
        SampleError::Request {
            message,
            certificate,
        }
    }

    /// Missing or rejected certificates, which the operator can fix by configuration.
    pub fn is_certificate_error(&self) -> bool {
        matches!(
            self,
            SampleError::ClientCertificate(_)
                | SampleError::Request {
                    certificate: true,
                    ..
                }
        )
    }
}

/// Where a pod's HTTP endpoints are reachable, usually through a tunnel.
#[derive(Debug, Clone)]
pub struct SampleTarget {
    pub base_url: String,
    pub use_https: bool,
    /// `namespace/pod`, used in log lines.
    pub context: String,
}

impl SampleTarget {
    pub fn new(address: &str, use_https: bool, context: impl Into<String>) -> Self {
        let scheme = if use_https { "https" } else { "http" };
        SampleTarget {
            base_url: format!("{}://{}", scheme, address),
            use_https,
            context: context.into(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Joins like a URL path join; full URLs are taken as they are.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct HttpSampler {
    plain: Client,
    tls: Result<Client, String>,
}

impl HttpSampler {
    pub fn new(tls: &TlsConfig) -> anyhow::Result<HttpSampler> {
        let plain = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let tls = build_tls_client(tls).map_err(|e| {
            error!("Failed to load certificate: {:#}", e);
            format!("{:#}", e)
        });

        Ok(HttpSampler { plain, tls })
    }

    async fn exchange(
        &self,
        method: &str,
        url: &str,
        use_https: bool,
    ) -> Result<(StatusCode, Vec<u8>), SampleError> {
        let mut parsed = Url::parse(url).map_err(|_| SampleError::InvalidUrl(url.to_string()))?;
        let client = if use_https {
            if parsed.set_scheme("https").is_err() {
                return Err(SampleError::InvalidUrl(url.to_string()));
            }
            self.tls
                .as_ref()
                .map_err(|e| SampleError::ClientCertificate(e.clone()))?
        } else {
            &self.plain
        };
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| SampleError::InvalidMethod(method.to_string()))?;

        debug!("Requesting {} {}", method, parsed);
        let response = client
            .request(method, parsed)
            .send()
            .await
            .map_err(SampleError::from_reqwest)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(SampleError::from_reqwest)?;
        Ok((status, body.to_vec()))
    }

    /// Raw body of a 200 response. A plaintext request rejected by a TLS server
    /// is retried once over TLS.
    pub async fn fetch(
        &self,
        method: &str,
        url: &str,
        use_https: bool,
    ) -> Result<Vec<u8>, SampleError> {
        let (mut status, mut body) = self.exchange(method, url, use_https).await?;
        if !use_https && contains_https_marker(&body) {
            debug!("{} expects TLS, retrying with https", url);
            (status, body) = self.exchange(method, url, true).await?;
        }
        if status != StatusCode::OK {
            return Err(SampleError::Status(status.as_u16()));
        }
        Ok(body)
    }

    /// Like `fetch`, rendered as text. JSON is pretty-printed when asked for and possible.
    pub async fn sample(
        &self,
        method: &str,
        url: &str,
        use_https: bool,
        format_json: bool,
    ) -> Result<String, SampleError> {
        let body = self.fetch(method, url, use_https).await?;
        if format_json && let Some(pretty) = pretty_json(&body) {
            return Ok(pretty);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Samples `spec` against `target`, one record per execution under `dir`.
    pub async fn sample_to_file(
        &self,
        target: &SampleTarget,
        spec: &EndpointSpec,
        dir: &Path,
        format_json: bool,
    ) {
        let url = target.url_for(&spec.path);
        let template = dir.join(&spec.output);
        let executions = spec.executions.max(1);

        for i in 0..executions {
            let path = if executions > 1 {
                expand_template(&template, i)
            } else {
                template.clone()
            };

            let start = Instant::now();
            let started_at = now_rfc3339();
            let result = self
                .sample(&spec.method, &url, target.use_https, format_json)
                .await;
            let (body, errors) = match result {
                Ok(body) => (body, Vec::new()),
                Err(e) => {
                    self.report(target, &spec.method, &url, &e);
                    (String::new(), vec![e.to_string()])
                }
            };
            let record = OutputRecord {
                command: format!("{} {}", spec.method.to_uppercase(), url),
                started_at,
                errors,
                body,
                elapsed_millis: start.elapsed().as_millis(),
            };
            write_to_file(&path, record.render().as_bytes()).await;

            if i + 1 < executions {
                tokio::time::sleep(spec.delay).await;
            }
        }
    }

    /// Stores the raw body at `output_path` and a record of the request next to it.
    pub async fn download_to_file(
        &self,
        target: &SampleTarget,
        method: &str,
        path: &str,
        output_path: &Path,
    ) {
        let url = target.url_for(path);
        let start = Instant::now();
        let started_at = now_rfc3339();

        let mut errors = Vec::new();
        match self.fetch(method, &url, target.use_https).await {
            Ok(body) => write_to_file(output_path, &body).await,
            Err(e) => {
                self.report(target, method, &url, &e);
                errors.push(e.to_string());
            }
        }

        let record = OutputRecord {
            command: format!("{} {} --output {}", method, url, output_path.display()),
            started_at,
            errors,
            body: String::new(),
            elapsed_millis: start.elapsed().as_millis(),
        };
        let mut log_path = output_path.as_os_str().to_owned();
        log_path.push(".log");
        write_to_file(&PathBuf::from(log_path), record.render().as_bytes()).await;
    }

    fn report(&self, target: &SampleTarget, method: &str, url: &str, err: &SampleError) {
        if err.is_certificate_error() {
            error!(
                "[{}] Certificates missing or invalid for {} {}: {}. Configure --cert-chain-file and --cert-key-file.",
                target.context, method, url, err
            );
        } else {
            error!(
                "[{}] Error executing {} {}: {}",
                target.context, method, url, err
            );
        }
    }
}

fn contains_https_marker(body: &[u8]) -> bool {
    String::from_utf8_lossy(body).contains(HTTPS_REQUIRED_MARKER)
}

fn build_tls_client(tls: &TlsConfig) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(true);

    if let Some((chain_file, key_file)) = tls.client_certificate() {
        let mut pem = std::fs::read(chain_file)
            .with_context(|| format!("Failed to read certificate '{}'", chain_file.display()))?;
        let key = std::fs::read(key_file)
            .with_context(|| format!("Failed to read certificate key '{}'", key_file.display()))?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity =
            reqwest::Identity::from_pem(&pem).context("Failed to parse certificate and key")?;
        builder = builder.identity(identity);
    }

    builder.build().context("Failed to create HTTPS client")
}
