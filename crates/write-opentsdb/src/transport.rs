// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of serialized batches.

use crate::config::{NodeConfig, TlsConfig};
use crate::constants::{MAX_REDIRECTS, USER_AGENT};
use crate::errors::{ConfigError, ShippingError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Certificate, ClientBuilder, Identity, StatusCode};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Sends one serialized batch and reports the response status, if the peer returned one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<Option<StatusCode>, ShippingError>;
}

/// POSTs batches to the OpenTSDB `/api/put` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &NodeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<Option<StatusCode>, ShippingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .body(payload)
            .send()
            .await
            .map_err(|e| ShippingError::Transport(e.to_string()))?;
        Ok(Some(response.status()))
    }
}

fn tls_error(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Tls(e.to_string())
}

fn build_client(config: &NodeConfig) -> Result<reqwest::Client, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    // A zero timeout means no timeout.
    if let Some(timeout) = config.timeout {
        client = client.timeout(timeout);
    }

    client = configure_tls(client, &config.tls)?;
    client.build().map_err(tls_error)
}

fn configure_tls(mut client: ClientBuilder, tls: &TlsConfig) -> Result<ClientBuilder, ConfigError> {
    client = client
        .danger_accept_invalid_certs(!tls.verify_peer)
        .danger_accept_invalid_hostnames(!tls.verify_host);

    if let Some(version) = tls.ssl_version.min_tls_version() {
        client = client.min_tls_version(version);
    }

    if let Some(ca_cert) = &tls.ca_cert {
        for certificate in read_certificates(ca_cert)? {
            client = client.add_root_certificate(certificate);
        }
    }

    if let Some(ca_path) = &tls.ca_path {
        for certificate in read_certificate_dir(ca_path)? {
            client = client.add_root_certificate(certificate);
        }
    }

    if tls.client_key_pass.is_some() {
        return Err(ConfigError::Tls(
            "encrypted client keys (ClientKeyPass) are not supported".to_string(),
        ));
    }

    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = fs::read(cert).map_err(tls_error)?;
            pem.push(b'\n');
            pem.extend(fs::read(key).map_err(tls_error)?);
            client = client.identity(Identity::from_pem(&pem).map_err(tls_error)?);
        }
        (None, None) => {}
        _ => {
            return Err(ConfigError::Tls(
                "ClientCert and ClientKey must be set together".to_string(),
            ))
        }
    }

    Ok(client)
}

fn read_certificates(path: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let pem = fs::read(path).map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?;
    Certificate::from_pem_bundle(&pem)
        .map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))
}

fn read_certificate_dir(dir: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let entries = fs::read_dir(dir).map_err(|e| ConfigError::Tls(format!("{}: {e}", dir.display())))?;

    let mut certificates = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match read_certificates(&path) {
            Ok(mut found) => certificates.append(&mut found),
            Err(e) => debug!("Skipping CA file: {e}"),
        }
    }
    Ok(certificates)
}
