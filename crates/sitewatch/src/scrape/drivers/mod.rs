pub mod http;
pub mod prometheus;
pub mod site;

use crate::scrape::{DriverError, DriverResult};
use reqwest::{Certificate, Client};
use std::time::Duration;

/// Load the optional custom root CA bundle (spec §4.3 "TLS"): a
/// colon-separated list of PEM file paths, read once per scrape and handed
/// to every outbound client a driver builds. `None`/empty means "use the
/// platform defaults".
pub fn load_root_certs(custom_ca_path: &Option<String>) -> DriverResult<Vec<Certificate>> {
    let Some(paths) = custom_ca_path else { return Ok(Vec::new()) };
    let mut certs = Vec::new();
    for path in paths.split(':').filter(|p| !p.is_empty()) {
        let pem = std::fs::read(path)
            .map_err(|e| DriverError::InvalidConfig(format!("reading custom CA '{path}': {e}")))?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| DriverError::InvalidConfig(format!("parsing custom CA '{path}': {e}")))?;
        certs.push(cert);
    }
    Ok(certs)
}

/// Build a `reqwest::Client` with the given timeout and root CA bundle,
/// optionally relaxing TLS verification entirely for a single app probe
/// (spec §4.4 — HTTP driver `ssl_verify=false` overrides the global CA
/// bundle on a per-app basis).
pub fn build_client(timeout: Duration, accept_invalid_certs: bool, root_certs: &[Certificate]) -> DriverResult<Client> {
    let mut builder = Client::builder().timeout(timeout).danger_accept_invalid_certs(accept_invalid_certs);
    for cert in root_certs {
        builder = builder.add_root_certificate(cert.clone());
    }
    builder.build().map_err(|e| DriverError::Transport(e.to_string()))
}
