// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::inputs::Credential;
use crate::manifest::Manifest;

/// Parse the device endpoint's response body
///
/// Returns `Ok(None)` when the backend explicitly reports `"setup": null`,
/// meaning no setup is assigned to this device. A response without a
/// `setup` field at all is treated as malformed rather than as unassigned.
pub fn parse_device_response(bytes: &[u8]) -> Result<Option<Manifest>, FetchError> {
    let response: serde_json::Value = serde_json::from_slice(bytes)?;

    match response.get("setup") {
        None => Err(FetchError::MissingSetup),
        Some(serde_json::Value::Null) => Ok(None),
        Some(setup) => Ok(Some(Manifest::deserialize(setup)?)),
    }
}

/// Fetch the device's setup from the backend
pub async fn fetch_remote_setup<C: HttpClient>(
    client: &C,
    endpoint: &Url,
    credential: &Credential,
    timeout: Duration,
) -> Result<Option<Manifest>, FetchError> {
    let url = endpoint.as_str();

    let response = tokio::time::timeout(timeout, client.get_bytes(url, Some(credential.expose())))
        .await
        .map_err(|_| FetchError::TimedOut {
            url: url.to_string(),
        })?
        .map_err(|e| FetchError::RequestFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    parse_device_response(&response.body)
}
