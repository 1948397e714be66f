//! REST client for the Cloudflare WARP registration API.
//!
//! All endpoints live under a fixed versioned base URL and expect the
//! headers of the Android client they impersonate. Every call except
//! [`WarpApi::register`] carries a bearer token.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{ApiError, Result};
use crate::model::{Identity, IdentityAccount, IdentityDevice, License};

const API_BASE: &str = "https://api.cloudflareclient.com/v0a1922";

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=UTF-8"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static("okhttp/3.12.1"));
    headers.insert(
        "CF-Client-Version",
        HeaderValue::from_static("a-6.30-3596"),
    );
    headers
}

/// Client for the WARP registration API.
pub struct WarpApi {
    client: reqwest::Client,
}

impl WarpApi {
    /// Create a new API client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{API_BASE}{path}"))
            .headers(default_headers())
    }

    fn authed(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.request(method, path).bearer_auth(token)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        Ok(resp.json().await?)
    }

    /// Register a new device for the given WireGuard public key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] on a non-2xx response and
    /// [`ApiError::Http`] on transport failure.
    pub async fn register(&self, public_key: &str) -> Result<Identity> {
        let tos = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let body = json!({
            "install_id": "",
            "fcm_token": "",
            "tos": tos,
            "key": public_key,
            "type": "Android",
            "model": "PC",
            "locale": "en_US",
            "warp_enabled": true,
        });
        self.execute(self.request(Method::POST, "/reg").json(&body))
            .await
    }

    /// Fetch the registration record for a device.
    pub async fn get_device(&self, token: &str, device_id: &str) -> Result<Identity> {
        self.execute(self.authed(Method::GET, &format!("/reg/{device_id}"), token))
            .await
    }

    /// Fetch the account attached to a device.
    pub async fn get_account(&self, token: &str, device_id: &str) -> Result<IdentityAccount> {
        self.execute(self.authed(Method::GET, &format!("/reg/{device_id}/account"), token))
            .await
    }

    /// Apply a license key to the account.
    pub async fn update_account(
        &self,
        token: &str,
        device_id: &str,
        license: &str,
    ) -> Result<IdentityAccount> {
        let req = self
            .authed(Method::PUT, &format!("/reg/{device_id}/account"), token)
            .json(&json!({ "license": license }));
        self.execute(req).await
    }

    /// Rotate the account license.
    pub async fn reset_license(&self, token: &str, device_id: &str) -> Result<License> {
        self.execute(self.authed(
            Method::POST,
            &format!("/reg/{device_id}/account/license"),
            token,
        ))
        .await
    }

    /// List the devices bound to the same account.
    pub async fn get_bound_devices(
        &self,
        token: &str,
        device_id: &str,
    ) -> Result<Vec<IdentityDevice>> {
        self.execute(self.authed(
            Method::GET,
            &format!("/reg/{device_id}/account/devices"),
            token,
        ))
        .await
    }

    /// Find this device among the account's bound devices.
    pub async fn get_source_bound_device(
        &self,
        token: &str,
        device_id: &str,
    ) -> Result<IdentityDevice> {
        let devices = self.get_bound_devices(token, device_id).await?;
        devices
            .into_iter()
            .find(|device| device.id == device_id)
            .ok_or(ApiError::identity("no matching bound device found"))
    }

    /// Rename or (de)activate another device on the account.
    pub async fn update_bound_device(
        &self,
        token: &str,
        device_id: &str,
        other_device_id: &str,
        name: &str,
        active: bool,
    ) -> Result<IdentityDevice> {
        let req = self
            .authed(
                Method::PATCH,
                &format!("/reg/{device_id}/account/devices/{other_device_id}"),
                token,
            )
            .json(&json!({ "active": active, "name": name }));
        self.execute(req).await
    }

    /// Patch this device's registration record.
    pub async fn update_device(
        &self,
        token: &str,
        device_id: &str,
        data: &serde_json::Value,
    ) -> Result<Identity> {
        let req = self
            .authed(Method::PATCH, &format!("/reg/{device_id}"), token)
            .json(data);
        self.execute(req).await
    }

    /// Delete this device's registration.
    pub async fn delete_device(&self, token: &str, device_id: &str) -> Result<()> {
        let resp = self
            .authed(Method::DELETE, &format!("/reg/{device_id}"), token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        Ok(())
    }
}

impl Default for WarpApi {
    fn default() -> Self {
        Self::new()
    }
}
