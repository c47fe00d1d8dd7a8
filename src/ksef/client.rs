use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, header};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::errors::{ApiError, ApiResult};
use super::models::{
    AuthInitResponse, AuthStatusResponse, CertificateList, ChallengeResponse,
    InvoiceMetadataPage, KsefTokenRequest, MetadataQuery, PublicKeyCertificate, RedeemResponse,
};

/// Default per-request timeout for API calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const INVOICE_ACCEPT: &str = "application/xml, application/json;q=0.9, */*;q=0.8";

/// Raw body of an invoice download together with its declared content type.
#[derive(Debug, Clone, Default)]
pub struct RawInvoice {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Thin typed wrapper over the KSeF REST endpoints.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct KsefClient {
    http: Client,
    base_url: String,
}

impl KsefClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("ksef-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_http_client(http, base_url))
    }

    pub fn with_http_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /security/public-key-certificates`
    pub async fn public_key_certificates(&self) -> ApiResult<Vec<PublicKeyCertificate>> {
        const ENDPOINT: &str = "/security/public-key-certificates";
        let list: CertificateList = self
            .send_json(ENDPOINT, self.http.get(self.url(ENDPOINT)))
            .await?;
        Ok(list.into())
    }

    /// `POST /auth/challenge`
    pub async fn challenge(&self) -> ApiResult<ChallengeResponse> {
        const ENDPOINT: &str = "/auth/challenge";
        self.send_json(ENDPOINT, self.http.post(self.url(ENDPOINT))).await
    }

    /// `POST /auth/ksef-token`
    pub async fn submit_ksef_token(
        &self,
        request: &KsefTokenRequest,
    ) -> ApiResult<AuthInitResponse> {
        const ENDPOINT: &str = "/auth/ksef-token";
        self.send_json(ENDPOINT, self.http.post(self.url(ENDPOINT)).json(request))
            .await
    }

    /// `GET /auth/{referenceNumber}`, authorised with the temporary authentication token.
    pub async fn auth_status(
        &self,
        reference_number: &str,
        authentication_token: &str,
    ) -> ApiResult<AuthStatusResponse> {
        let endpoint = format!("/auth/{}", urlencoding::encode(reference_number));
        let request = self
            .http
            .get(self.url(&endpoint))
            .bearer_auth(authentication_token);
        self.send_json(&endpoint, request).await
    }

    /// `POST /auth/token/redeem`, authorised with the temporary authentication token.
    pub async fn redeem_token(&self, authentication_token: &str) -> ApiResult<RedeemResponse> {
        const ENDPOINT: &str = "/auth/token/redeem";
        let request = self
            .http
            .post(self.url(ENDPOINT))
            .bearer_auth(authentication_token);
        self.send_json(ENDPOINT, request).await
    }

    /// `POST /invoices/query/metadata?pageSize&pageOffset&sortOrder=Asc`
    pub async fn query_invoice_metadata(
        &self,
        access_token: &str,
        query: &MetadataQuery,
        page_size: usize,
        page_offset: usize,
    ) -> ApiResult<InvoiceMetadataPage> {
        const ENDPOINT: &str = "/invoices/query/metadata";
        let request = self
            .http
            .post(self.url(ENDPOINT))
            .bearer_auth(access_token)
            .query(&[
                ("pageSize", page_size.to_string()),
                ("pageOffset", page_offset.to_string()),
                ("sortOrder", "Asc".to_string()),
            ])
            .json(query);
        self.send_json(ENDPOINT, request).await
    }

    /// `GET /invoices/ksef/{ksefNumber}` as raw bytes.
    pub async fn fetch_invoice(
        &self,
        access_token: &str,
        ksef_number: &str,
    ) -> ApiResult<RawInvoice> {
        let endpoint = format!("/invoices/ksef/{}", urlencoding::encode(ksef_number));
        let request = self
            .http
            .get(self.url(&endpoint))
            .bearer_auth(access_token)
            .header(header::ACCEPT, INVOICE_ACCEPT);

        let response = self.send(&endpoint, request).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        Ok(RawInvoice {
            bytes,
            content_type,
        })
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(endpoint, status = status.as_u16(), "KSeF response");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> ApiResult<T> {
        let response = self.send(endpoint, request).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}
