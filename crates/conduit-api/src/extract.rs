//! Request parts shared by the ingestion and webhook handlers.

use axum::{body::Body, http::HeaderMap};
use bytes::Bytes;
use conduit_core::{ConduitError, TenantKey};
use serde::Deserialize;

/// Header carrying the tenant key.
pub const TENANT_HEADER: &str = "x-tenant-key";

/// Header selecting the webhook platform.
pub const PLATFORM_HEADER: &str = "x-webhook-platform";

/// Query parameters understood by the handlers. Unknown ones are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    /// Tenant key, used when the header is absent.
    pub tenant_key: Option<String>,
    /// Webhook token for token authentication.
    pub token: Option<String>,
    /// Webhook platform.
    pub platform: Option<String>,
}

/// Resolves the tenant from the `X-Tenant-Key` header or the `tenant_key`
/// query parameter. The header wins when both are present.
///
/// # Errors
///
/// Returns `ConduitError::MissingTenant` when neither carries a non-blank
/// value.
pub fn tenant_key(headers: &HeaderMap, params: &QueryParams) -> Result<TenantKey, ConduitError> {
    let from_header = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_query = params.tenant_key.as_deref().map(str::trim).filter(|v| !v.is_empty());

    from_header.or(from_query).map(TenantKey::new).ok_or(ConduitError::MissingTenant)
}

/// Selected webhook platform name; the query parameter wins over the header.
pub fn platform_name<'a>(headers: &'a HeaderMap, params: &'a QueryParams) -> Option<&'a str> {
    params
        .platform
        .as_deref()
        .or_else(|| headers.get(PLATFORM_HEADER).and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Reads the body, enforcing the size limit.
///
/// # Errors
///
/// Returns `ConduitError::PayloadTooLarge` when the declared or actual size
/// exceeds `limit`.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ConduitError> {
    let declared = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(size) = declared.filter(|size| *size > limit) {
        return Err(ConduitError::PayloadTooLarge { size_bytes: size, limit_bytes: limit });
    }

    axum::body::to_bytes(body, limit).await.map_err(|_| ConduitError::PayloadTooLarge {
        size_bytes: declared.unwrap_or(limit.saturating_add(1)),
        limit_bytes: limit,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("from-header"));
        let params = QueryParams { tenant_key: Some("from-query".into()), ..QueryParams::default() };

        assert_eq!(tenant_key(&headers, &params).unwrap().as_str(), "from-header");
        assert_eq!(tenant_key(&HeaderMap::new(), &params).unwrap().as_str(), "from-query");
    }

    #[test]
    fn blank_tenant_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("   "));

        assert!(matches!(
            tenant_key(&headers, &QueryParams::default()),
            Err(ConduitError::MissingTenant)
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let body = Body::from(vec![b'x'; 64]);
        let error = read_body(&HeaderMap::new(), body, 16).await.unwrap_err();
        assert!(matches!(error, ConduitError::PayloadTooLarge { limit_bytes: 16, .. }));

        let body = Body::from(vec![b'x'; 16]);
        assert_eq!(read_body(&HeaderMap::new(), body, 16).await.unwrap().len(), 16);
    }
}
