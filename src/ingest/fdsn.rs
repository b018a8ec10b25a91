//! GeoNet FDSN event web-service client.
//!
//! Every request goes through the circuit breaker first and the retrying
//! HTTP client second: the breaker decides whether to call upstream at
//! all, the retry loop absorbs transient failures within that call.
//!
//! API docs: https://www.geonet.org.nz/data/access/FDSN

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::quakeml::{XmlNode, extract_focal_mechanism, parse_quakeml};
use super::text::{TextParse, parse_text_response};
use crate::error::UpstreamError;
use crate::http::HttpResponse;
use crate::model::{FocalMechanism, GeoBounds};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RequestOptions, ResilientClient, RetryOptions,
};

pub const GEONET_FDSN_BASE_URL: &str = "https://service.geonet.org.nz/fdsnws/event/1/query";

/// Name the FDSN breaker reports in logs and stats.
pub const FDSN_BREAKER_NAME: &str = "geonet-fdsn";

/// Timestamp format the service accepts for `starttime`/`endtime`.
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// How much of an error-as-200 body is kept on the error.
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Xml,
}

impl ResponseFormat {
    fn as_param(self) -> &'static str {
        match self {
            ResponseFormat::Text => "text",
            ResponseFormat::Xml => "xml",
        }
    }

    fn accept(self) -> &'static str {
        match self {
            ResponseFormat::Text => "text/plain",
            ResponseFormat::Xml => "application/xml",
        }
    }
}

/// Filters for one event query. Unset fields are left off the URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FdsnQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub bounds: Option<GeoBounds>,
    pub min_depth: Option<f64>,
    pub max_depth: Option<f64>,
    pub min_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
    pub event_id: Option<String>,
    pub order_by: Option<String>,
}

impl FdsnQuery {
    pub fn for_event(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            ..Self::default()
        }
    }
}

/// Build the query URL for `query` in the given response format.
pub fn build_query_url(base_url: &str, query: &FdsnQuery, format: ResponseFormat) -> String {
    let mut params: Vec<(&str, String)> = Vec::new();

    if let Some(start) = query.start_time {
        params.push(("starttime", start.format(QUERY_TIME_FORMAT).to_string()));
    }
    if let Some(end) = query.end_time {
        params.push(("endtime", end.format(QUERY_TIME_FORMAT).to_string()));
    }
    if let Some(b) = &query.bounds {
        params.push(("minlatitude", b.min_latitude.to_string()));
        params.push(("maxlatitude", b.max_latitude.to_string()));
        params.push(("minlongitude", b.min_longitude.to_string()));
        params.push(("maxlongitude", b.max_longitude.to_string()));
    }
    let numeric = [
        ("mindepth", query.min_depth),
        ("maxdepth", query.max_depth),
        ("minmagnitude", query.min_magnitude),
        ("maxmagnitude", query.max_magnitude),
    ];
    for (name, value) in numeric {
        if let Some(v) = value {
            params.push((name, v.to_string()));
        }
    }
    if let Some(id) = &query.event_id {
        params.push(("eventid", id.clone()));
    }
    if let Some(order) = &query.order_by {
        params.push(("orderby", order.clone()));
    }
    params.push(("format", format.as_param().to_string()));

    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}{joined}")
}

/// Reject HTTP 200 bodies that are really error messages.
///
/// The service sometimes answers 200 with an HTML error page or a plain
/// "Error 400: ..." string; parsing those as data would silently drop
/// every row.
pub fn check_error_body(body: &str) -> Result<(), UpstreamError> {
    let head: String = body.trim_start().chars().take(32).collect::<String>().to_lowercase();
    let looks_like_error = head.starts_with("<!doctype html")
        || head.starts_with("<html")
        || head.starts_with("an error")
        || head.starts_with("error");
    if looks_like_error {
        let preview: String = body.trim().chars().take(ERROR_BODY_PREVIEW).collect();
        return Err(UpstreamError::ErrorBody(preview));
    }
    Ok(())
}

/// Breaker classification for FDSN calls: "no data" is not a failure.
pub fn is_breaker_failure(err: &UpstreamError) -> bool {
    !err.is_no_data()
}

/// Circuit breaker configured for the FDSN service.
pub fn fdsn_breaker(config: CircuitBreakerConfig) -> CircuitBreaker<UpstreamError> {
    CircuitBreaker::new(FDSN_BREAKER_NAME, config).with_failure_classifier(is_breaker_failure)
}

#[derive(Clone)]
pub struct FdsnClient {
    base_url: String,
    http: ResilientClient,
    breaker: Arc<CircuitBreaker<UpstreamError>>,
    retry: RetryOptions,
}

impl FdsnClient {
    pub fn new(
        base_url: impl Into<String>,
        http: ResilientClient,
        breaker: Arc<CircuitBreaker<UpstreamError>>,
        retry: RetryOptions,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            breaker,
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn breaker(&self) -> &CircuitBreaker<UpstreamError> {
        &self.breaker
    }

    /// Fetch an event list in text format.
    ///
    /// "No data" (204/404 or an empty body) is an empty parse, not an error.
    pub async fn fetch_events(&self, query: &FdsnQuery) -> Result<TextParse, UpstreamError> {
        let url = build_query_url(&self.base_url, query, ResponseFormat::Text);
        match self.get(&url, ResponseFormat::Text).await? {
            Some(body) => parse_text_response(&body),
            None => Ok(TextParse::default()),
        }
    }

    /// Fetch a QuakeML document; `None` when the service has no data.
    pub async fn fetch_quakeml(&self, query: &FdsnQuery) -> Result<Option<XmlNode>, UpstreamError> {
        let url = build_query_url(&self.base_url, query, ResponseFormat::Xml);
        match self.get(&url, ResponseFormat::Xml).await? {
            Some(body) => parse_quakeml(&body).map(Some),
            None => Ok(None),
        }
    }

    /// Focal mechanism for one event, when GeoNet has published one.
    pub async fn fetch_focal_mechanism(
        &self,
        event_id: &str,
    ) -> Result<Option<FocalMechanism>, UpstreamError> {
        let doc = self.fetch_quakeml(&FdsnQuery::for_event(event_id)).await?;
        Ok(doc.as_ref().and_then(extract_focal_mechanism))
    }

    /// One breaker-gated, retried GET. `Ok(None)` means "no data".
    ///
    /// Body checks run inside the breaker, so an error page served as
    /// HTTP 200 counts as a failure like a 5xx does.
    async fn get(&self, url: &str, format: ResponseFormat) -> Result<Option<String>, UpstreamError> {
        tracing::debug!(source = "FDSN", url, "Requesting");
        let request = RequestOptions::accept(format.accept());
        let request = &request;
        self.breaker
            .call(|| async move {
                match self.http.retry_fetch(url, request, &self.retry).await {
                    Ok(response) => accept_body(response, format),
                    Err(err) if err.is_no_data() => Ok(None),
                    Err(err) => Err(UpstreamError::Fetch(err)),
                }
            })
            .await
            .map_err(UpstreamError::from)
    }
}

/// Body of a successful response, `None` for 204 or an empty text body.
fn accept_body(response: HttpResponse, format: ResponseFormat) -> Result<Option<String>, UpstreamError> {
    if response.status == 204 || response.body.trim().is_empty() {
        if format == ResponseFormat::Xml && response.status != 204 {
            return Err(UpstreamError::XmlParse("empty document".to_string()));
        }
        return Ok(None);
    }
    check_error_body(&response.body)?;
    Ok(Some(response.body))
}
