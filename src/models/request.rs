use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use hyper::{Body, Method, Request, Uri};
use url::Url;

use crate::error::ConfigError;
use crate::models::dsl_model::{Auth, DslConfig, HttpMethod};

/// Method, URI and headers of the scenario request, resolved once at startup.
/// Every iteration builds a fresh bodiless [`Request`] from it.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::DELETE => Method::DELETE,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::HEAD => Method::HEAD,
            HttpMethod::OPTIONS => Method::OPTIONS,
        }
    }
}

impl RequestConfig {
    pub fn from_dsl(config: &DslConfig) -> Result<Self, ConfigError> {
        let invalid_target = |reason: String| ConfigError::InvalidTarget {
            url: config.target.clone(),
            reason,
        };

        let mut url = Url::parse(&config.target).map_err(|e| invalid_target(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid_target(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }

        if let Some(params) = &config.query_params {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params.iter() {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = HeaderMap::new();
        if let Some(extra) = &config.headers {
            for (name, value) in extra {
                insert_header(&mut headers, name, value)?;
            }
        }

        match &config.auth {
            Some(Auth::Basic { username, password }) => {
                let encoded = BASE64.encode(format!("{}:{}", username, password));
                insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Basic {}", encoded))?;
            }
            Some(Auth::Bearer { token }) => {
                insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Bearer {}", token))?;
            }
            Some(Auth::ApiKey {
                key_name,
                key_value,
                in_header: true,
            }) => {
                insert_header(&mut headers, key_name, key_value)?;
            }
            Some(Auth::ApiKey {
                key_name,
                key_value,
                in_header: false,
            }) => {
                url.query_pairs_mut().append_pair(key_name, key_value);
            }
            Some(Auth::None) | None => {}
        }

        // `query_pairs_mut` leaves a dangling `?` when nothing was appended.
        if url.query() == Some("") {
            url.set_query(None);
        }

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| invalid_target(e.to_string()))?;

        Ok(Self {
            method: config.method.into(),
            uri,
            headers,
        })
    }

    pub fn build(&self) -> Result<Request<Body>, hyper::http::Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        builder.body(Body::empty())
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    headers.insert(header_name, header_value);
    Ok(())
}
