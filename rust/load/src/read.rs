//! The read path: issuing PromQL instant queries and judging the answers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};

use crate::config::LoadConfig;
use crate::Error;

const SCOPE_ORG_ID: HeaderName = HeaderName::from_static("x-scope-orgid");

/// What the query endpoint answered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryResponse {
    pub status: u16,
    pub body: String,
}

#[derive(serde::Deserialize)]
struct QueryEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(serde::Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
}

impl QueryResponse {
    /// A successful instant query answers 200 with `{"status": "success", "data": {"resultType":
    /// "vector", ...}}`.  Anything else is a failed read.
    pub fn check(self) -> Result<(), Error> {
        if self.status != 200 {
            return Err(Error::ReadFailed {
                status: self.status,
                body: self.body,
            });
        }
        let envelope: QueryEnvelope = serde_json::from_str(&self.body)
            .map_err(|err| Error::UnexpectedResponse(format!("not a query response: {err}")))?;
        if envelope.status != "success" {
            return Err(Error::UnexpectedResponse(format!(
                "status is {:?}",
                envelope.status
            )));
        }
        match envelope.data {
            Some(data) if data.result_type == "vector" => Ok(()),
            Some(data) => Err(Error::UnexpectedResponse(format!(
                "result type is {:?}",
                data.result_type
            ))),
            None => Err(Error::UnexpectedResponse("no data".to_string())),
        }
    }
}

//////////////////////////////////////////// QueryClient ///////////////////////////////////////////

/// A PromQL client.
#[async_trait::async_trait]
pub trait QueryClient: std::fmt::Debug + Send + Sync {
    /// Evaluate `query` as an instant query at `time` (seconds since the epoch).
    async fn query(&self, query: &str, time: i64) -> Result<QueryResponse, Error>;
}

////////////////////////////////////////// HttpQueryClient /////////////////////////////////////////

/// Options for [HttpQueryClient].
#[derive(Clone, Debug, Default)]
pub struct QueryClientOptions {
    /// Base path of the API, e.g. `http://host/prometheus/api/v1`.
    pub base_url: String,
    pub username: String,
    pub token: String,
    pub tenant_id: Option<String>,
    pub user_agent: String,
}

impl QueryClientOptions {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            base_url: config.read_base_url(),
            username: config.username.clone(),
            token: config.read_token.clone(),
            tenant_id: config.tenant_id().map(str::to_string),
            user_agent: format!("{}/{}", config.service_name, env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Issues `POST {base_url}/query` with a form-encoded body.
#[derive(Clone, Debug)]
pub struct HttpQueryClient {
    client: reqwest::Client,
    url: String,
}

impl HttpQueryClient {
    pub fn new(options: QueryClientOptions) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&options.user_agent)?);
        if !options.username.is_empty() || !options.token.is_empty() {
            let credentials = BASE64.encode(format!("{}:{}", options.username, options.token));
            let mut value = header_value(&format!("Basic {credentials}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(tenant_id) = options.tenant_id.as_deref() {
            headers.insert(SCOPE_ORG_ID, header_value(tenant_id)?);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Internal(format!("could not build http client: {err}")))?;
        let url = format!("{}/query", options.base_url.trim_end_matches('/'));
        Ok(Self { client, url })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|err| Error::Config(format!("invalid header value {value:?}: {err}")))
}

#[async_trait::async_trait]
impl QueryClient for HttpQueryClient {
    async fn query(&self, query: &str, time: i64) -> Result<QueryResponse, Error> {
        let time = time.to_string();
        let resp = self
            .client
            .post(&self.url)
            .form(&[("query", query), ("time", time.as_str())])
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        Ok(QueryResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    const VECTOR: &str = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

    #[test]
    fn classification() {
        let ok = QueryResponse {
            status: 200,
            body: VECTOR.to_string(),
        };
        assert!(ok.check().is_ok());

        let bad_status = QueryResponse {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert!(matches!(
            bad_status.check(),
            Err(Error::ReadFailed { status: 503, .. })
        ));

        for body in [
            "not json",
            r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#,
            r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#,
            r#"{"status":"success"}"#,
        ] {
            let resp = QueryResponse {
                status: 200,
                body: body.to_string(),
            };
            assert!(
                matches!(resp.check(), Err(Error::UnexpectedResponse(_))),
                "{body}"
            );
        }
    }

    #[tokio::test]
    async fn posts_form_with_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/prometheus/api/v1/query")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .header("user-agent", "tsdb-load/test")
                    // base64("user:secret")
                    .header("authorization", "Basic dXNlcjpzZWNyZXQ=")
                    .header("x-scope-orgid", "tenant-1")
                    .form_urlencoded_tuple("query", "up{host=~\"host1|host2\"}")
                    .form_urlencoded_tuple("time", "1700000000");
                then.status(200).body(VECTOR);
            })
            .await;
        let client = HttpQueryClient::new(QueryClientOptions {
            base_url: server.url("/prometheus/api/v1"),
            username: "user".to_string(),
            token: "secret".to_string(),
            tenant_id: Some("tenant-1".to_string()),
            user_agent: "tsdb-load/test".to_string(),
        })
        .unwrap();
        let resp = client
            .query("up{host=~\"host1|host2\"}", 1_700_000_000)
            .await
            .unwrap();
        assert_eq!(200, resp.status);
        assert!(resp.check().is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_auth_without_credentials() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/api/v1/query")
                    .header_missing("authorization")
                    .header_missing("x-scope-orgid");
                then.status(500).body("boom");
            })
            .await;
        let client = HttpQueryClient::new(QueryClientOptions {
            base_url: server.url("/api/v1/"),
            user_agent: "tsdb-load/test".to_string(),
            ..Default::default()
        })
        .unwrap();
        let resp = client.query("up", 1).await.unwrap();
        assert!(matches!(
            resp.check(),
            Err(Error::ReadFailed { status: 500, .. })
        ));
        mock.assert_async().await;
    }
}
