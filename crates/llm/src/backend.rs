use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use snafu::{OptionExt, ResultExt};

use super::error::{
    ApiSnafu, ConnectionSnafu, EmptyCompletionSnafu, GenerationResult, HttpClientSnafu,
    MalformedResponseSnafu, RateLimitedSnafu, RejectedSnafu,
};
use super::types::{ChatCompletionResponse, CompletionRequest};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Single-attempt transport seam under the retrying client. Test doubles and
/// alternative providers plug in here.
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, GenerationResult<String>>;
}

/// OpenAI-compatible `/chat/completions` transport over reqwest.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> GenerationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context(HttpClientSnafu {
                stage: "http-backend-build-client",
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn dispatch(&self, request: &CompletionRequest) -> GenerationResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context(ConnectionSnafu {
                stage: "http-backend-send",
            })?;

        let status = response.status();
        let body = response.text().await.context(ConnectionSnafu {
            stage: "http-backend-read-body",
        })?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), body));
        }

        let decoded: ChatCompletionResponse =
            serde_json::from_str(&body).context(MalformedResponseSnafu {
                stage: "http-backend-decode",
            })?;

        decoded
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .context(EmptyCompletionSnafu {
                stage: "http-backend-extract-content",
            })
    }
}

impl CompletionBackend for HttpBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, GenerationResult<String>> {
        Box::pin(self.dispatch(request))
    }
}

/// Maps an HTTP failure status onto the retry taxonomy: 429 is rate limiting,
/// remaining 4xx are request rejections, everything else is a generic API
/// fault.
fn classify_status(status: u16, body: String) -> super::error::GenerationError {
    if status == 429 {
        return RateLimitedSnafu {
            stage: "http-backend-status",
            status,
            body,
        }
        .build();
    }

    if (400..500).contains(&status) {
        return RejectedSnafu {
            stage: "http-backend-status",
            status,
            body,
        }
        .build();
    }

    ApiSnafu {
        stage: "http-backend-status",
        status,
        body,
    }
    .build()
}
