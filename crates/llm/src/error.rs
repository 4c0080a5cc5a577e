use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GenerationError {
    /// The client has no credential; surfaced before any network traffic.
    #[snafu(display("generation client is not configured with an API key"))]
    Unavailable { stage: &'static str },
    /// The endpoint rejected the request itself (4xx other than 429); retrying
    /// the same payload cannot succeed.
    #[snafu(display("generation request was rejected with status {status}: {body}"))]
    Rejected {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("generation endpoint rate-limited the request (status {status})"))]
    RateLimited {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to build generation http client"))]
    HttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to reach generation endpoint"))]
    Connection {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("generation endpoint failed with status {status}: {body}"))]
    Api {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("generation response payload could not be decoded"))]
    MalformedResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("generation response carried no content"))]
    EmptyCompletion { stage: &'static str },
    /// Every attempt was spent on transient failures; carries the last one.
    #[snafu(display("all {attempts} generation attempts failed: {source}"))]
    Exhausted {
        stage: &'static str,
        attempts: u32,
        source: Box<GenerationError>,
    },
}

impl GenerationError {
    /// The retry policy only re-dispatches rate-limit, connection, and generic
    /// API failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. }
                | GenerationError::Connection { .. }
                | GenerationError::Api { .. }
        )
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_connection_and_api_failures_are_transient() {
        let rate_limited = GenerationError::RateLimited {
            stage: "t",
            status: 429,
            body: String::new(),
        };
        let api = GenerationError::Api {
            stage: "t",
            status: 500,
            body: String::new(),
        };
        let rejected = GenerationError::Rejected {
            stage: "t",
            status: 400,
            body: String::new(),
        };
        let unavailable = GenerationError::Unavailable { stage: "t" };

        assert!(rate_limited.is_transient());
        assert!(api.is_transient());
        assert!(!rejected.is_transient());
        assert!(!unavailable.is_transient());
    }
}
