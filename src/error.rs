#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Serde failed: {}", .source)]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("Deserialize failed: {}", .source)]
    SerdeYaml {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("Failed to parse url: {}", .source)]
    Url {
        #[from]
        source: url::ParseError,
    },
    #[error("Establish connection failed: {}", .source)]
    Tungstenite {
        #[from]
        source: tokio_tungstenite::tungstenite::error::Error,
    },
    #[error("Returned http status is failure.")]
    Http(String),
    #[error("Http request failed: {}", .source)]
    Request {
        #[from]
        source: reqwest::Error,
    },
    /// Error sending websocket message
    #[error("Send failed")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),
    /// Error reading from websocket
    #[error("Read failed")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("Failed to send timer event: {}", .source)]
    Timer {
        #[from]
        source: tokio::sync::broadcast::error::SendError<crate::channel::Post>,
    },
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,
    #[error("Expected a tungstenite::Message")]
    ExpectedTungsteniteMessage,
    #[error("Post is not a map.")]
    PostNotValidMap,
    /// Error return by the crate opentelemetry
    #[error("Metrics failed: {}", .source)]
    OpenTelemetry {
        #[from]
        source: opentelemetry::metrics::MetricsError,
    },
    /// Error returned when building the pipeline configuration
    #[error("Failed to build config")]
    Config(String),
    // Error returned when channel is not setup
    #[error("Setup is not complete")]
    Setup,
    #[error("IO failure: {}", .source)]
    IO {
        #[from]
        source: std::io::Error,
    },
    #[error("Cannot process event")]
    UnprocessableEvent(String),
    /// Error returned when a tracker window is not positive
    #[error("Lookback must be positive, got {0}")]
    Lookback(usize),
    /// Error returned when the bootstrap history cannot seed a tracker
    #[error("Invalid bootstrap history: {0}")]
    History(String),
    #[error("Failed to parse number: {}", .source)]
    ParseFloat {
        #[from]
        source: std::num::ParseFloatError,
    },
    #[error("Invalid millisecond timestamp: {0}")]
    Timestamp(i64),
}
