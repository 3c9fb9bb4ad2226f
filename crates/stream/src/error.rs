//! Event stream consumer error types.

/// Errors from stream and bulk-fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The server rejected the request or handshake with 401; carries
    /// the server-provided body verbatim.
    #[error("not authorized: {message}")]
    Unauthorized {
        /// Body text returned by the server.
        message: String,
    },

    /// The server answered 400.
    #[error("bad client request")]
    BadRequest,

    /// Any other non-200 bulk-fetch response.
    #[error("unknown issue when making HTTP request to the event stream endpoint (status {status})")]
    NotOk {
        /// The HTTP status code.
        status: u16,
    },

    /// The server's response was malformed (missing content type or
    /// multipart boundary).
    #[error("bad server response")]
    BadResponse,

    /// The endpoint URL could not be parsed or has an unusable scheme.
    #[error("invalid event stream endpoint '{url}': {detail}")]
    InvalidEndpoint { url: String, detail: String },

    /// Dial, tunnel, or handshake failure; names the configured endpoint
    /// so operators can check their configuration.
    #[error("error dialing event stream server: {detail}.\nPlease check the configured endpoint ({endpoint}).")]
    Dial { endpoint: String, detail: String },

    /// The HTTP proxy refused the CONNECT request; carries the proxy's
    /// status line.
    #[error("proxy refused tunnel: {status_line}")]
    ProxyConnect { status_line: String },

    /// `close()` was called with no live connection.
    #[error("connection does not exist")]
    ConnectionDoesNotExist,

    /// The server ended the stream (close frame or EOF).
    #[error("stream closed by server")]
    StreamClosed,

    /// A bulk metrics response carried a platform error instead of data.
    #[error("upstream error: {message}")]
    Upstream { message: String },

    /// A connection-level read failure ended the stream.
    #[error("stream transport error: {detail}")]
    Transport { detail: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
