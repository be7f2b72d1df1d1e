//! HTTP Protocol Constants

// Protocol version used for every reply
pub const HTTP_VERSION: &str = "HTTP/1.1";

// Methods
pub const METHOD_CONNECT: &str = "CONNECT";

// Line terminators
pub const CRLF: &str = "\r\n";
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

// Upper bound for a request head (request line + headers)
pub const MAX_REQUEST_HEAD_SIZE: usize = 8192;

// Acknowledgement body sent once the tunnel is up
pub const TUNNEL_ESTABLISHED_MESSAGE: &str = "Connection established! Go ahead!";

// Authority separator
pub const PORT_SEPARATOR: char = ':';
