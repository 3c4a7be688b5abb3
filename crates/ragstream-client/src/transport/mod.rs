mod http;
mod reader;

pub use http::HttpTransport;
pub use reader::TransportReader;
