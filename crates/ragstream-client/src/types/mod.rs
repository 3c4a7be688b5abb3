pub mod citation;
pub mod chunk;
pub mod request;

pub use citation::{Citation, MAX_PREVIEW_CHARS};
pub use chunk::Chunk;
pub use request::{QueryMode, QueryRequest, QueryResponse, MAX_QUERY_CHARS, MAX_TOP_K};
