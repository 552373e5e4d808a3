pub mod http;

pub use http::HttpGroupDirectory;
