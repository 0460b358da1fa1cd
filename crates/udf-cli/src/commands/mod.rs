pub mod info;
pub mod reconstruct;
pub mod serve_request;
pub mod smooth;
