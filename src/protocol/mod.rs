pub mod jsonrpc;
pub mod lifecycle;
pub mod transport;
