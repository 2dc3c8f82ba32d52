//! HTTP API Module
//!
//! Client operations, replica replay and cluster management.

mod http;

pub use http::{
    create_router, AppState, ErrorResponse, HttpServer, InsertRequest, IsWriterResponse,
    MessageResponse, NodesResponse, UpdateRequest, DeleteRequest,
};
