//! Value types shared between the trellis middleware and its transports.
//!
//! Nothing in this crate performs I/O. It describes:
//! - the request/response envelope handed to the dispatcher,
//! - pagination cursors,
//! - the JSON frames exchanged on the event stream,
//! - the platform data models used as typed results.

mod envelope;
mod error;
mod frame;
pub mod models;
mod pagination;

pub use envelope::{
    Arguments, ErrorLocation, Operation, OperationId, RequestBuilder, ResponseError, TypedRequest,
    TypedResponse, WireCall, DECODE_ERROR, INTERNAL_ERROR, TRANSPORT_ERROR,
};
pub use error::InvalidArgument;
pub use frame::{ChannelEvent, ChannelName, InboundFrame, OutboundFrame};
pub use pagination::PaginationOptions;
