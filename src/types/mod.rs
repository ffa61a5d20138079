//! Core request/response types shared by every layer.

pub mod request;
pub mod response;

pub use request::{
    CachePolicy, ErrorFn, Method, Priority, ProgressFn, RequestDescriptor, RetryCondition, SuccessFn,
    TransformFn,
};
pub use response::{Progress, Response};
