pub mod error;
pub mod requests;
pub mod responses;


pub use error::{Result, WorkrpcError};
pub use requests::{MethodName, Request, RequestId, RpcArgs};
pub use responses::{Outcome, Response, RpcResult};
