//! Kernel protocol: Jupyter kernel WebSocket messages as seen by the proxy,
//! the result payloads delivered to callers, the kernel registry record,
//! and the kernel gateway REST DTOs.

pub mod gateway;
pub mod message;
pub mod record;
pub mod result;

pub use gateway::{CreateKernelRequest, KernelModel, KernelSpecs};
pub use message::{
    canonical_request_id, Channel, ExecuteContent, ExecuteRequest, ExecutionState, IopubEvent,
    KernelMessage, MessageHeader, PROTOCOL_VERSION,
};
pub use record::{alias_for, AvailableKernel, KernelRecord};
pub use result::{ExecutionResult, ResultBody};
