//! `sage-kernel-proxy` runs code on remote Jupyter kernels for SAGE3
//! smartbits.
//!
//! # Architecture
//!
//! ```text
//!   widget ──execute(cmd, cb)──▶ KernelProxy ──add_client──▶ KernelSession ──ws──▶ kernel gateway
//!                                    │                          │ reader task
//!                                    │                          ▼
//!                                    │                     PendingTable ──cb(result)──▶ widget
//!                                    ├── KernelGateway (REST: list / create / delete / interrupt)
//!                                    └── KernelRegistry ── RegistryStore (Redis JSON `JUPYTER:KERNELS`)
//! ```
//!
//! `execute` returns as soon as the request is on the socket. Results are
//! delivered later, on the session's reader task, through the callback
//! supplied with the command: once per output message, then a final
//! payload marked `done` when the kernel reports `idle`.

pub mod correlation;
pub mod gateway;
pub mod proxy;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use correlation::{Dispatch, PendingTable};
pub use gateway::{from_reqwest, ChannelsEndpoint, KernelGateway, RestKernelGateway};
pub use proxy::KernelProxy;
pub use reconnect::ReconnectBackoff;
pub use registry::{KernelRegistry, NewKernel};
pub use session::{KernelSession, SessionState};
pub use store::{MemoryRegistryStore, RedisRegistryStore, RegistryStore};
pub use types::{Accepted, ExecuteCommand, ResultCallback, SubmitError};

pub use sage_protocol::{AvailableKernel, ExecutionResult, KernelModel, KernelRecord, ResultBody};
