//! Control-plane protocol between the harbor host and its sandbox.
//!
//! One duplex byte stream (the child's standard streams) carries
//! newline-delimited JSON envelopes in both directions:
//!
//! ```text
//! {"type":"request","id":"<uuid>","payload":{"action":"<name>","payload":{...}}}
//! {"type":"response","id":"<uuid>","payload":{"action":"<name>","payload":{"success":true,"result":{...}}}}
//! ```
//!
//! # Components
//!
//! - **Frame codec** ([`frame`]): byte chunks to lines to envelopes, and back
//! - **Envelope** ([`envelope`]): `{type, id, payload}` plus the tagged
//!   success/failure [`Outcome`]
//! - **Action contract table** ([`actions`], [`db`]): closed enums, one
//!   variant per action, each with a typed payload
//! - **Correlator** ([`correlator`]): pending-request table keyed by id,
//!   with per-call timeouts
//! - **Connection** ([`connection`]): one writer, one correlator for the
//!   calls this side issues, and any number of reader streams dispatching
//!   inbound requests to a [`RequestHandler`]
//!
//! Each side owns its own correlator; a side only ever completes ids it
//! generated, so both directions share one stream without ambiguity.

pub mod actions;
pub mod codes;
pub mod connection;
pub mod correlator;
pub mod db;
pub mod envelope;
mod error;
pub mod frame;

pub use actions::{
    AnalyzeObjectPayload, ContentMetadata, ContentUrls, ExecutionOptions, HostRequest,
    HostResponse, HostSide, InitPayload, InitResult, InstallMapping, MappingAck,
    MetadataUrlQuery, MetadataUrls, ObjectRef, SandboxRequest, SandboxResponse, SandboxSide,
    SystemRequestPayload, TaskPayload, TaskResult, UiBundleDescriptor, UiBundleQuery,
    WorkerConfigQuery, WorkerExecConfig, WorkerHttpRequest, WorkerHttpResponse,
};
pub use connection::{Connection, RequestHandler, Side};
pub use correlator::Correlator;
pub use db::{
    DbBatch, DbClientSide, DbOpen, DbRequest, DbResponse, DbServerSide, DbSessionInfo,
    DbStatement,
};
pub use envelope::{Action, ActionReply, Envelope, Outcome, ServiceError};
pub use error::{IpcError, IpcResult};
pub use frame::{FrameSink, LineDecoder, MAX_FRAME_SIZE};
