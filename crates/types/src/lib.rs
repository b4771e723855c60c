//! # WFL Types
//!
//! Core data model shared across the WFL runner workspace: the Graph
//! Document (Workflow/Step/Tool), the polymorphic Value/File/Directory
//! model, the Runtime Context exposed to expressions, the Task record and
//! its state machine, the Worker Protocol wire types, and the error
//! taxonomy threaded through every other crate.
//!
//! ## Modules
//!
//! - **`document`**: Graph Document, Workflow, Step, Tool, parameter
//!   declarations (spec §3, §4.B).
//! - **`value`**: the polymorphic `Value` sum type plus File/Directory
//!   objects (spec §3, §9 "Polymorphic values").
//! - **`context`**: the Runtime Context (`outdir`/`tmpdir`/`cores`/`ram`/
//!   `exitCode`) exposed to expressions (spec §3, §4.A).
//! - **`task`**: the Task record and its validated state machine (spec §3
//!   "Task" lifecycle notes).
//! - **`worker`**: Worker Protocol envelope and endpoint request/response
//!   bodies (spec §4.J, §6).
//! - **`error`**: the seven-kind error taxonomy (spec §7).

pub mod context;
pub mod document;
pub mod error;
pub mod task;
pub mod value;
pub mod worker;

pub use context::RuntimeContext;
pub use document::{
    ArgumentEntry, BaseCommand, DocumentClass, ExecutorKind, GpuRequirement, GraphDocument, HintsBlock, InputBinding, InputParameter,
    LanguageVersion, OutputBinding, OutputParameter, ParameterDoc, RedirectTemplate, ScatterMethod, SourceReference, Step, StepInput, Tool,
    ToolInput, ToolOutput, ToolRequirements, TypeTag, Workflow,
};
pub use error::{CollectKind, ExecutionKind, ExpressionKind, InternalKind, ProtocolKind, StageKind, ValidationKind, WflError, WflResult};
pub use task::{Task, TaskState};
pub use value::{DirectoryObject, FileObject, LOAD_CONTENTS_LIMIT, Value, stringify};
pub use worker::{
    Ack, Envelope, EnvelopeStatus, ErrorBody, HeartbeatRequest, Pagination, RegisterRequest, RegisterResponse, RuntimeCapabilities,
    TaskCompleteRequest, TaskStatusUpdate, WorkAssignment, Worker,
};
