mod api;
pub mod config;
pub mod errors;
mod gateway;
pub mod logging;
pub mod providers;
pub mod report;
mod request;
pub mod retry;
pub mod scheduler;
pub mod step;
pub mod store;
pub mod trace;
pub mod types;
mod validator;

pub use crate::api::{ContentBlock, ImageSource, Message};
pub use crate::config::{MissingScreenshotPolicy, ProviderKind, StorePaths, ValidatorConfig};
pub use crate::errors::{ConfigError, GatewayError, ProviderError, StepError, TaskError};
pub use crate::gateway::{GatewayReply, ModelGateway, ParsedResponse, StepRevision, parse_reply};
pub use crate::report::{CorrectedTextMap, StepResult, TaskResult};
pub use crate::request::{RequestBuilder, Screenshot, VisionRequest};
pub use crate::step::{NeighborContext, Step, StepMode, StepText};
pub use crate::store::{FsTaskStore, TaskStore};
pub use crate::types::{ModelId, StepKey, TaskId};
pub use crate::validator::{RunStage, TaskOutcome, ValidatorService};
