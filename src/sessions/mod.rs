//! Session management: shared data types and the live-session registry.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use registry::SessionRegistry;
pub use types::{
    Attachment, AttachmentType, Message, MessageRole, ProviderConfig, SessionConfig,
    SessionMetadata, SystemMessageConfig, SystemMessageMode, ToolDefinition, ToolParameter,
    ToolParameterType, ToolRequest,
};
