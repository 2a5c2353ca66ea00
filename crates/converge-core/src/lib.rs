// Shared domain model for the Converge platform.
//
// Everything in this crate is plain data + validation: no I/O, no runtime.
// The operator, storage, queue, arena, and fleet crates all build on these
// types.

pub mod error;
pub mod events;
pub mod privacy;
pub mod protocol;
pub mod provider;
pub mod retention;
pub mod session;
pub mod work;

pub use error::{CoreError, ErrorKind, Result};
pub use events::SessionEvent;
pub use privacy::{EncryptionSettings, PiiSettings, PiiStrategy, PrivacyPolicy, RecordingSettings};
pub use protocol::{ClientFrame, ErrorInfo, ServerFrame, ToolCall, ToolResult};
pub use provider::{CredentialSource, ProviderBinding, ProviderDefaults, ProviderType};
pub use retention::{PolicyScope, RetentionPolicy};
pub use session::{EvalResult, Message, MessageRole, Session, SessionState};
pub use work::{AssertionResult, ExecutionMetrics, ExecutionResult, ExecutionStatus, JobProgress, WorkItem, WorkItemStatus};
