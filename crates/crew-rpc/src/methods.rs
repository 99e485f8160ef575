//! Wire method names.

/// Create a conversation (client → backend request).
pub const CONVERSATION_CREATE: &str = "conversation/create";

/// Run one turn of a conversation (client → backend request). The
/// response arrives only after the turn's `end` progress event.
pub const CONVERSATION_TURN: &str = "conversation/turn";

/// Backend-initiated tool invocation (backend → client request).
pub const CONVERSATION_INVOKE_CLIENT_TOOL: &str = "conversation/invokeClientTool";

/// Streaming progress notification (backend → client), correlated by
/// `workDoneToken`.
pub const PROGRESS: &str = "$/progress";

/// Cancel the turn correlated with a token (client → backend
/// notification).
pub const WORK_DONE_PROGRESS_CANCEL: &str = "window/workDoneProgress/cancel";
