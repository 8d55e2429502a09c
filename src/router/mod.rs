//! Tool routing module
//!
//! Resolves the account of each tool call to an authorized session.

pub mod tools;
pub mod types;

pub use tools::{AuthorizedSession, ToolHandler, ToolRouter, UserInfoTool, USER_ID_ARG};
pub use types::{CallToolResult, Tool, ToolResultContent};
