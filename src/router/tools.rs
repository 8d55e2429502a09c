//! Tool routing
//!
//! Every tool call names the account it acts for in `__user_id__`. The router
//! obtains a valid credential for that account and hands the handler an
//! authorized session; handlers never see the credential store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::{Account, OAuthClient, TokenLifecycleManager};
use crate::config::scopes;
use crate::error::{GsuiteError, ToolError};
use crate::router::types::{CallToolResult, Tool};

/// Argument carrying the account email
pub const USER_ID_ARG: &str = "__user_id__";

/// Authenticated context for one tool call
#[derive(Debug, Clone)]
pub struct AuthorizedSession {
    pub account: Account,
    pub access_token: String,
    pub http_client: reqwest::Client,
}

/// A tool the agent can call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Tool-specific JSON schema; the account argument is added by the router
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn required_scopes(&self) -> &[&'static str];

    async fn run(
        &self,
        session: &AuthorizedSession,
        args: Value,
    ) -> std::result::Result<CallToolResult, GsuiteError>;
}

/// Tool router
pub struct ToolRouter {
    manager: Arc<TokenLifecycleManager>,
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    http_client: reqwest::Client,
}

impl ToolRouter {
    /// Create a router with the built-in tools registered
    pub fn new(manager: Arc<TokenLifecycleManager>) -> Self {
        let user_info = UserInfoTool::new(manager.oauth().clone());
        let mut router = Self {
            manager,
            handlers: BTreeMap::new(),
            http_client: reqwest::Client::new(),
        };
        router.register(Arc::new(user_info));
        router
    }

    /// Register (or replace) a tool handler
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        let accounts = self
            .manager
            .registry()
            .accounts()
            .iter()
            .map(Account::to_description)
            .collect::<Vec<_>>()
            .join(", ");

        self.handlers
            .values()
            .map(|handler| Tool {
                name: handler.name().to_string(),
                description: Some(format!(
                    "{} This tool requires an authorized Google account email for {}. You can choose one of: {}",
                    handler.description(),
                    USER_ID_ARG,
                    accounts
                )),
                input_schema: with_account_arg(handler.input_schema(), &accounts),
            })
            .collect()
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value) -> CallToolResult {
        match self.dispatch(name, args).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        mut args: Value,
    ) -> std::result::Result<CallToolResult, GsuiteError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;

        let email = take_account_arg(&mut args)?;
        let credential = self
            .manager
            .get_valid_credential(&email, handler.required_scopes())
            .await?;
        let account = self
            .manager
            .registry()
            .lookup(&email)
            .cloned()
            .ok_or(ToolError::MissingAccount)?;

        let session = AuthorizedSession {
            account,
            access_token: credential.access_token,
            http_client: self.http_client.clone(),
        };

        tracing::debug!(tool = name, account = %session.account.email, "dispatching tool call");
        handler.run(&session, args).await
    }
}

/// Remove and return `__user_id__` from the arguments
fn take_account_arg(args: &mut Value) -> std::result::Result<String, ToolError> {
    let Some(object) = args.as_object_mut() else {
        return Err(ToolError::InvalidArguments {
            message: "arguments must be an object".to_string(),
        });
    };

    match object.remove(USER_ID_ARG) {
        Some(Value::String(email)) if !email.trim().is_empty() => Ok(email),
        Some(_) => Err(ToolError::InvalidArguments {
            message: format!("{USER_ID_ARG} must be a non-empty string"),
        }),
        None => Err(ToolError::MissingAccount),
    }
}

/// Add the required account argument to a tool schema
fn with_account_arg(mut schema: Value, accounts: &str) -> Value {
    let property = json!({
        "type": "string",
        "description": format!(
            "The EMAIL of the Google account for which you are executing this action. Can be one of: {accounts}"
        ),
    });

    if let Some(object) = schema.as_object_mut() {
        let properties = object.entry("properties").or_insert_with(|| json!({}));
        if let Some(props) = properties.as_object_mut() {
            props.insert(USER_ID_ARG.to_string(), property);
        }

        let required = object.entry("required").or_insert_with(|| json!([]));
        if let Some(list) = required.as_array_mut() {
            if !list.iter().any(|v| v == USER_ID_ARG) {
                list.insert(0, json!(USER_ID_ARG));
            }
        }
    }
    schema
}

/// Returns the Google user info of the account
pub struct UserInfoTool {
    oauth: OAuthClient,
}

impl UserInfoTool {
    pub fn new(oauth: OAuthClient) -> Self {
        Self { oauth }
    }
}

#[async_trait]
impl ToolHandler for UserInfoTool {
    fn name(&self) -> &str {
        "get_gmail_user_info"
    }

    fn description(&self) -> &str {
        "Returns the Google user info of the account."
    }

    fn required_scopes(&self) -> &[&'static str] {
        &[scopes::USERINFO_EMAIL]
    }

    async fn run(
        &self,
        session: &AuthorizedSession,
        _args: Value,
    ) -> std::result::Result<CallToolResult, GsuiteError> {
        let info = self
            .oauth
            .user_info(&session.access_token)
            .await
            .map_err(|e| ToolError::Api {
                message: e.to_string(),
            })?;
        Ok(CallToolResult::text(serde_json::to_string_pretty(&info)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_account_arg() {
        let mut args = json!({"__user_id__": "alice@example.com", "query": "is:unread"});
        assert_eq!(take_account_arg(&mut args).unwrap(), "alice@example.com");
        assert_eq!(args, json!({"query": "is:unread"}));

        assert!(matches!(
            take_account_arg(&mut json!({})),
            Err(ToolError::MissingAccount)
        ));
        assert!(matches!(
            take_account_arg(&mut json!({"__user_id__": 4})),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(matches!(
            take_account_arg(&mut json!("alice@example.com")),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_schema_gets_account_arg() {
        let schema = with_account_arg(
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
            "Account for email: alice@example.com",
        );

        assert_eq!(schema["properties"][USER_ID_ARG]["type"], "string");
        assert!(schema["properties"][USER_ID_ARG]["description"]
            .as_str()
            .unwrap()
            .contains("alice@example.com"));
        assert_eq!(schema["required"], json!([USER_ID_ARG, "query"]));
        assert_eq!(schema["properties"]["query"]["type"], "string");
    }
}
