// Workspace/user request context
//
// Decision: the ambient tenant context is an explicit value bound into stores
// and passed through services - no globals, no thread-locals. It is set once
// at the edge (auth layer for HTTP, workflow input for the worker) and flows
// through every call path.

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};

/// Tenant scope + acting principal for a request or workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub workspace_id: String,
    pub user_id: String,
}

impl RequestContext {
    /// Build a context, rejecting empty tenant or principal ids.
    ///
    /// Internal paths never substitute defaults; a request without a
    /// workspace is an error at the boundary it entered through.
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Result<Self> {
        let workspace_id = workspace_id.into();
        let user_id = user_id.into();

        if workspace_id.trim().is_empty() || user_id.trim().is_empty() {
            return Err(PlatformError::MissingContext);
        }

        Ok(Self {
            workspace_id,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_requires_workspace() {
        assert!(matches!(
            RequestContext::new("", "user-1"),
            Err(PlatformError::MissingContext)
        ));
        assert!(matches!(
            RequestContext::new("  ", "user-1"),
            Err(PlatformError::MissingContext)
        ));
    }

    #[test]
    fn test_context_requires_user() {
        assert!(matches!(
            RequestContext::new("ws-1", ""),
            Err(PlatformError::MissingContext)
        ));
    }

    #[test]
    fn test_context_ok() {
        let ctx = RequestContext::new("ws-1", "user-1").unwrap();
        assert_eq!(ctx.workspace_id, "ws-1");
        assert_eq!(ctx.user_id, "user-1");
    }
}
