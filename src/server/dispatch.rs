//! JSON-RPC method dispatch using typed variants.
//!
//! String matching happens exactly once, at the edge; everything downstream
//! works with enum variants. Unknown methods are captured for error
//! reporting.

use std::fmt;

/// A JSON-RPC method this server understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Session initialization and protocol-version negotiation.
    Initialize,
    /// Post-initialize notification.
    Initialized,
    /// List available tools.
    ListTools,
    /// Call a specific tool.
    CallTool,
    /// Liveness check.
    Ping,
    /// Unknown method (kept for error reporting).
    Unknown(String),
}

impl RpcMethod {
    /// The wire method name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::ListTools => "tools/list",
            Self::CallTool => "tools/call",
            Self::Ping => "ping",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this is a recognized method.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for RpcMethod {
    fn from(s: &str) -> Self {
        match s {
            "initialize" => Self::Initialize,
            "notifications/initialized" => Self::Initialized,
            "tools/list" => Self::ListTools,
            "tools/call" => Self::CallTool,
            "ping" => Self::Ping,
            unknown => Self::Unknown(unknown.to_string()),
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for method in [
            RpcMethod::Initialize,
            RpcMethod::Initialized,
            RpcMethod::ListTools,
            RpcMethod::CallTool,
            RpcMethod::Ping,
        ] {
            assert_eq!(RpcMethod::from(method.as_str()), method);
            assert!(method.is_known());
        }
    }

    #[test]
    fn test_unknown_captured() {
        let method = RpcMethod::from("resources/list");
        assert!(!method.is_known());
        assert_eq!(method.as_str(), "resources/list");
    }
}
