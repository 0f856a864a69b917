use std::time::Duration;

/// How the scoping subject for a policy is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyScope {
    /// Subject is the caller's workspace id. Policies may exempt
    /// workspaces flagged internal.
    Workspace { skip_internal: bool },
    /// Subject is the client IP address. Used on unauthenticated
    /// endpoints, where no workspace context exists yet.
    ClientIp,
}

impl PolicyScope {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyScope::Workspace { .. } => "workspace",
            PolicyScope::ClientIp => "ip",
        }
    }
}

/// Immutable rate limit configuration for one endpoint family.
/// Defined at process start, never mutated at runtime.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub scope: PolicyScope,
    pub window: Duration,
    pub max_requests: u64,
    /// Distinct per policy; prefix + subject forms the scoping key, so
    /// two policies can never share a counter.
    pub key_prefix: &'static str,
}

/// Process-wide, read-only table of named policies.
pub struct PolicyRegistry {
    pub doc_sync: RateLimitPolicy,
    pub api_general: RateLimitPolicy,
    pub login: RateLimitPolicy,
    pub signup: RateLimitPolicy,
    pub password_reset: RateLimitPolicy,
    pub token_refresh: RateLimitPolicy,
    pub invite_accept: RateLimitPolicy,
}

pub static POLICIES: PolicyRegistry = PolicyRegistry {
    doc_sync: RateLimitPolicy {
        name: "doc_sync",
        scope: PolicyScope::Workspace { skip_internal: true },
        window: Duration::from_secs(60),
        max_requests: 10,
        key_prefix: "doc-sync",
    },
    api_general: RateLimitPolicy {
        name: "api_general",
        scope: PolicyScope::Workspace { skip_internal: true },
        window: Duration::from_secs(60),
        max_requests: 100,
        key_prefix: "api",
    },
    login: RateLimitPolicy {
        name: "login",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 5,
        key_prefix: "login",
    },
    signup: RateLimitPolicy {
        name: "signup",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 3,
        key_prefix: "signup",
    },
    password_reset: RateLimitPolicy {
        name: "password_reset",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 3,
        key_prefix: "pwreset",
    },
    token_refresh: RateLimitPolicy {
        name: "token_refresh",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 20,
        key_prefix: "refresh",
    },
    invite_accept: RateLimitPolicy {
        name: "invite_accept",
        scope: PolicyScope::ClientIp,
        window: Duration::from_secs(60),
        max_requests: 10,
        key_prefix: "invite",
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> [&'static RateLimitPolicy; 7] {
        [
            &POLICIES.doc_sync,
            &POLICIES.api_general,
            &POLICIES.login,
            &POLICIES.signup,
            &POLICIES.password_reset,
            &POLICIES.token_refresh,
            &POLICIES.invite_accept,
        ]
    }

    #[test]
    fn test_key_prefixes_are_distinct() {
        let mut prefixes: Vec<&str> = all().iter().map(|p| p.key_prefix).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), 7);
    }

    #[test]
    fn test_workspace_policies_skip_internal_workspaces() {
        assert_eq!(
            POLICIES.doc_sync.scope,
            PolicyScope::Workspace { skip_internal: true }
        );
        assert_eq!(
            POLICIES.api_general.scope,
            PolicyScope::Workspace { skip_internal: true }
        );
    }

    #[test]
    fn test_ip_policies_have_no_workspace_scope() {
        for policy in [
            &POLICIES.login,
            &POLICIES.signup,
            &POLICIES.password_reset,
            &POLICIES.token_refresh,
            &POLICIES.invite_accept,
        ] {
            assert_eq!(policy.scope, PolicyScope::ClientIp);
        }
    }

    #[test]
    fn test_all_windows_are_one_minute() {
        for policy in all() {
            assert_eq!(policy.window, Duration::from_secs(60));
        }
    }
}
