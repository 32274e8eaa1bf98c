//! Scope grammar and permission checks.
//!
//! A scope token is one of:
//! - `*`: superuser, grants everything
//! - `resource:action`: e.g. `topics:publish`
//! - `resource:action:object_id`: the same action restricted to one object
//!
//! A request for action A on object O passes when the token set contains
//! `*`, `resource:A`, or `resource:A:O`.
use std::collections::HashSet;

/// Base scopes a client may be granted. Object-scoped variants append
/// `:<object_id>` to one of these.
const VALID_BASE_SCOPES: [&str; 13] = [
    "*",
    "topics:create",
    "topics:read",
    "topics:delete",
    "topics:publish",
    "subscriptions:create",
    "subscriptions:read",
    "subscriptions:delete",
    "subscriptions:consume",
    "clients:create",
    "clients:update",
    "clients:read",
    "clients:delete",
];

/// Validate a space-separated scope string at client create/update time.
pub fn validate_scopes(scopes: &str) -> Result<(), String> {
    if scopes.trim().is_empty() {
        return Err("scopes must not be empty".to_string());
    }
    for scope in scopes.split_whitespace() {
        // Object-scoped tokens have exactly three segments; strip the
        // object id before checking against the allowlist.
        let base = if scope.split(':').count() == 3 {
            scope.rsplit_once(':').map(|(base, _)| base).unwrap_or(scope)
        } else {
            scope
        };
        if !VALID_BASE_SCOPES.contains(&base) {
            return Err(format!("invalid scope {scope}"));
        }
    }
    Ok(())
}

/// Check whether a token's scope set grants `action` on `resource`,
/// optionally narrowed to a specific object.
pub fn has_scope(
    token_scopes: &HashSet<String>,
    resource: &str,
    action: &str,
    object_id: Option<&str>,
) -> bool {
    if token_scopes.contains("*") {
        return true;
    }
    let base = format!("{resource}:{action}");
    if token_scopes.contains(&base) {
        return true;
    }
    if let Some(object_id) = object_id {
        if token_scopes.contains(&format!("{base}:{object_id}")) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(raw: &str) -> HashSet<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn wildcard_grants_everything() {
        let set = scopes("*");
        assert!(has_scope(&set, "topics", "delete", None));
        assert!(has_scope(&set, "clients", "update", Some("abc")));
    }

    #[test]
    fn base_scope_grants_action_on_any_object() {
        let set = scopes("topics:publish subscriptions:consume");
        assert!(has_scope(&set, "topics", "publish", Some("orders")));
        assert!(has_scope(&set, "subscriptions", "consume", None));
        assert!(!has_scope(&set, "topics", "delete", None));
    }

    #[test]
    fn object_scope_only_grants_that_object() {
        let set = scopes("subscriptions:consume:orders-sub");
        assert!(has_scope(&set, "subscriptions", "consume", Some("orders-sub")));
        assert!(!has_scope(&set, "subscriptions", "consume", Some("other")));
        assert!(!has_scope(&set, "subscriptions", "consume", None));
    }

    #[test]
    fn validate_accepts_known_grammar() {
        assert!(validate_scopes("*").is_ok());
        assert!(validate_scopes("topics:publish subscriptions:consume").is_ok());
        assert!(validate_scopes("subscriptions:consume:orders-sub").is_ok());
    }

    #[test]
    fn validate_rejects_unknown_scopes() {
        assert!(validate_scopes("").is_err());
        assert!(validate_scopes("topics:fly").is_err());
        assert!(validate_scopes("widgets:read").is_err());
        assert!(validate_scopes("topics:publish widgets:read").is_err());
    }
}
