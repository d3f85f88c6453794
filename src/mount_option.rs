use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::error::AgentError;

static FORBIDDEN: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["suid", "dev", "exec"].into_iter().collect());

static ALLOWED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "nosuid",
        "nodev",
        "noexec",
        "ro",
        "rw",
        "relatime",
        "noatime",
        "nodiratime",
        "defaults",
        "sync",
        "async",
        "auto",
        "noauto",
        "user",
        "nouser",
        "_netdev",
        "bind",
        "rbind",
        "remount",
        "strictatime",
        "lazytime",
        "nolazytime",
    ]
    .into_iter()
    .collect()
});

fn option_name(token: &str) -> &str {
    token.split('=').next().unwrap_or(token)
}

/// Validate a list of mount option tokens against the Forbidden and Allowed
/// tables. Empty input is trivially valid.
pub fn validate(tokens: &[String]) -> Result<(), AgentError> {
    for token in tokens {
        let name = option_name(token);
        if FORBIDDEN.contains(name) {
            return Err(AgentError::BadOption {
                which: token.clone(),
                reason: "dangerous".into(),
            });
        }
        if !ALLOWED.contains(name) {
            return Err(AgentError::BadOption {
                which: token.clone(),
                reason: "not whitelisted".into(),
            });
        }
    }
    Ok(())
}

/// Validate, then, for bind mounts, prepend `nosuid`/`nodev`/`noexec` unless
/// the caller already specified the token (by name) or its opposite.
pub fn sanitize(tokens: &[String], is_bind: bool) -> Result<Vec<String>, AgentError> {
    validate(tokens)?;
    if !is_bind {
        return Ok(tokens.to_vec());
    }
    let present: HashSet<&str> = tokens.iter().map(|t| option_name(t)).collect();
    let mut out = Vec::new();
    for (restrictive, permissive) in [("nosuid", "suid"), ("nodev", "dev"), ("noexec", "exec")] {
        if !present.contains(restrictive) && !present.contains(permissive) {
            out.push(restrictive.to_string());
        }
    }
    out.extend(tokens.iter().cloned());
    Ok(out)
}

/// A bind mount is signalled by the presence of `bind` or `rbind` among the
/// caller-supplied tokens.
pub fn is_bind_mount(tokens: &[String]) -> bool {
    tokens
        .iter()
        .any(|t| matches!(option_name(t), "bind" | "rbind"))
}
