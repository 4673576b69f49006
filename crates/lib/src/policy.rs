//! Command policy: which chat messages may become a kubectl invocation.
//!
//! Validation is a pure allow-list / deny-combination filter over the message tokens.
//! Nothing is spawned here; a `ValidatedCommand` can only be obtained from `Policy::validate`.

use std::collections::HashSet;

use crate::config::PolicyConfig;

/// Why a triggered message was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("too few arguments: expected <prefix> <namespace> <verb> [args...]")]
    TooFewArguments,
    #[error("verb not allowed: {0}")]
    VerbNotAllowed(String),
    #[error("flag {flag} is not allowed with {verb}")]
    ForbiddenFlag { verb: String, flag: String },
}

/// Startup error: the configured policy is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy.triggerPrefix must not be empty")]
    EmptyTrigger,
    #[error("policy.triggerPrefix must be a single token, got {0:?}")]
    TriggerHasWhitespace(String),
    #[error("policy.executable must not be empty")]
    EmptyExecutable,
    #[error("policy.namespaceFlag must not be empty")]
    EmptyNamespaceFlag,
    #[error("policy.allowedVerbs must list at least one verb")]
    NoAllowedVerbs,
    #[error("policy.allowedVerbs contains a blank entry")]
    BlankVerb,
    #[error("policy.forbiddenFlags[{index}] needs both a verb and a flag")]
    IncompleteForbiddenFlag { index: usize },
    #[error("policy.namespaceWildcard and policy.wildcardFlag must both be set")]
    IncompleteWildcard,
}

/// Namespace scope of a validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    Named(String),
    /// The wildcard token was used; expands to the wildcard flag.
    All,
}

/// Tokens that passed every policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    scope: NamespaceScope,
    verb: String,
    rest: Vec<String>,
}

impl ValidatedCommand {
    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Tokens after the verb, verbatim.
    pub fn rest(&self) -> &[String] {
        &self.rest
    }
}

/// Immutable command policy, shared read-only across dispatches.
#[derive(Debug, Clone)]
pub struct Policy {
    trigger_prefix: String,
    executable: String,
    namespace_flag: String,
    allowed_verbs: HashSet<String>,
    forbidden: Vec<(String, String)>,
    namespace_wildcard: String,
    wildcard_flag: String,
    announce_rejections: bool,
}

impl Policy {
    /// Build the policy from config, refusing partial or malformed settings.
    pub fn from_config(cfg: &PolicyConfig) -> Result<Self, PolicyError> {
        let trigger = cfg.trigger_prefix.trim();
        if trigger.is_empty() {
            return Err(PolicyError::EmptyTrigger);
        }
        if trigger.split_whitespace().count() != 1 {
            return Err(PolicyError::TriggerHasWhitespace(trigger.to_string()));
        }
        if cfg.executable.trim().is_empty() {
            return Err(PolicyError::EmptyExecutable);
        }
        if cfg.namespace_flag.trim().is_empty() {
            return Err(PolicyError::EmptyNamespaceFlag);
        }
        if cfg.allowed_verbs.is_empty() {
            return Err(PolicyError::NoAllowedVerbs);
        }
        let mut allowed_verbs = HashSet::new();
        for verb in &cfg.allowed_verbs {
            let verb = verb.trim();
            if verb.is_empty() {
                return Err(PolicyError::BlankVerb);
            }
            allowed_verbs.insert(verb.to_string());
        }
        if cfg.namespace_wildcard.trim().is_empty() || cfg.wildcard_flag.trim().is_empty() {
            return Err(PolicyError::IncompleteWildcard);
        }
        let mut forbidden = Vec::with_capacity(cfg.forbidden_flags.len());
        for (index, f) in cfg.forbidden_flags.iter().enumerate() {
            let (verb, flag) = (f.verb.trim(), f.flag.trim());
            if verb.is_empty() || flag.is_empty() {
                return Err(PolicyError::IncompleteForbiddenFlag { index });
            }
            forbidden.push((verb.to_string(), flag.to_string()));
        }
        Ok(Self {
            trigger_prefix: trigger.to_string(),
            executable: cfg.executable.trim().to_string(),
            namespace_flag: cfg.namespace_flag.trim().to_string(),
            allowed_verbs,
            forbidden,
            namespace_wildcard: cfg.namespace_wildcard.trim().to_string(),
            wildcard_flag: cfg.wildcard_flag.trim().to_string(),
            announce_rejections: cfg.announce_rejections,
        })
    }

    pub fn trigger_prefix(&self) -> &str {
        &self.trigger_prefix
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn namespace_flag(&self) -> &str {
        &self.namespace_flag
    }

    pub fn wildcard_flag(&self) -> &str {
        &self.wildcard_flag
    }

    pub fn announce_rejections(&self) -> bool {
        self.announce_rejections
    }

    /// True if the trigger prefix occurs anywhere in the text.
    pub fn is_triggered(&self, text: &str) -> bool {
        text.contains(&self.trigger_prefix)
    }

    /// Check tokens against the policy.
    ///
    /// `Ok(None)` when the first token is not the trigger prefix (not a command at all).
    /// Rules run in order: argument count, namespace wildcard, verb allow-list, forbidden flags.
    pub fn validate<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<Option<ValidatedCommand>, Rejection> {
        match tokens.first() {
            Some(first) if first.as_ref() == self.trigger_prefix => {}
            _ => return Ok(None),
        }
        if tokens.len() < 3 {
            return Err(Rejection::TooFewArguments);
        }
        let namespace = tokens[1].as_ref();
        let scope = if namespace == self.namespace_wildcard {
            NamespaceScope::All
        } else {
            NamespaceScope::Named(namespace.to_string())
        };
        let verb = tokens[2].as_ref();
        if !self.allowed_verbs.contains(verb) {
            return Err(Rejection::VerbNotAllowed(verb.to_string()));
        }
        let rest: Vec<String> = tokens[3..].iter().map(|t| t.as_ref().to_string()).collect();
        // kubectl stops reading flags at "--"; what follows belongs to the remote command.
        let flags = rest.iter().take_while(|t| t.as_str() != "--");
        for (forbidden_verb, flag) in &self.forbidden {
            if forbidden_verb == verb && flags.clone().any(|t| uses_flag(t, flag)) {
                return Err(Rejection::ForbiddenFlag {
                    verb: verb.to_string(),
                    flag: flag.clone(),
                });
            }
        }
        Ok(Some(ValidatedCommand {
            scope,
            verb: verb.to_string(),
            rest,
        }))
    }
}

/// Whether `token` spells `flag` in any form kubectl accepts: exact, `--flag=value`,
/// or a single-letter flag inside a short cluster such as `-pf` or `-f=true`.
fn uses_flag(token: &str, flag: &str) -> bool {
    if token == flag {
        return true;
    }
    if let Some(name) = flag.strip_prefix("--") {
        return token
            .strip_prefix("--")
            .and_then(|t| t.strip_prefix(name))
            .is_some_and(|tail| tail.starts_with('='));
    }
    let mut letters = flag.chars().skip(1);
    let (Some(letter), None) = (letters.next(), letters.next()) else {
        return false;
    };
    if !flag.starts_with('-') || token.starts_with("--") {
        return false;
    }
    let Some(cluster) = token.strip_prefix('-') else {
        return false;
    };
    let cluster = cluster.split('=').next().unwrap_or_default();
    !cluster.is_empty()
        && cluster.chars().all(|c| c.is_ascii_alphanumeric())
        && cluster.contains(letter)
}

/// Split message text into whitespace-delimited tokens.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForbiddenFlag;

    fn policy() -> Policy {
        Policy::from_config(&PolicyConfig::default()).unwrap()
    }

    #[test]
    fn non_trigger_first_token_is_not_a_command() {
        let p = policy();
        assert_eq!(p.validate(&["kubectl", "prod", "get", "pods"]), Ok(None));
        assert_eq!(p.validate(&["please", "!k", "prod", "get"]), Ok(None));
        assert_eq!(p.validate::<&str>(&[]), Ok(None));
    }

    #[test]
    fn fewer_than_three_tokens_is_rejected() {
        let p = policy();
        assert_eq!(p.validate(&["!k", "prod"]), Err(Rejection::TooFewArguments));
        assert_eq!(p.validate(&["!k"]), Err(Rejection::TooFewArguments));
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let p = policy();
        assert_eq!(
            p.validate(&["!k", "prod", "delete", "pod", "x"]),
            Err(Rejection::VerbNotAllowed("delete".to_string()))
        );
    }

    #[test]
    fn logs_follow_is_forbidden() {
        let p = policy();
        assert_eq!(
            p.validate(&["!k", "prod", "logs", "mypod", "-f"]),
            Err(Rejection::ForbiddenFlag {
                verb: "logs".to_string(),
                flag: "-f".to_string()
            })
        );
    }

    #[test]
    fn exec_interactive_is_forbidden() {
        let p = policy();
        let err = p
            .validate(&["!k", "prod", "exec", "mypod", "-it", "--", "sh"])
            .unwrap_err();
        assert!(matches!(err, Rejection::ForbiddenFlag { ref verb, .. } if verb == "exec"));
    }

    #[test]
    fn forbidden_flag_only_applies_to_its_verb() {
        let p = policy();
        let cmd = p.validate(&["!k", "prod", "get", "pods", "-f", "x.yaml"]).unwrap();
        assert!(cmd.is_some());
    }

    #[test]
    fn wildcard_namespace_becomes_all_scope() {
        let p = policy();
        let cmd = p.validate(&["!k", "all", "get", "pods"]).unwrap().unwrap();
        assert_eq!(cmd.scope(), &NamespaceScope::All);
        assert_eq!(cmd.verb(), "get");
        assert_eq!(cmd.rest(), &["pods".to_string()]);
    }

    #[test]
    fn from_config_refuses_partial_policy() {
        let mut cfg = PolicyConfig::default();
        cfg.allowed_verbs.clear();
        assert_eq!(Policy::from_config(&cfg).unwrap_err(), PolicyError::NoAllowedVerbs);

        let mut cfg = PolicyConfig::default();
        cfg.trigger_prefix = "  ".to_string();
        assert_eq!(Policy::from_config(&cfg).unwrap_err(), PolicyError::EmptyTrigger);

        let mut cfg = PolicyConfig::default();
        cfg.trigger_prefix = "! k".to_string();
        assert!(matches!(
            Policy::from_config(&cfg),
            Err(PolicyError::TriggerHasWhitespace(_))
        ));

        let mut cfg = PolicyConfig::default();
        cfg.executable = String::new();
        assert_eq!(Policy::from_config(&cfg).unwrap_err(), PolicyError::EmptyExecutable);

        let mut cfg = PolicyConfig::default();
        cfg.allowed_verbs.push("  ".to_string());
        assert_eq!(Policy::from_config(&cfg).unwrap_err(), PolicyError::BlankVerb);

        let mut cfg = PolicyConfig::default();
        cfg.forbidden_flags = vec![ForbiddenFlag::new("logs", " ")];
        assert_eq!(
            Policy::from_config(&cfg).unwrap_err(),
            PolicyError::IncompleteForbiddenFlag { index: 0 }
        );

        let mut cfg = PolicyConfig::default();
        cfg.forbidden_flags.push(ForbiddenFlag::new("", "-w"));
        let last = cfg.forbidden_flags.len() - 1;
        assert_eq!(
            Policy::from_config(&cfg).unwrap_err(),
            PolicyError::IncompleteForbiddenFlag { index: last }
        );
    }

    fn refused_flag(tokens: &[&str]) -> Option<String> {
        match policy().validate(tokens) {
            Err(Rejection::ForbiddenFlag { flag, .. }) => Some(flag),
            _ => None,
        }
    }

    #[test]
    fn long_flag_with_value_is_forbidden() {
        assert_eq!(
            refused_flag(&["!k", "prod", "logs", "mypod", "--follow=true"]),
            Some("--follow".to_string())
        );
        assert_eq!(
            refused_flag(&["!k", "prod", "exec", "mypod", "--stdin=true", "--", "sh"]),
            Some("--stdin".to_string())
        );
    }

    #[test]
    fn short_flag_inside_cluster_is_forbidden() {
        assert_eq!(
            refused_flag(&["!k", "prod", "logs", "mypod", "-pf"]),
            Some("-f".to_string())
        );
        assert_eq!(
            refused_flag(&["!k", "prod", "logs", "mypod", "-f=true"]),
            Some("-f".to_string())
        );
        assert!(refused_flag(&["!k", "prod", "exec", "mypod", "-ti", "--", "sh"]).is_some());
    }

    #[test]
    fn long_interactive_exec_flags_are_forbidden() {
        assert!(refused_flag(&["!k", "prod", "exec", "mypod", "--stdin", "--tty", "--", "sh"]).is_some());
        assert!(refused_flag(&["!k", "prod", "exec", "mypod", "--tty", "--", "sh"]).is_some());
        assert!(refused_flag(&["!k", "prod", "attach", "mypod", "--stdin"]).is_some());
    }

    #[test]
    fn lookalike_flags_are_still_allowed() {
        let p = policy();
        assert!(p
            .validate(&["!k", "prod", "logs", "mypod", "--follower", "-p", "--tail=20"])
            .unwrap()
            .is_some());
        assert!(p
            .validate(&["!k", "prod", "exec", "mypod", "-c", "main", "--", "ls", "-lt", "/"])
            .unwrap()
            .is_some());
    }

    #[test]
    fn trigger_is_a_substring_match() {
        let p = policy();
        assert!(p.is_triggered("hey !k prod get pods"));
        assert!(!p.is_triggered("hey k prod get pods"));
    }
}
