//! Turn a validated command into an executable plus argument vector.

use crate::policy::{NamespaceScope, Policy, ValidatedCommand};

/// A ready-to-run process invocation. Arguments are passed as-is; no shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub executable: String,
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Human-readable form for logs only. Never executed.
    pub fn display(&self) -> String {
        let mut out = self.executable.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                out.push_str(&format!("{:?}", arg));
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Build `<executable> -n <ns> <verb> <rest...>` or `<executable> <verb> <rest...> --all-namespaces`.
pub fn build(policy: &Policy, cmd: &ValidatedCommand) -> CommandInvocation {
    let mut args = Vec::with_capacity(cmd.rest().len() + 4);
    if let NamespaceScope::Named(ns) = cmd.scope() {
        args.push(policy.namespace_flag().to_string());
        args.push(ns.clone());
    }
    args.push(cmd.verb().to_string());
    args.extend(cmd.rest().iter().cloned());
    if *cmd.scope() == NamespaceScope::All {
        args.push(policy.wildcard_flag().to_string());
    }
    CommandInvocation {
        executable: policy.executable().to_string(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;

    fn policy() -> Policy {
        Policy::from_config(&PolicyConfig::default()).unwrap()
    }

    fn build_tokens(tokens: &[&str]) -> CommandInvocation {
        let p = policy();
        let cmd = p.validate(tokens).unwrap().unwrap();
        build(&p, &cmd)
    }

    #[test]
    fn named_namespace_is_scoped_with_flag() {
        let inv = build_tokens(&["!k", "prod", "get", "pods", "-o", "wide"]);
        assert_eq!(inv.executable, "/usr/local/bin/kubectl");
        assert_eq!(inv.args, vec!["-n", "prod", "get", "pods", "-o", "wide"]);
    }

    #[test]
    fn wildcard_expands_to_all_namespaces_without_literal_scope() {
        let inv = build_tokens(&["!k", "all", "get", "pods"]);
        assert!(inv.args.contains(&"--all-namespaces".to_string()));
        assert!(!inv.args.contains(&"-n".to_string()));
        assert!(!inv.args.contains(&"all".to_string()));
        assert_eq!(inv.args, vec!["get", "pods", "--all-namespaces"]);
    }

    #[test]
    fn shell_metacharacters_stay_inside_one_argument() {
        let inv = build_tokens(&["!k", "prod", "get", "pods;rm", "$(id)"]);
        assert_eq!(inv.args, vec!["-n", "prod", "get", "pods;rm", "$(id)"]);
    }

    #[test]
    fn display_quotes_odd_arguments() {
        let inv = CommandInvocation {
            executable: "kubectl".to_string(),
            args: vec!["-n".to_string(), String::new(), "get".to_string()],
        };
        assert_eq!(inv.display(), "kubectl -n \"\" get");
    }
}
