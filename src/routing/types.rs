//! Ruleset Types

use std::net::IpAddr;

use ipnet::IpNet;

use crate::protocol::{RemoteAddress, RemoteHost};

/// Access control policy
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    Allow,
    Block,
}

impl Policy {
    /// Parse `allow` or `block`, ignoring case
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Policy::Allow),
            "block" => Some(Policy::Block),
            _ => None,
        }
    }
}

impl From<&str> for Policy {
    fn from(s: &str) -> Self {
        Self::parse(s).unwrap_or(Policy::Allow)
    }
}

/// Access control action
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Allow,
    Block,
}

impl Action {
    /// Parse `allow` or `block`, ignoring case
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Action::Allow),
            "block" => Some(Action::Block),
            _ => None,
        }
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self::parse(s).unwrap_or(Action::Allow)
    }
}

/// Outcome of evaluating the ruleset for one request
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Access control rule for pattern matching
#[derive(Debug, Clone)]
pub struct AccessControlRule {
    pub pattern: String,
    pub action: Action,
    pub ports: Option<Vec<u16>>,
}

impl AccessControlRule {
    fn decision(&self) -> AccessDecision {
        match self.action {
            Action::Allow => AccessDecision::Allow,
            Action::Block => AccessDecision::Deny {
                reason: format!("blocked by rule: {}", self.pattern),
            },
        }
    }
}

/// Ordered rule list with a fallback policy
#[derive(Debug)]
pub struct AccessControlList {
    pub default_policy: Policy,
    pub rules: Vec<AccessControlRule>,
}

impl AccessControlList {
    /// Create a new ACL with default policy
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            rules: Vec::new(),
        }
    }

    /// Add a rule to the ACL
    pub fn add_rule(&mut self, rule: AccessControlRule) {
        self.rules.push(rule);
    }

    /// Evaluate access for a remote address and source IP. First matching rule wins.
    pub fn evaluate_access(&self, target: &RemoteAddress, source_ip: IpAddr) -> AccessDecision {
        self.evaluate_rules(target, source_ip)
            .unwrap_or_else(|| self.default_decision())
    }

    /// Decision of the first rule matching `target`, without the default policy
    pub fn evaluate_rules(&self, target: &RemoteAddress, source_ip: IpAddr) -> Option<AccessDecision> {
        self.rules
            .iter()
            .find(|rule| self.matches_rule(rule, target, source_ip))
            .map(AccessControlRule::decision)
    }

    /// Evaluate a domain target once it resolved to `resolved`.
    ///
    /// A rule matches if it matches either the name or the resolved address,
    /// so IP and CIDR rules also cover hosts reached by name.
    pub fn evaluate_resolved(&self, target: &RemoteAddress, resolved: IpAddr, source_ip: IpAddr) -> AccessDecision {
        let address = RemoteAddress::ip(resolved, target.port);
        self.rules
            .iter()
            .find(|rule| self.matches_rule(rule, target, source_ip) || self.matches_rule(rule, &address, source_ip))
            .map(AccessControlRule::decision)
            .unwrap_or_else(|| self.default_decision())
    }

    fn default_decision(&self) -> AccessDecision {
        match self.default_policy {
            Policy::Allow => AccessDecision::Allow,
            Policy::Block => AccessDecision::Deny {
                reason: "blocked by default policy".to_string(),
            },
        }
    }

    /// Check if a rule matches the given parameters
    pub fn matches_rule(&self, rule: &AccessControlRule, target: &RemoteAddress, source_ip: IpAddr) -> bool {
        if let Some(ports) = &rule.ports {
            if !ports.contains(&target.port) {
                return false;
            }
        }

        matches_pattern(&rule.pattern, target, source_ip)
    }
}

/// Check if a pattern matches the target host or the source IP
fn matches_pattern(pattern: &str, target: &RemoteAddress, source_ip: IpAddr) -> bool {
    if pattern == "*" {
        return true;
    }

    if matches_ip_pattern(pattern, source_ip) {
        return true;
    }

    match &target.host {
        RemoteHost::Ip(ip) => matches_ip_pattern(pattern, *ip),
        RemoteHost::Domain(domain) => matches_domain_pattern(pattern, domain),
    }
}

/// Exact IP or CIDR match
fn matches_ip_pattern(pattern: &str, ip: IpAddr) -> bool {
    if let Ok(pattern_ip) = pattern.parse::<IpAddr>() {
        return pattern_ip == ip;
    }

    match pattern.parse::<IpNet>() {
        Ok(net) => net.contains(&ip),
        Err(_) => false,
    }
}

/// Exact, `*.suffix` and `.suffix` domain matching, case-insensitive
fn matches_domain_pattern(pattern: &str, domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if pattern == domain {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return domain == suffix || domain.ends_with(&format!(".{}", suffix));
    }

    if pattern.starts_with('.') {
        return domain.ends_with(&pattern);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    #[test]
    fn test_cidr_matching() {
        assert!(matches_ip_pattern("192.168.0.0/16", "192.168.44.2".parse().unwrap()));
        assert!(!matches_ip_pattern("192.168.0.0/16", "192.169.0.1".parse().unwrap()));
        assert!(matches_ip_pattern("fd00::/8", "fd12::1".parse().unwrap()));
        assert!(!matches_ip_pattern("fd00::/8", "10.0.0.1".parse().unwrap()));
        assert!(!matches_ip_pattern("not-a-net", "10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_domain_matching() {
        assert!(matches_domain_pattern("*.example.com", "api.example.com"));
        assert!(matches_domain_pattern("*.example.com", "example.com"));
        assert!(!matches_domain_pattern("*.example.com", "badexample.com"));
        assert!(matches_domain_pattern(".example.com", "a.b.example.com"));
        assert!(matches_domain_pattern("Example.COM", "example.com."));
    }

    #[test]
    fn test_policy_words_ignore_case() {
        assert_eq!(Policy::parse("Block"), Some(Policy::Block));
        assert_eq!(Action::parse("ALLOW"), Some(Action::Allow));
        assert_eq!(Action::parse("deny"), None);
        assert_eq!(Policy::from("BLOCK"), Policy::Block);
    }

    #[test]
    fn test_first_match_wins() {
        let mut acl = AccessControlList::new(Policy::Block);
        acl.add_rule(AccessControlRule {
            pattern: "*.example.com".to_string(),
            action: Action::Allow,
            ports: Some(vec![443]),
        });
        acl.add_rule(AccessControlRule {
            pattern: "*".to_string(),
            action: Action::Block,
            ports: None,
        });

        let allowed = RemoteAddress::domain("www.example.com", 443);
        assert!(acl.evaluate_access(&allowed, source()).is_allowed());

        let wrong_port = RemoteAddress::domain("www.example.com", 80);
        assert_eq!(
            acl.evaluate_access(&wrong_port, source()),
            AccessDecision::Deny { reason: "blocked by rule: *".to_string() }
        );
    }

    #[test]
    fn test_default_policy_applies() {
        let acl = AccessControlList::new(Policy::Block);
        let target = RemoteAddress::domain("example.org", 443);
        assert_eq!(
            acl.evaluate_access(&target, source()),
            AccessDecision::Deny { reason: "blocked by default policy".to_string() }
        );
    }

    #[test]
    fn test_resolved_address_matches_ip_rules() {
        let mut acl = AccessControlList::new(Policy::Allow);
        acl.add_rule(AccessControlRule {
            pattern: "127.0.0.0/8".to_string(),
            action: Action::Block,
            ports: None,
        });

        let by_name = RemoteAddress::domain("localhost", 6379);
        assert_eq!(acl.evaluate_rules(&by_name, source()), None);
        assert_eq!(
            acl.evaluate_resolved(&by_name, "127.0.0.1".parse().unwrap(), source()),
            AccessDecision::Deny { reason: "blocked by rule: 127.0.0.0/8".to_string() }
        );
        assert!(acl
            .evaluate_resolved(&by_name, "93.184.216.34".parse().unwrap(), source())
            .is_allowed());
    }

    #[test]
    fn test_resolved_keeps_rule_order() {
        let mut acl = AccessControlList::new(Policy::Block);
        acl.add_rule(AccessControlRule {
            pattern: "*.internal.test".to_string(),
            action: Action::Allow,
            ports: None,
        });
        acl.add_rule(AccessControlRule {
            pattern: "10.0.0.0/8".to_string(),
            action: Action::Block,
            ports: None,
        });

        let named = RemoteAddress::domain("db.internal.test", 5432);
        assert!(acl
            .evaluate_resolved(&named, "10.1.2.3".parse().unwrap(), source())
            .is_allowed());

        // No rule matches, so the default policy decides
        let other = RemoteAddress::domain("example.org", 443);
        assert!(!acl
            .evaluate_resolved(&other, "93.184.216.34".parse().unwrap(), source())
            .is_allowed());
    }
}
