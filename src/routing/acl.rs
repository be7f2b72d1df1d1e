//! Access Control List Implementation

use std::net::IpAddr;

use tracing::debug;

use super::types::{AccessControlList, AccessControlRule, AccessDecision, Action, Policy};
use crate::config::{AccessControlConfig, AccessRule};
use crate::protocol::RemoteAddress;

/// Ruleset consulted before every remote connection attempt
#[derive(Debug)]
pub struct AclManager {
    enabled: bool,
    acl: AccessControlList,
}

impl AclManager {
    /// Create a new ACL manager from configuration
    pub fn new(config: &AccessControlConfig) -> Self {
        let mut acl = AccessControlList::new(Policy::from(config.default_policy.as_str()));
        for rule in &config.rules {
            acl.add_rule(AccessControlRule::from(rule));
        }

        Self {
            enabled: config.enabled,
            acl,
        }
    }

    /// Ruleset that lets everything through
    pub fn allow_all() -> Self {
        Self {
            enabled: false,
            acl: AccessControlList::new(Policy::Allow),
        }
    }

    /// Decide whether `source_ip` may open a tunnel to `target`
    pub fn check_access(&self, target: &RemoteAddress, source_ip: IpAddr) -> AccessDecision {
        if !self.enabled {
            return AccessDecision::Allow;
        }

        let decision = self.acl.evaluate_access(target, source_ip);
        debug!(remote = %target, source = %source_ip, ?decision, "Ruleset evaluated");
        decision
    }

    /// Explicit rule decision for `target` before it is resolved.
    ///
    /// `None` means no rule matched and the decision waits for the resolved
    /// addresses, see [`AclManager::check_resolved`].
    pub fn check_rules(&self, target: &RemoteAddress, source_ip: IpAddr) -> Option<AccessDecision> {
        if !self.enabled {
            return None;
        }

        let decision = self.acl.evaluate_rules(target, source_ip);
        debug!(remote = %target, source = %source_ip, ?decision, "Ruleset evaluated before resolution");
        decision
    }

    /// Decide whether `source_ip` may connect to `resolved`, one of the addresses of `target`
    pub fn check_resolved(&self, target: &RemoteAddress, resolved: IpAddr, source_ip: IpAddr) -> AccessDecision {
        if !self.enabled {
            return AccessDecision::Allow;
        }

        let decision = self.acl.evaluate_resolved(target, resolved, source_ip);
        debug!(remote = %target, address = %resolved, source = %source_ip, ?decision, "Ruleset evaluated");
        decision
    }

    /// Get the default policy
    pub fn get_default_policy(&self) -> &Policy {
        &self.acl.default_policy
    }

    /// Get the number of rules
    pub fn get_rule_count(&self) -> usize {
        self.acl.rules.len()
    }
}

impl From<&AccessRule> for AccessControlRule {
    fn from(rule: &AccessRule) -> Self {
        Self {
            pattern: rule.pattern.clone(),
            action: Action::from(rule.action.as_str()),
            ports: rule.ports.clone(),
        }
    }
}
