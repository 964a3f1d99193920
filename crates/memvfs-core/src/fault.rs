// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy and runtime controller for FsCore

use crate::FsError;
use libc::{EIO, ENOSPC};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Read,
    Write,
    Truncate,
    /// Creating a new inode (open with create, mkdir, symlink)
    Create,
    /// Committing a writable stream onto its target
    Commit,
}

/// Errno reported by a synthetic failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultErrno {
    Eio,
    Enospc,
}

impl FaultErrno {
    fn to_error(self) -> FsError {
        let errno = match self {
            FaultErrno::Eio => EIO,
            FaultErrno::Enospc => ENOSPC,
        };
        FsError::Io(io::Error::from_raw_os_error(errno))
    }
}

/// Which op should fail and how often
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    pub errno: FaultErrno,
    /// Leading invocations to let through before failing
    #[serde(default)]
    pub start_after: u64,
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl Default for FaultRule {
    fn default() -> Self {
        Self {
            op: FaultOp::Write,
            errno: FaultErrno::Eio,
            start_after: 0,
            max_faults: None,
        }
    }
}

/// JSON-serializable fault policy
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Enabled policy failing every invocation of `op`
    pub fn always(op: FaultOp, errno: FaultErrno) -> Self {
        Self {
            enabled: true,
            rules: vec![FaultRule {
                op,
                errno,
                ..FaultRule::default()
            }],
        }
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Clone, Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime controller tracking the policy and per-rule hit counts
#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay consistent even if a holder panicked, so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> FaultPolicy {
        self.state().policy.clone()
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state();
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Error to inject for this invocation of `op`, if any
    pub fn should_fault(&self, op: FaultOp) -> Option<FsError> {
        let mut guard = self.state();
        if !guard.policy.enabled {
            return None;
        }
        let FaultState { policy, counters } = &mut *guard;
        counters.resize(policy.rules.len(), RuleCounters::default());
        for (rule, counter) in policy.rules.iter().zip(counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counter.invocations = counter.invocations.saturating_add(1);
            if counter.invocations <= rule.start_after {
                continue;
            }
            if rule.max_faults.is_some_and(|max| counter.hits >= max) {
                continue;
            }
            counter.hits = counter.hits.saturating_add(1);
            tracing::debug!(?op, errno = ?rule.errno, "injecting fault");
            return Some(rule.errno.to_error());
        }
        None
    }

    /// `Err` when a fault is due for `op`
    pub(crate) fn check(&self, op: FaultOp) -> Result<(), FsError> {
        match self.should_fault(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_policy_loads_from_json() {
        let json = br#"{
            "enabled": true,
            "rules": [{ "op": "commit", "errno": "enospc", "max_faults": 2 }]
        }"#;
        let policy = FaultPolicy::from_json_bytes(json).expect("policy");
        assert!(policy.enabled);
        assert_eq!(policy.rules[0].op, FaultOp::Commit);
        assert_eq!(policy.rules[0].max_faults, Some(2));
    }

    #[test]
    fn write_faults_start_late_and_stop_after_limit() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::Write,
                errno: FaultErrno::Eio,
                start_after: 1,
                max_faults: Some(2),
            }],
        });

        // first call skipped by start_after
        assert!(injector.should_fault(FaultOp::Write).is_none());
        assert!(injector.should_fault(FaultOp::Read).is_none());
        let err = injector.should_fault(FaultOp::Write).expect("fault");
        assert_eq!(err.errno(), EIO);
        assert!(injector.should_fault(FaultOp::Write).is_some());
        // max hits reached
        assert!(injector.should_fault(FaultOp::Write).is_none());
    }

    #[test]
    fn disabled_or_cleared_policy_never_fails() {
        let injector = FaultInjector::new();
        let mut policy = FaultPolicy::always(FaultOp::Create, FaultErrno::Enospc);
        policy.enabled = false;
        injector.set_policy(policy);
        assert!(injector.check(FaultOp::Create).is_ok());

        injector.set_policy(FaultPolicy::always(FaultOp::Create, FaultErrno::Enospc));
        assert_eq!(injector.check(FaultOp::Create).unwrap_err().errno(), ENOSPC);
        injector.clear();
        assert!(injector.check(FaultOp::Create).is_ok());
    }
}
