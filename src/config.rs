//! Run configuration.
//!
//! Supplied before registration: filtering decisions are made as tests are
//! registered. Loadable from YAML; every field is optional.
//!
//! ```rust
//! use proctor::RunConfig;
//! let config = RunConfig::from_yaml_str("filter: '!slow'\ntest_timeout: 500\n").unwrap();
//! assert_eq!(config.filter.as_deref(), Some("!slow"));
//! assert_eq!(config.test_timeout, Some(500));
//! assert!(config.reorder);
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Free-text filter against `"<group full name>: <test name>"`, or `/regex/i`.
    /// A leading `!` inverts it.
    pub filter: Option<String>,
    /// Group full names to run, matched case-insensitively along the parent chain.
    pub module: Vec<String>,
    /// Group ids to run, matched along the parent chain.
    pub module_id: Vec<String>,
    /// Test ids to run.
    pub test_id: Vec<String>,
    /// Shuffles the queue deterministically.
    pub seed: Option<String>,
    /// Default pause timeout in milliseconds.
    pub test_timeout: Option<u64>,
    /// Run previously failed tests first.
    pub reorder: bool,
    /// Report a failure when no test ran.
    pub fail_on_zero_tests: bool,
    /// Fail tests that never call `expect`.
    pub require_expects: bool,
    /// Fail tests that add or remove globals.
    pub no_globals: bool,
    /// Milliseconds between yields to the host runtime.
    pub update_rate: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: None,
            module: Vec::new(),
            module_id: Vec::new(),
            test_id: Vec::new(),
            seed: None,
            test_timeout: None,
            reorder: true,
            fail_on_zero_tests: true,
            require_expects: false,
            no_globals: false,
            update_rate: 1000,
        }
    }
}

impl RunConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module.push(module.into());
        self
    }

    pub fn with_module_id(mut self, module_id: impl Into<String>) -> Self {
        self.module_id.push(module_id.into());
        self
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id.push(test_id.into());
        self
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_test_timeout(mut self, millis: u64) -> Self {
        self.test_timeout = Some(millis);
        self
    }

    pub fn with_reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }

    pub fn with_fail_on_zero_tests(mut self, fail: bool) -> Self {
        self.fail_on_zero_tests = fail;
        self
    }

    pub fn with_require_expects(mut self, require: bool) -> Self {
        self.require_expects = require;
        self
    }

    pub fn with_no_globals(mut self, no_globals: bool) -> Self {
        self.no_globals = no_globals;
        self
    }

    pub fn with_update_rate(mut self, millis: u64) -> Self {
        self.update_rate = millis;
        self
    }
}
