//! Test selection.
//!
//! A test is valid when it passes every configured criterion, checked in order:
//! test id allow-list, group id allow-list, group name allow-list, then the text
//! filter. Internal tests are always valid; tests in ignored groups never are.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::RunConfig;
use crate::model::{GroupId, Model, TestId};

/// Compiled form of the selection settings of a [`RunConfig`].
#[derive(Debug)]
pub(crate) struct TestFilter {
    test_ids: Vec<String>,
    module_ids: Vec<String>,
    /// Lowercased.
    modules: Vec<String>,
    text: Option<TextFilter>,
}

#[derive(Debug)]
enum TextFilter {
    Pattern { regex: Regex, exclude: bool },
    Substring { needle: String, include: bool },
}

impl TextFilter {
    fn parse(filter: &str) -> Self {
        let shape = Regex::new(r"(?s)^(!?)/(.*)/(i?)$").ok();
        if let Some(caps) = shape.as_ref().and_then(|re| re.captures(filter)) {
            let exclude = !caps[1].is_empty();
            let case_insensitive = !caps[3].is_empty();
            match RegexBuilder::new(&caps[2])
                .case_insensitive(case_insensitive)
                .build()
            {
                Ok(regex) => return TextFilter::Pattern { regex, exclude },
                Err(err) => {
                    warn!(target: "proctor::filter", filter, error = %err, "invalid regex filter, matching as text");
                }
            }
        }
        let lowered = filter.to_lowercase();
        match lowered.strip_prefix('!') {
            Some(rest) => TextFilter::Substring {
                needle: rest.to_string(),
                include: false,
            },
            None => TextFilter::Substring {
                needle: lowered,
                include: true,
            },
        }
    }

    fn accepts(&self, full_name: &str) -> bool {
        match self {
            TextFilter::Pattern { regex, exclude } => regex.is_match(full_name) != *exclude,
            TextFilter::Substring { needle, include } => {
                full_name.to_lowercase().contains(needle.as_str()) == *include
            }
        }
    }
}

impl TestFilter {
    pub(crate) fn new(config: &RunConfig) -> Self {
        Self {
            test_ids: config.test_id.clone(),
            module_ids: config.module_id.clone(),
            modules: config.module.iter().map(|m| m.to_lowercase()).collect(),
            text: config
                .filter
                .as_deref()
                .filter(|f| !f.is_empty())
                .map(TextFilter::parse),
        }
    }

    pub(crate) fn accepts(&self, model: &Model, id: TestId) -> bool {
        let test = model.test(id);
        if test.internal {
            return true;
        }
        if model.group(test.group).ignored {
            return false;
        }
        if !self.test_ids.is_empty() && !self.test_ids.contains(&test.test_id) {
            return false;
        }
        if !self.module_ids.is_empty()
            && !chain_matches(model, test.group, |g| {
                self.module_ids.contains(&model.group(g).module_id)
            })
        {
            return false;
        }
        if !self.modules.is_empty()
            && !chain_matches(model, test.group, |g| {
                self.modules
                    .contains(&model.group(g).full_name.to_lowercase())
            })
        {
            return false;
        }
        match &self.text {
            None => true,
            Some(text) => {
                let full_name = format!("{}: {}", model.group(test.group).full_name, test.name);
                text.accepts(&full_name)
            }
        }
    }
}

fn chain_matches(model: &Model, group: GroupId, matches: impl Fn(GroupId) -> bool) -> bool {
    model.ancestors(group).into_iter().any(matches)
}
