//! Recording runner shared by the unit tests

use crate::command::{CommandResult, CommandRunner, Executor};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

struct Rule {
    prefix: Vec<String>,
    status: i32,
    stdout: String,
}

/// Records every argument vector and answers with canned output
///
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer commands starting with `prefix`
    pub fn respond(&self, prefix: &[&str], status: i32, stdout: &str) {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            status,
            stdout: stdout.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.join(" ")).collect()
    }

    pub fn position(&self, command: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == command)
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn executor(self: &Arc<Self>) -> Executor {
        Executor::new(self.clone())
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn launch(&self, args: &[String]) -> CommandResult {
        self.calls.lock().unwrap().push(args.to_vec());
        let rules = self.rules.lock().unwrap();
        let rule = rules
            .iter()
            .rev()
            .find(|r| args.len() >= r.prefix.len() && args[..r.prefix.len()] == r.prefix[..]);
        match rule {
            Some(r) => CommandResult::completed(args.to_vec(), Some(r.status), r.stdout.clone().into_bytes(), Vec::new()),
            None => CommandResult::completed(args.to_vec(), Some(0), Vec::new(), Vec::new()),
        }
    }
}
