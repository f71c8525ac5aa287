//! Worker command construction.
//!
//! The agent is the external program a session runs. The base command comes
//! from config; model and thinking-level overrides are appended as flags
//! before the prompt.

use crate::config::Config;
use crate::session::ThinkingLevel;

pub struct Agent {
    base_command: Vec<String>,
}

impl Agent {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_command: config
                .effective_command()
                .split_whitespace()
                .map(String::from)
                .collect(),
        }
    }

    pub fn binary(&self) -> &str {
        self.base_command
            .first()
            .map(|s| s.as_str())
            .unwrap_or("claude")
    }

    /// Build the full command line for one session.
    ///
    /// The prompt is always the last argument so the worker treats everything
    /// before it as flags.
    pub fn command(
        &self,
        prompt: &str,
        model: Option<&str>,
        thinking_level: Option<ThinkingLevel>,
    ) -> Vec<String> {
        let mut cmd = self.base_command.clone();
        if let Some(m) = model {
            cmd.push("--model".to_string());
            cmd.push(m.to_string());
        }
        if let Some(level) = thinking_level {
            cmd.push("--thinking".to_string());
            cmd.push(level.as_str().to_string());
        }
        cmd.push(prompt.to_string());
        cmd
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
