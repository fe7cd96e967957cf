//! Text transforms applied to a reply at insertion time.

use chrono::Timelike;
use regex::Regex;

use crate::config::GreetingConfig;

/// Source of the local hour; swapped out in tests.
pub trait Clock: Send + Sync {
    fn hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn hour(&self) -> u32 {
        self.0
    }
}

/// Rewrites any configured greeting to the one matching the current hour, so
/// a snippet saved as "Bom dia" reads "Boa tarde" when used after noon.
#[derive(Debug, Clone)]
pub struct GreetingRewriter {
    config: GreetingConfig,
    pattern: Option<Regex>,
}

impl GreetingRewriter {
    pub fn new(config: GreetingConfig) -> Self {
        let phrases: Vec<String> = [&config.morning, &config.afternoon, &config.evening]
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| regex::escape(p))
            .collect();
        let pattern = if phrases.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b({})\b", phrases.join("|"))).ok()
        };
        Self { config, pattern }
    }

    pub fn rewrite(&self, text: &str, hour: u32) -> String {
        match &self.pattern {
            Some(pattern) => {
                let greeting = self.config.greeting_for_hour(hour);
                pattern.replace_all(text, regex::NoExpand(greeting)).into_owned()
            }
            None => text.to_string(),
        }
    }
}

/// Converts `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}
