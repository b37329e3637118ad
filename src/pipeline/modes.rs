//! 模式策略：模式名 -> 指令文本
//!
//! 内置 general / coder / writer / researcher 四种；配置中的 `[modes]` 可覆盖或新增。
//! 启动时构建一次，之后只读。未知模式退回 general。

use std::collections::HashMap;

pub const DEFAULT_MODE: &str = "general";

const GENERAL: &str = "You are Nabd, an autonomous agent that satisfies requests by planning and \
executing actions with tools. Use the tools instead of guessing. Do not ask for permission to \
run code or create files. When the user asked for a file, create it once the data is gathered. \
Save artifacts under the data directory.";

const CODER: &str = "You are Nabd in programmer mode. Prefer demonstrating solutions with \
working code run through python_repl. Keep explanations short, write modular code with error \
handling, and save code files with file_writer when asked.";

const WRITER: &str = "You are Nabd in writer mode. Produce well structured long-form content \
with headings, lists and a clear introduction and conclusion. Research facts with web_search \
and save finished pieces with file_writer.";

const RESEARCHER: &str = "You are Nabd in research mode. Never state facts without searching \
first. Cross-reference several searches, attribute every finding to its source and point out \
conflicting information.";

/// 只读的模式策略表
#[derive(Debug, Clone)]
pub struct ModePolicies {
    policies: HashMap<String, String>,
}

impl Default for ModePolicies {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl ModePolicies {
    /// 内置策略 + 配置覆盖
    pub fn new(overrides: &HashMap<String, String>) -> Self {
        let mut policies: HashMap<String, String> = [
            ("general", GENERAL),
            ("coder", CODER),
            ("writer", WRITER),
            ("researcher", RESEARCHER),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (name, text) in overrides {
            policies.insert(name.trim().to_lowercase(), text.clone());
        }
        Self { policies }
    }

    /// 规范化模式名：未知或空时返回 general
    pub fn resolve(&self, mode: &str) -> String {
        let key = mode.trim().to_lowercase();
        if self.policies.contains_key(&key) {
            key
        } else {
            DEFAULT_MODE.to_string()
        }
    }

    /// 模式对应的指令文本
    pub fn instruction(&self, mode: &str) -> &str {
        let key = self.resolve(mode);
        self.policies
            .get(&key)
            .map(String::as_str)
            .unwrap_or(GENERAL)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.policies.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mode_falls_back_to_general() {
        let modes = ModePolicies::default();
        assert_eq!(modes.resolve("pirate"), "general");
        assert_eq!(modes.resolve(" Coder "), "coder");
        assert_eq!(modes.instruction("pirate"), modes.instruction("general"));
    }

    #[test]
    fn test_overrides_replace_and_add() {
        let mut overrides = HashMap::new();
        overrides.insert("writer".to_string(), "short".to_string());
        overrides.insert("Analyst".to_string(), "numbers".to_string());
        let modes = ModePolicies::new(&overrides);
        assert_eq!(modes.instruction("writer"), "short");
        assert_eq!(modes.instruction("analyst"), "numbers");
        assert_eq!(modes.names().len(), 5);
    }
}
