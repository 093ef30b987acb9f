//! Built-in texts attached to events for the calling model.

use std::fmt;

/// Language of observer-emitted text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    ZhCn,
}

impl Locale {
    /// Parse a language selector such as `en`, `zh`, `zh-CN` or `zh_CN.UTF-8`.
    /// Anything unrecognised is English.
    pub fn parse(value: &str) -> Self {
        let lang = value
            .split(['.', '@'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
            .replace('_', "-");
        if lang == "zh" || lang.starts_with("zh-") {
            Self::ZhCn
        } else {
            Self::En
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::ZhCn => "zh-CN",
        }
    }

    /// The page needs the user to log in before the worker can go on.
    pub fn login_required(&self) -> &'static str {
        match self {
            Self::En => "The page requires you to log in. Please complete the login in the browser and the task will continue.",
            Self::ZhCn => "当前页面需要登录，请在浏览器中完成登录后任务将继续。",
        }
    }

    /// Summary of one progress step.
    pub fn step_progress(&self, step_number: u32, goal: &str) -> String {
        match self {
            Self::En => format!("Step {}: {}", step_number, goal),
            Self::ZhCn => format!("第 {} 步：{}", step_number, goal),
        }
    }

    /// Summary of the run's artifact change set.
    pub fn files_changed(&self, count: usize) -> String {
        match self {
            Self::En => format!("{} file(s) changed during the task.", count),
            Self::ZhCn => format!("任务期间共有 {} 个文件发生变更。", count),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
