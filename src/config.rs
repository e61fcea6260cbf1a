//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CELLPILOT__*` 覆盖
//! （双下划线表示嵌套，如 `CELLPILOT__AGENT__MAX_ITERATIONS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::actions::GenerationSettings;
use crate::context::HistoryWindow;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；实际选择还取决于哪个 API Key 可用
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmDeepSeekSection,
    pub openai: LlmOpenAiSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

/// [agent] 段：循环上限、自动执行、上下文预算与采样参数
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub auto_execute: bool,
    /// 历史中最多处理的块数
    pub lookback_window: usize,
    /// 若为 true，lookback_window 按用户请求条数计
    pub count_exchanges: bool,
    /// 单个块全部输出的字符上限
    pub max_output_length: usize,
    pub selector_char_budget: usize,
    pub generation_char_budget: usize,
    pub selector_max_tokens: u32,
    pub generation_temperature: f32,
    pub edit_temperature: f32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            auto_execute: true,
            lookback_window: 10,
            count_exchanges: false,
            max_output_length: 2000,
            selector_char_budget: 5_000,
            generation_char_budget: 20_000,
            selector_max_tokens: 64,
            generation_temperature: 0.5,
            edit_temperature: 0.3,
        }
    }
}

impl AgentSection {
    pub fn history_window(&self) -> HistoryWindow {
        let window = HistoryWindow::new(self.lookback_window, self.max_output_length);
        if self.count_exchanges {
            window.exchanges()
        } else {
            window
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            char_budget: self.generation_char_budget,
            temperature: self.generation_temperature,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CELLPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CELLPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CELLPILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
