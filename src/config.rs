//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCRIBE__*` 覆盖（双下划线表示嵌套，如 `SCRIBE__AGENT__MAX_TOOL_CALLS=8`）。
//! AgentModeSettings 在每轮开始时按值复制进循环，运行中的轮次不受配置热更新影响。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentModeSettings,
    pub llm: LlmSection,
}

/// [app] 段：应用名、笔记库目录、聊天历史文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 笔记库根目录，未设置时用 ./vault
    pub workspace_root: Option<PathBuf>,
    /// 聊天历史 JSON 文件，未设置时用 <workspace_root>/.scribe/chat-history.json
    pub history_path: Option<PathBuf>,
    /// 覆盖默认 system prompt 的文件路径
    pub system_prompt_path: Option<PathBuf>,
}

impl AppSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("vault"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_path.clone().unwrap_or_else(|| {
            self.workspace_root()
                .join(".scribe")
                .join("chat-history.json")
        })
    }
}

/// [agent] 段：Agent 模式开关与预算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentModeSettings {
    /// 关闭时只做单次模型调用，不解析、不执行工具
    pub enabled: bool,
    /// 每轮最多执行的工具次数
    pub max_tool_calls: usize,
    /// 单次模型调用的超时（毫秒），0 表示不限
    pub timeout_ms: u64,
    /// 每轮最多的模型调用轮数
    pub max_iterations: usize,
}

impl Default for AgentModeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tool_calls: 5,
            timeout_ms: 30_000,
            max_iterations: 10,
        }
    }
}

/// [llm] 段：采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCRIBE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCRIBE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
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
        config::Environment::with_prefix("SCRIBE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
