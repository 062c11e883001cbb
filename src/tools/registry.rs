//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与分发。
//! dispatch 永不返回 Err：未注册的名字、缺少必填参数、参数类型不符都会变成 `ToolResult { success: false }`。
//! 强类型工具实现 TypedTool，参数结构体经 schemars 生成 schema，经 serde 解码后再执行。
//! 注册表本身无状态、无副作用；每次分发输出一条结构化审计日志（JSON）。

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::{ToolContext, ToolResult};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应命令 JSON 中的 "action" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；`required` 数组在分发前校验
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行后本轮是否需要等待用户回复（如 ask_user）
    fn pauses_turn(&self) -> bool {
        false
    }

    /// 执行工具；失败也必须以 ToolResult 返回
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// 强类型工具：参数为具体结构体
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Params: DeserializeOwned + JsonSchema + Send + 'static;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn pauses_turn(&self) -> bool {
        false
    }

    async fn run(&self, params: Self::Params, ctx: &ToolContext) -> ToolResult;
}

/// 把 TypedTool 适配为 Tool：schema 由 schemars 生成，参数由 serde 解码
pub struct Typed<T: TypedTool> {
    inner: T,
    schema: Value,
    _params: PhantomData<fn() -> T::Params>,
}

impl<T: TypedTool> Typed<T> {
    pub fn new(inner: T) -> Self {
        let schema = serde_json::to_value(schema_for!(T::Params)).unwrap_or_else(|_| {
            serde_json::json!({ "type": "object", "properties": {}, "required": [] })
        });
        Self {
            inner,
            schema,
            _params: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn pauses_turn(&self) -> bool {
        self.inner.pauses_turn()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        match serde_json::from_value::<T::Params>(params) {
            Ok(p) => self.inner.run(p, ctx).await,
            Err(e) => ToolResult::err(format!(
                "Invalid parameters for {}: {}",
                self.inner.name(),
                e
            )),
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "Tool re-registered, previous definition replaced");
        }
    }

    pub fn register_typed<T: TypedTool>(&mut self, tool: T) {
        self.register(Typed::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn pauses_turn(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.pauses_turn()).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按名称排序，便于 prompt 稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 动态生成工具 schema JSON（与实际注册的工具一致）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }

    /// 分发一次工具调用；任何失败都折叠为 ToolResult
    pub async fn dispatch(&self, name: &str, params: &Value, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let result = match self.tools.get(name) {
            None => ToolResult::err(format!("Unknown tool: {}", name)),
            Some(tool) => match missing_required(&tool.parameters_schema(), params) {
                Some(missing) => ToolResult::err(format!(
                    "Missing required parameter(s) for {}: {}",
                    name,
                    missing.join(", ")
                )),
                None => tool.execute(params.clone(), ctx).await,
            },
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.success,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(params),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }
}

/// 返回 schema `required` 中缺失（或为 null）的字段名
fn missing_required(schema: &Value, params: &Value) -> Option<Vec<String>> {
    let required = schema.get("required")?.as_array()?;
    let missing: Vec<String> = required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|key| {
            params
                .get(*key)
                .map(|v| v.is_null())
                .unwrap_or(true)
        })
        .map(|key| key.to_string())
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(missing)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
