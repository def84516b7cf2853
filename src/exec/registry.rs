//! Tool registry: named callables with declared parameter schemas, bound
//! to handlers that mutate [`VehicleState`](super::vehicle::VehicleState)
//! through the store.
//!
//! `execute` validates arguments against the schema (required fields,
//! types, enums, defaults) before dispatching, so handlers can assume a
//! well-formed argument map.

use super::vehicle::VehicleStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tool categories, used for the secondary index and console listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    VehicleControl,
    Climate,
    Entertainment,
    Navigation,
    Window,
    Lighting,
    Communication,
    Information,
    Energy,
    Adas,
    Wiper,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VehicleControl => "vehicle_control",
            Self::Climate => "climate",
            Self::Entertainment => "entertainment",
            Self::Navigation => "navigation",
            Self::Window => "window",
            Self::Lighting => "lighting",
            Self::Communication => "communication",
            Self::Information => "information",
            Self::Energy => "energy",
            Self::Adas => "adas",
            Self::Wiper => "wiper",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[
            Self::VehicleControl,
            Self::Climate,
            Self::Entertainment,
            Self::Navigation,
            Self::Window,
            Self::Lighting,
            Self::Communication,
            Self::Information,
            Self::Energy,
            Self::Adas,
            Self::Wiper,
        ]
    }
}

/// Declared parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: &str, param_type: ParamType, description: &str, required: bool) -> Self {
        Self {
            name: name.to_owned(),
            param_type,
            description: description.to_owned(),
            required,
            enum_values: None,
            default: None,
        }
    }

    #[must_use]
    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| serde_json::json!(v)).collect());
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Result of a tool invocation, returned to agents and over MCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Why an invocation failed before or during handler dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// No tool registered under that name.
    UnknownTool(String),
    /// Argument validation failure.
    InvalidParams(String),
    /// The handler itself failed.
    Execution(String),
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTool(name) => write!(f, "Tool not found: {name}"),
            Self::InvalidParams(msg) => write!(f, "{msg}"),
            Self::Execution(msg) => write!(f, "Tool execution failed: {msg}"),
        }
    }
}

type Handler = Arc<
    dyn Fn(&VehicleStore, &serde_json::Map<String, serde_json::Value>) -> std::result::Result<ToolOutput, String>
        + Send
        + Sync,
>;

/// A registered tool.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ToolParameter>,
    handler: Handler,
}

impl Tool {
    pub fn new(
        name: &str,
        description: &str,
        category: ToolCategory,
        parameters: Vec<ToolParameter>,
        handler: Handler,
    ) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            category,
            parameters,
            handler,
        }
    }

    /// JSON-Schema-like input schema for the MCP `tools/list` surface.
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_owned(), serde_json::json!(param.param_type.as_str()));
            prop.insert(
                "description".to_owned(),
                serde_json::json!(param.description),
            );
            if let Some(values) = &param.enum_values {
                prop.insert("enum".to_owned(), serde_json::json!(values));
            }
            if let Some(default) = &param.default {
                prop.insert("default".to_owned(), default.clone());
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(prop));
            if param.required {
                required.push(param.name.clone());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

/// Registry indexed by name, with a secondary category index.
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    by_category: HashMap<ToolCategory, Vec<String>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtin_tools()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            by_category: HashMap::new(),
        }
    }

    /// The stock in-vehicle catalog.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::empty();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Tool) {
        self.by_category
            .entry(tool.category)
            .or_default()
            .push(tool.name.clone());
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tools, or only one category's.
    pub fn list(&self, category: Option<ToolCategory>) -> Vec<&Tool> {
        match category {
            Some(cat) => self
                .by_category
                .get(&cat)
                .map(|names| names.iter().filter_map(|n| self.tools.get(n)).collect())
                .unwrap_or_default(),
            None => {
                let mut tools: Vec<&Tool> = self.tools.values().collect();
                tools.sort_by(|a, b| a.name.cmp(&b.name));
                tools
            }
        }
    }

    /// Validate `arguments` against the tool's schema and dispatch.
    pub fn execute(
        &self,
        store: &VehicleStore,
        name: &str,
        arguments: &serde_json::Value,
    ) -> std::result::Result<ToolOutput, ExecuteError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ExecuteError::UnknownTool(name.to_owned()))?;

        let mut args = match arguments {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ExecuteError::InvalidParams(
                    "arguments must be an object".to_owned(),
                ));
            }
        };

        for param in &tool.parameters {
            match args.get(&param.name) {
                None => {
                    if let Some(default) = &param.default {
                        args.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(ExecuteError::InvalidParams(format!(
                            "missing required parameter: {}",
                            param.name
                        )));
                    }
                }
                Some(value) => {
                    if !param.param_type.matches(value) {
                        return Err(ExecuteError::InvalidParams(format!(
                            "parameter {} must be a {}",
                            param.name,
                            param.param_type.as_str()
                        )));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(ExecuteError::InvalidParams(format!(
                                "invalid value for {}: {}",
                                param.name, value
                            )));
                        }
                    }
                }
            }
        }

        debug!(tool = name, "executing tool");
        (tool.handler)(store, &args).map_err(ExecuteError::Execution)
    }
}

// -- argument helpers for handlers --

pub(crate) fn arg_str<'a>(
    args: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub(crate) fn arg_f64(args: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<f64> {
    args.get(key).and_then(serde_json::Value::as_f64)
}

// -- the stock catalog --

fn tool(
    name: &str,
    description: &str,
    category: ToolCategory,
    parameters: Vec<ToolParameter>,
    handler: impl Fn(&VehicleStore, &serde_json::Map<String, serde_json::Value>) -> std::result::Result<ToolOutput, String>
    + Send
    + Sync
    + 'static,
) -> Tool {
    Tool::new(name, description, category, parameters, Arc::new(handler))
}

fn zone_param() -> ToolParameter {
    ToolParameter::new("zone", ParamType::String, "作用区域", true)
        .with_enum(&["driver", "passenger", "rear_left", "rear_right", "all"])
}

fn position_param() -> ToolParameter {
    ToolParameter::new("position", ParamType::String, "车窗位置", true)
        .with_enum(&["driver", "passenger", "rear_left", "rear_right", "all"])
}

fn apply_zoned(map: &mut HashMap<String, f32>, zone: &str, value: f32) {
    if zone == "all" {
        for slot in map.values_mut() {
            *slot = value;
        }
    } else if let Some(slot) = map.get_mut(zone) {
        *slot = value;
    }
}

fn apply_zoned_u8(map: &mut HashMap<String, u8>, zone: &str, value: u8) {
    if zone == "all" {
        for slot in map.values_mut() {
            *slot = value;
        }
    } else if let Some(slot) = map.get_mut(zone) {
        *slot = value;
    }
}

#[allow(clippy::too_many_lines)]
fn builtin_tools() -> Vec<Tool> {
    vec![
        // Vehicle control
        tool(
            "start_engine",
            "启动发动机",
            ToolCategory::VehicleControl,
            vec![],
            |store, _| {
                store.with_mut(|s| s.engine_running = true);
                Ok(ToolOutput::ok("发动机已启动"))
            },
        ),
        tool(
            "stop_engine",
            "熄火",
            ToolCategory::VehicleControl,
            vec![],
            |store, _| {
                store.with_mut(|s| s.engine_running = false);
                Ok(ToolOutput::ok("发动机已熄火"))
            },
        ),
        tool(
            "lock_vehicle",
            "锁车",
            ToolCategory::VehicleControl,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.locked = true;
                    s.doors_locked = true;
                });
                Ok(ToolOutput::ok("车辆已上锁"))
            },
        ),
        tool(
            "unlock_vehicle",
            "解锁车辆",
            ToolCategory::VehicleControl,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.locked = false;
                    s.doors_locked = false;
                });
                Ok(ToolOutput::ok("车辆已解锁"))
            },
        ),
        tool(
            "set_driving_mode",
            "设置驾驶模式",
            ToolCategory::VehicleControl,
            vec![
                ToolParameter::new("mode", ParamType::String, "驾驶模式", true)
                    .with_enum(&["comfort", "sport", "eco", "snow", "offroad"]),
            ],
            |store, args| {
                let mode = arg_str(args, "mode").unwrap_or("comfort").to_owned();
                store.with_mut(|s| s.driving_mode = mode.clone());
                Ok(ToolOutput::ok(format!("驾驶模式已切换为{mode}")))
            },
        ),
        tool(
            "enable_cruise_control",
            "开启定速巡航",
            ToolCategory::VehicleControl,
            vec![ToolParameter::new(
                "speed",
                ParamType::Number,
                "巡航速度(km/h)",
                true,
            )],
            |store, args| {
                let speed = arg_f64(args, "speed").unwrap_or(0.0) as f32;
                store.with_mut(|s| {
                    s.cruise_control_enabled = true;
                    s.cruise_control_speed = speed;
                });
                Ok(ToolOutput::ok(format!("定速巡航已设为{speed}公里每小时")))
            },
        ),
        tool(
            "disable_cruise_control",
            "关闭定速巡航",
            ToolCategory::VehicleControl,
            vec![],
            |store, _| {
                store.with_mut(|s| s.cruise_control_enabled = false);
                Ok(ToolOutput::ok("定速巡航已关闭"))
            },
        ),
        // Climate
        tool(
            "turn_on_ac",
            "打开空调",
            ToolCategory::Climate,
            vec![],
            |store, _| {
                store.with_mut(|s| s.ac_on = true);
                Ok(ToolOutput::ok("空调已打开"))
            },
        ),
        tool(
            "turn_off_ac",
            "关闭空调",
            ToolCategory::Climate,
            vec![],
            |store, _| {
                store.with_mut(|s| s.ac_on = false);
                Ok(ToolOutput::ok("空调已关闭"))
            },
        ),
        tool(
            "set_temperature",
            "设置空调温度",
            ToolCategory::Climate,
            vec![
                zone_param(),
                ToolParameter::new("temperature", ParamType::Number, "温度(摄氏度)", true),
            ],
            |store, args| {
                let zone = arg_str(args, "zone").unwrap_or("all").to_owned();
                let temperature = arg_f64(args, "temperature").unwrap_or(22.0) as f32;
                store.with_mut(|s| {
                    s.ac_on = true;
                    apply_zoned(&mut s.temperature_c, &zone, temperature);
                });
                Ok(ToolOutput::ok_with(
                    format!("温度已调至{temperature}度"),
                    serde_json::json!({"zone": zone, "temperature": temperature}),
                ))
            },
        ),
        tool(
            "increase_temperature",
            "升高温度",
            ToolCategory::Climate,
            vec![
                ToolParameter::new("zone", ParamType::String, "作用区域", false)
                    .with_enum(&["driver", "passenger", "rear_left", "rear_right", "all"])
                    .with_default(serde_json::json!("all")),
                ToolParameter::new("delta", ParamType::Number, "变化值(摄氏度)", false)
                    .with_default(serde_json::json!(1)),
            ],
            |store, args| {
                let zone = arg_str(args, "zone").unwrap_or("all").to_owned();
                let delta = arg_f64(args, "delta").unwrap_or(1.0) as f32;
                store.with_mut(|s| {
                    if zone == "all" {
                        for v in s.temperature_c.values_mut() {
                            *v += delta;
                        }
                    } else if let Some(v) = s.temperature_c.get_mut(&zone) {
                        *v += delta;
                    }
                });
                Ok(ToolOutput::ok(format!("温度已升高{delta}度")))
            },
        ),
        tool(
            "decrease_temperature",
            "降低温度",
            ToolCategory::Climate,
            vec![
                ToolParameter::new("zone", ParamType::String, "作用区域", false)
                    .with_enum(&["driver", "passenger", "rear_left", "rear_right", "all"])
                    .with_default(serde_json::json!("all")),
                ToolParameter::new("delta", ParamType::Number, "变化值(摄氏度)", false)
                    .with_default(serde_json::json!(1)),
            ],
            |store, args| {
                let zone = arg_str(args, "zone").unwrap_or("all").to_owned();
                let delta = arg_f64(args, "delta").unwrap_or(1.0) as f32;
                store.with_mut(|s| {
                    if zone == "all" {
                        for v in s.temperature_c.values_mut() {
                            *v -= delta;
                        }
                    } else if let Some(v) = s.temperature_c.get_mut(&zone) {
                        *v -= delta;
                    }
                });
                Ok(ToolOutput::ok(format!("温度已降低{delta}度")))
            },
        ),
        tool(
            "set_fan_speed",
            "设置风速",
            ToolCategory::Climate,
            vec![ToolParameter::new("speed", ParamType::Number, "风速(1-7)", true)],
            |store, args| {
                let speed = arg_f64(args, "speed").unwrap_or(3.0);
                if !(1.0..=7.0).contains(&speed) {
                    return Err(format!("fan speed out of range: {speed}"));
                }
                store.with_mut(|s| s.fan_speed = speed as u8);
                Ok(ToolOutput::ok(format!("风速已设为{}档", speed as u8)))
            },
        ),
        tool(
            "set_air_direction",
            "设置出风方向",
            ToolCategory::Climate,
            vec![
                ToolParameter::new("direction", ParamType::String, "出风方向", true)
                    .with_enum(&["face", "feet", "face_feet", "windshield", "auto"]),
            ],
            |store, args| {
                let direction = arg_str(args, "direction").unwrap_or("auto").to_owned();
                store.with_mut(|s| s.air_direction = direction.clone());
                Ok(ToolOutput::ok("出风方向已调整"))
            },
        ),
        tool(
            "enable_defrost",
            "开启除雾",
            ToolCategory::Climate,
            vec![
                ToolParameter::new("position", ParamType::String, "除雾位置", true)
                    .with_enum(&["front", "rear", "all"]),
            ],
            |store, args| {
                let position = arg_str(args, "position").unwrap_or("front");
                store.with_mut(|s| match position {
                    "front" => s.defrost_front = true,
                    "rear" => s.defrost_rear = true,
                    _ => {
                        s.defrost_front = true;
                        s.defrost_rear = true;
                    }
                });
                Ok(ToolOutput::ok("除雾已开启"))
            },
        ),
        tool(
            "enable_seat_heating",
            "开启座椅加热",
            ToolCategory::Climate,
            vec![
                ToolParameter::new("seat", ParamType::String, "座椅", true)
                    .with_enum(&["driver", "passenger", "rear_left", "rear_right"]),
                ToolParameter::new("level", ParamType::Number, "加热级别(1-3)", false)
                    .with_default(serde_json::json!(2)),
            ],
            |store, args| {
                let seat = arg_str(args, "seat").unwrap_or("driver").to_owned();
                let level = arg_f64(args, "level").unwrap_or(2.0) as u8;
                store.with_mut(|s| apply_zoned_u8(&mut s.seat_heating, &seat, level));
                Ok(ToolOutput::ok(format!("座椅加热已开到{level}档")))
            },
        ),
        // Entertainment
        tool(
            "play_music",
            "播放音乐",
            ToolCategory::Entertainment,
            vec![
                ToolParameter::new("song", ParamType::String, "歌曲名", false),
                ToolParameter::new("artist", ParamType::String, "歌手", false),
            ],
            |store, args| {
                let song = arg_str(args, "song").unwrap_or("").to_owned();
                let artist = arg_str(args, "artist").unwrap_or("").to_owned();
                store.with_mut(|s| {
                    s.music_playing = true;
                    s.music_paused = false;
                    s.current_track = song.clone();
                    s.current_artist = artist.clone();
                });
                let message = if song.is_empty() {
                    "正在为您播放音乐".to_owned()
                } else if artist.is_empty() {
                    format!("正在播放《{song}》")
                } else {
                    format!("正在播放{artist}的《{song}》")
                };
                Ok(ToolOutput::ok_with(
                    message,
                    serde_json::json!({"song": song, "artist": artist}),
                ))
            },
        ),
        tool(
            "pause_music",
            "暂停音乐",
            ToolCategory::Entertainment,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.music_playing = false;
                    s.music_paused = true;
                });
                Ok(ToolOutput::ok("音乐已暂停"))
            },
        ),
        tool(
            "set_volume",
            "设置音量",
            ToolCategory::Entertainment,
            vec![ToolParameter::new("volume", ParamType::Number, "音量(0-100)", true)],
            |store, args| {
                let volume = arg_f64(args, "volume").unwrap_or(50.0);
                if !(0.0..=100.0).contains(&volume) {
                    return Err(format!("volume out of range: {volume}"));
                }
                store.with_mut(|s| {
                    s.volume = volume as u8;
                    s.muted = false;
                });
                Ok(ToolOutput::ok(format!("音量已设为{}", volume as u8)))
            },
        ),
        tool(
            "increase_volume",
            "增加音量",
            ToolCategory::Entertainment,
            vec![
                ToolParameter::new("delta", ParamType::Number, "变化值", false)
                    .with_default(serde_json::json!(5)),
            ],
            |store, args| {
                let delta = arg_f64(args, "delta").unwrap_or(5.0) as u8;
                store.with_mut(|s| s.volume = s.volume.saturating_add(delta).min(100));
                Ok(ToolOutput::ok("音量已调大"))
            },
        ),
        tool(
            "decrease_volume",
            "减小音量",
            ToolCategory::Entertainment,
            vec![
                ToolParameter::new("delta", ParamType::Number, "变化值", false)
                    .with_default(serde_json::json!(5)),
            ],
            |store, args| {
                let delta = arg_f64(args, "delta").unwrap_or(5.0) as u8;
                store.with_mut(|s| s.volume = s.volume.saturating_sub(delta));
                Ok(ToolOutput::ok("音量已调小"))
            },
        ),
        tool(
            "mute_audio",
            "静音",
            ToolCategory::Entertainment,
            vec![],
            |store, _| {
                store.with_mut(|s| s.muted = true);
                Ok(ToolOutput::ok("已静音"))
            },
        ),
        tool(
            "unmute_audio",
            "取消静音",
            ToolCategory::Entertainment,
            vec![],
            |store, _| {
                store.with_mut(|s| s.muted = false);
                Ok(ToolOutput::ok("已取消静音"))
            },
        ),
        tool(
            "switch_audio_source",
            "切换音源",
            ToolCategory::Entertainment,
            vec![
                ToolParameter::new("source", ParamType::String, "音源", true)
                    .with_enum(&["bluetooth", "usb", "radio", "aux", "online"]),
            ],
            |store, args| {
                let source = arg_str(args, "source").unwrap_or("bluetooth").to_owned();
                store.with_mut(|s| s.audio_source = source.clone());
                Ok(ToolOutput::ok(format!("已切换到{source}")))
            },
        ),
        tool(
            "play_radio",
            "播放收音机",
            ToolCategory::Entertainment,
            vec![ToolParameter::new(
                "frequency",
                ParamType::Number,
                "频率(MHz)",
                false,
            )],
            |store, args| {
                let frequency = arg_f64(args, "frequency").unwrap_or(93.9) as f32;
                store.with_mut(|s| {
                    s.audio_source = "radio".to_owned();
                    s.radio_frequency = frequency;
                    s.music_playing = true;
                });
                Ok(ToolOutput::ok(format!("收音机已调到{frequency}兆赫")))
            },
        ),
        // Navigation
        tool(
            "start_navigation",
            "开始导航",
            ToolCategory::Navigation,
            vec![ToolParameter::new(
                "destination",
                ParamType::String,
                "目的地",
                true,
            )],
            |store, args| {
                let destination = arg_str(args, "destination").unwrap_or("").to_owned();
                store.with_mut(|s| {
                    s.navigation_active = true;
                    s.navigation_destination = destination.clone();
                });
                Ok(ToolOutput::ok_with(
                    format!("已开始导航到{destination}"),
                    serde_json::json!({"destination": destination}),
                ))
            },
        ),
        tool(
            "stop_navigation",
            "结束导航",
            ToolCategory::Navigation,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.navigation_active = false;
                    s.navigation_destination.clear();
                });
                Ok(ToolOutput::ok("导航已结束"))
            },
        ),
        // Windows
        tool(
            "open_window",
            "打开车窗",
            ToolCategory::Window,
            vec![
                position_param(),
                ToolParameter::new("percent", ParamType::Number, "开度(0-100)", false)
                    .with_default(serde_json::json!(100)),
            ],
            |store, args| {
                let position = arg_str(args, "position").unwrap_or("driver").to_owned();
                let percent = arg_f64(args, "percent").unwrap_or(100.0) as u8;
                store.with_mut(|s| apply_zoned_u8(&mut s.windows, &position, percent.min(100)));
                Ok(ToolOutput::ok("车窗已打开"))
            },
        ),
        tool(
            "close_window",
            "关闭车窗",
            ToolCategory::Window,
            vec![position_param()],
            |store, args| {
                let position = arg_str(args, "position").unwrap_or("driver").to_owned();
                store.with_mut(|s| apply_zoned_u8(&mut s.windows, &position, 0));
                Ok(ToolOutput::ok("车窗已关闭"))
            },
        ),
        tool(
            "open_sunroof",
            "打开天窗",
            ToolCategory::Window,
            vec![
                ToolParameter::new("percent", ParamType::Number, "开度(0-100)", false)
                    .with_default(serde_json::json!(100)),
            ],
            |store, args| {
                let percent = arg_f64(args, "percent").unwrap_or(100.0) as u8;
                store.with_mut(|s| s.sunroof_position = percent.min(100));
                Ok(ToolOutput::ok("天窗已打开"))
            },
        ),
        tool(
            "close_sunroof",
            "关闭天窗",
            ToolCategory::Window,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.sunroof_position = 0;
                    s.sunroof_tilted = false;
                });
                Ok(ToolOutput::ok("天窗已关闭"))
            },
        ),
        // Lighting
        tool(
            "turn_on_headlights",
            "打开大灯",
            ToolCategory::Lighting,
            vec![],
            |store, _| {
                store.with_mut(|s| s.headlights_on = true);
                Ok(ToolOutput::ok("大灯已打开"))
            },
        ),
        tool(
            "turn_off_headlights",
            "关闭大灯",
            ToolCategory::Lighting,
            vec![],
            |store, _| {
                store.with_mut(|s| s.headlights_on = false);
                Ok(ToolOutput::ok("大灯已关闭"))
            },
        ),
        tool(
            "set_ambient_light_color",
            "设置氛围灯颜色",
            ToolCategory::Lighting,
            vec![ToolParameter::new("color", ParamType::String, "颜色", true)],
            |store, args| {
                let color = arg_str(args, "color").unwrap_or("white").to_owned();
                store.with_mut(|s| {
                    s.ambient_lights_on = true;
                    s.ambient_light_color = color.clone();
                });
                Ok(ToolOutput::ok(format!("氛围灯已切换为{color}")))
            },
        ),
        // Communication
        tool(
            "make_phone_call",
            "拨打电话",
            ToolCategory::Communication,
            vec![ToolParameter::new("contact", ParamType::String, "联系人", true)],
            |store, args| {
                let contact = arg_str(args, "contact").unwrap_or("").to_owned();
                store.with_mut(|s| {
                    s.call_active = true;
                    s.call_contact = contact.clone();
                });
                Ok(ToolOutput::ok(format!("正在呼叫{contact}")))
            },
        ),
        tool(
            "end_phone_call",
            "挂断电话",
            ToolCategory::Communication,
            vec![],
            |store, _| {
                store.with_mut(|s| {
                    s.call_active = false;
                    s.call_contact.clear();
                });
                Ok(ToolOutput::ok("通话已结束"))
            },
        ),
        // Information
        tool(
            "get_vehicle_status",
            "查询车辆状态",
            ToolCategory::Information,
            vec![],
            |store, _| {
                let snapshot = store.snapshot();
                let data = serde_json::to_value(&snapshot).map_err(|e| e.to_string())?;
                Ok(ToolOutput::ok_with("车辆状态已读取", data))
            },
        ),
        tool(
            "get_fuel_level",
            "查询剩余油量",
            ToolCategory::Information,
            vec![],
            |store, _| {
                let snapshot = store.snapshot();
                Ok(ToolOutput::ok_with(
                    format!("当前油量{}%", snapshot.fuel_level_pct),
                    serde_json::json!({"fuel_level_pct": snapshot.fuel_level_pct}),
                ))
            },
        ),
        tool(
            "get_outside_temperature",
            "查询车外温度",
            ToolCategory::Information,
            vec![],
            |store, _| {
                let snapshot = store.snapshot();
                Ok(ToolOutput::ok_with(
                    format!("车外温度{}度", snapshot.outside_temperature_c),
                    serde_json::json!({"outside_temperature_c": snapshot.outside_temperature_c}),
                ))
            },
        ),
        // Energy
        tool(
            "start_charging",
            "开始充电",
            ToolCategory::Energy,
            vec![],
            |store, _| {
                store.with_mut(|s| s.charging = true);
                Ok(ToolOutput::ok("已开始充电"))
            },
        ),
        tool(
            "set_charge_limit",
            "设置充电上限",
            ToolCategory::Energy,
            vec![ToolParameter::new("limit", ParamType::Number, "上限(50-100)", true)],
            |store, args| {
                let limit = arg_f64(args, "limit").unwrap_or(80.0);
                if !(50.0..=100.0).contains(&limit) {
                    return Err(format!("charge limit out of range: {limit}"));
                }
                store.with_mut(|s| s.charge_limit_pct = limit as u8);
                Ok(ToolOutput::ok(format!("充电上限已设为{}%", limit as u8)))
            },
        ),
        // ADAS
        tool(
            "enable_autopilot",
            "开启辅助驾驶",
            ToolCategory::Adas,
            vec![],
            |store, _| {
                store.with_mut(|s| s.autopilot = true);
                Ok(ToolOutput::ok("辅助驾驶已开启"))
            },
        ),
        tool(
            "disable_autopilot",
            "关闭辅助驾驶",
            ToolCategory::Adas,
            vec![],
            |store, _| {
                store.with_mut(|s| s.autopilot = false);
                Ok(ToolOutput::ok("辅助驾驶已关闭"))
            },
        ),
        tool(
            "set_following_distance",
            "设置跟车距离",
            ToolCategory::Adas,
            vec![ToolParameter::new("distance", ParamType::Number, "距离级别(1-5)", true)],
            |store, args| {
                let distance = arg_f64(args, "distance").unwrap_or(3.0);
                if !(1.0..=5.0).contains(&distance) {
                    return Err(format!("following distance out of range: {distance}"));
                }
                store.with_mut(|s| s.following_distance = distance as u8);
                Ok(ToolOutput::ok(format!("跟车距离已设为{}级", distance as u8)))
            },
        ),
        // Wipers
        tool(
            "turn_on_wipers",
            "打开雨刷",
            ToolCategory::Wiper,
            vec![
                ToolParameter::new("speed", ParamType::String, "雨刷速度", false)
                    .with_enum(&["slow", "medium", "fast", "auto"])
                    .with_default(serde_json::json!("auto")),
            ],
            |store, args| {
                let speed = arg_str(args, "speed").unwrap_or("auto").to_owned();
                store.with_mut(|s| {
                    s.wipers_on = true;
                    s.wiper_speed = speed;
                });
                Ok(ToolOutput::ok("雨刷已打开"))
            },
        ),
        tool(
            "turn_off_wipers",
            "关闭雨刷",
            ToolCategory::Wiper,
            vec![],
            |store, _| {
                store.with_mut(|s| s.wipers_on = false);
                Ok(ToolOutput::ok("雨刷已关闭"))
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (VehicleStore, ToolRegistry) {
        (VehicleStore::new(), ToolRegistry::with_builtin_tools())
    }

    #[test]
    fn catalog_is_substantial() {
        let (_, registry) = setup();
        assert!(registry.len() >= 40, "catalog has {} tools", registry.len());
    }

    #[test]
    fn execute_mutates_vehicle_state() {
        let (store, registry) = setup();
        let output = registry
            .execute(
                &store,
                "set_temperature",
                &serde_json::json!({"zone": "driver", "temperature": 22}),
            )
            .expect("execute");
        assert!(output.success);
        assert_eq!(store.snapshot().temperature_c["driver"], 22.0);
        assert!(store.snapshot().ac_on);
    }

    #[test]
    fn missing_required_parameter_rejected() {
        let (store, registry) = setup();
        let err = registry
            .execute(&store, "set_temperature", &serde_json::json!({"zone": "driver"}))
            .expect_err("must fail");
        assert_eq!(
            err,
            ExecuteError::InvalidParams("missing required parameter: temperature".to_owned())
        );
    }

    #[test]
    fn enum_values_enforced() {
        let (store, registry) = setup();
        let err = registry
            .execute(
                &store,
                "set_driving_mode",
                &serde_json::json!({"mode": "ludicrous"}),
            )
            .expect_err("must fail");
        assert!(matches!(err, ExecuteError::InvalidParams(_)));
    }

    #[test]
    fn defaults_applied_when_omitted() {
        let (store, registry) = setup();
        registry
            .execute(&store, "increase_volume", &serde_json::json!({}))
            .expect("execute");
        assert_eq!(store.snapshot().volume, 55);
    }

    #[test]
    fn type_mismatch_rejected() {
        let (store, registry) = setup();
        let err = registry
            .execute(&store, "set_volume", &serde_json::json!({"volume": "loud"}))
            .expect_err("must fail");
        assert!(matches!(err, ExecuteError::InvalidParams(_)));
    }

    #[test]
    fn unknown_tool_rejected() {
        let (store, registry) = setup();
        let err = registry
            .execute(&store, "summon_spaceship", &serde_json::Value::Null)
            .expect_err("must fail");
        assert!(matches!(err, ExecuteError::UnknownTool(_)));
    }

    #[test]
    fn handler_range_error_is_execution_error() {
        let (store, registry) = setup();
        let err = registry
            .execute(&store, "set_volume", &serde_json::json!({"volume": 400}))
            .expect_err("must fail");
        assert!(matches!(err, ExecuteError::Execution(_)));
    }

    #[test]
    fn category_index_lists_members() {
        let (_, registry) = setup();
        let climate = registry.list(Some(ToolCategory::Climate));
        assert!(climate.iter().any(|t| t.name == "set_temperature"));
        assert!(climate.iter().all(|t| t.category == ToolCategory::Climate));
    }

    #[test]
    fn input_schema_shape() {
        let (_, registry) = setup();
        let tool = registry.get("set_temperature").expect("tool");
        let schema = tool.input_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["temperature"].is_object());
        let required = schema["required"].as_array().expect("required");
        assert!(required.contains(&serde_json::json!("temperature")));
        assert!(required.contains(&serde_json::json!("zone")));
    }
}
