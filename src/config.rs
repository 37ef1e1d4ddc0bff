// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use std::time::Duration;
use crate::error::{AppError, AppResult};
use crate::models::PretrainedModel;
use tracing::{info, warn};

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 结果输出模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// 标签图转换为检测点并校正坐标
    Detections,
    /// 直接返回多帧标签体
    LabelVolume,
}

impl Default for ResultMode {
    fn default() -> Self {
        Self::Detections
    }
}

/// 推理参数，每次分发期间不可变
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InferenceSettings {
    /// 检测阈值 (0.0 - 1.0)
    #[serde(default = "default_threshold")]
    pub detection_threshold: f32,
    /// 分割阈值 (0.0 - 1.0)
    #[serde(default = "default_threshold")]
    pub segmentation_threshold: f32,
    /// 最小目标面积（发给引擎时为像素；检测入口按 X 轴标定由物理单位换算）
    #[serde(default)]
    pub min_object_area: f32,
    /// 非极大值抑制 IoU，0 表示关闭
    #[serde(default)]
    pub nms_iou: f32,
    /// 图像缩放系数，引擎内部缩放后再还原
    #[serde(default = "default_scaling")]
    pub scaling: f32,
    /// 去除质心越界的目标
    #[serde(default)]
    pub remove_out_of_bound: bool,
}

fn default_threshold() -> f32 {
    0.5
}

fn default_scaling() -> f32 {
    1.0
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            detection_threshold: 0.5,
            segmentation_threshold: 0.5,
            min_object_area: 0.0,
            nms_iou: 0.0,
            scaling: 1.0,
            remove_out_of_bound: false,
        }
    }
}

impl InferenceSettings {
    /// 边界处的唯一校验
    ///
    /// 缩放为 0、最小面积非正的取值按原样透传给引擎，只对 0 缩放给出警告。
    pub fn validate(&self) -> AppResult<()> {
        let fields = [
            ("detection_threshold", self.detection_threshold),
            ("segmentation_threshold", self.segmentation_threshold),
            ("min_object_area", self.min_object_area),
            ("nms_iou", self.nms_iou),
            ("scaling", self.scaling),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(AppError::InvalidArgument(format!("{} 不是有限数值: {}", name, value)));
            }
        }

        let unit_fields = [
            ("detection_threshold", self.detection_threshold),
            ("segmentation_threshold", self.segmentation_threshold),
            ("nms_iou", self.nms_iou),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::InvalidArgument(format!("{} 超出范围 [0, 1]: {}", name, value)));
            }
        }

        if self.scaling < 0.0 {
            return Err(AppError::InvalidArgument(format!("scaling 不能为负: {}", self.scaling)));
        }
        if self.scaling == 0.0 {
            warn!("[CONFIG] scaling=0，引擎对该取值的行为未定义，按原样透传");
        }

        Ok(())
    }

    /// 将物理单位的最小面积换算为像素面积（按 X 轴标定）
    pub fn with_calibrated_area(&self, calibration_x: f64) -> AppResult<Self> {
        if !(calibration_x.is_finite() && calibration_x > 0.0) {
            return Err(AppError::InvalidArgument(format!("无效的 X 轴标定: {}", calibration_x)));
        }
        Ok(Self {
            min_object_area: (self.min_object_area as f64 / calibration_x) as f32,
            ..*self
        })
    }
}

/// 推理进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Python 解释器（或打包后的引擎可执行文件）
    #[serde(default = "default_program")]
    pub program: String,
    /// 服务脚本路径，未设置时按可执行文件目录查找
    #[serde(default)]
    pub script_path: Option<String>,
    /// 预训练模型
    #[serde(default)]
    pub model: PretrainedModel,
    /// 自定义模型路径（model = custom 时使用）
    #[serde(default)]
    pub custom_model_path: Option<String>,
    /// 单帧响应超时（毫秒），未设置则无限等待
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
}

fn default_program() -> String {
    "python".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script_path: None,
            model: PretrainedModel::default(),
            custom_model_path: None,
            response_timeout_ms: None,
        }
    }
}

impl WorkerConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 推理进程
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 推理参数
    #[serde(default)]
    pub inference: InferenceSettings,
    /// 输出模式
    #[serde(default)]
    pub result_mode: ResultMode,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

/// 加载配置
///
/// 文件不存在时写入默认配置；解析失败时回退默认配置。
pub fn load_config(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("[CONFIG] 配置文件 JSON 解析失败: {}，使用默认配置", e);
            AppConfig::default()
        })
    } else {
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        config
    };

    config.inference.validate()
        .map_err(|e| AppError::Config(e.to_string()))?;

    info!("[CONFIG] 配置已加载: {}", config_path.display());
    Ok(config)
}

/// 保存配置
pub fn save_config(config_path: &Path, config: &AppConfig) -> AppResult<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;
    Ok(())
}
