// 模型管理模块

use crate::error::{AppError, AppResult};
use crate::utils::get_exe_dir;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MODELS_DIR_ENV: &str = "LACSS_MODELS_DIR";

/// 预训练模型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PretrainedModel {
    /// LiveCell 数据集（相差显微镜）
    LiveCell,
    /// TissueNet 数据集（荧光组织切片）
    TissueNet,
    /// 用户自定义模型文件
    Custom,
}

impl Default for PretrainedModel {
    fn default() -> Self {
        Self::LiveCell
    }
}

/// 模型信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// 模型唯一标识，同时是引擎可识别的内置名称
    pub id: String,
    /// 显示名称
    pub name: String,
    pub model: PretrainedModel,
    /// 本地模型文件名
    pub filename: String,
    pub description: String,
}

static MODEL_CATALOG: Lazy<Vec<ModelInfo>> = Lazy::new(|| {
    vec![
        ModelInfo {
            id: "livecell".to_string(),
            name: "LiveCell".to_string(),
            model: PretrainedModel::LiveCell,
            filename: "lacss_livecell.pkl".to_string(),
            description: "相差显微镜下的单层培养细胞".to_string(),
        },
        ModelInfo {
            id: "tissuenet".to_string(),
            name: "TissueNet".to_string(),
            model: PretrainedModel::TissueNet,
            filename: "lacss_tissuenet.pkl".to_string(),
            description: "双通道荧光组织切片".to_string(),
        },
    ]
});

/// 获取所有内置模型
pub fn get_available_models() -> &'static [ModelInfo] {
    &MODEL_CATALOG
}

pub fn get_model_info(model: PretrainedModel) -> Option<&'static ModelInfo> {
    MODEL_CATALOG.iter().find(|m| m.model == model)
}

/// 获取模型目录
/// 优先使用环境变量 LACSS_MODELS_DIR，未设置则回退到可执行文件目录下的 models
pub fn get_models_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(MODELS_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    get_exe_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("models")
}

/// 解析传给引擎的模型参数
///
/// - 自定义模型: 必须是存在的文件
/// - 内置模型: 本地文件存在时传路径，否则传模型 ID 由引擎自行下载
pub fn resolve_model_argument(
    model: PretrainedModel,
    custom_model_path: Option<&str>,
    models_dir: &Path,
) -> AppResult<String> {
    if model == PretrainedModel::Custom {
        let path = custom_model_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Config("自定义模型未设置路径".to_string()))?;
        if !Path::new(path).exists() {
            return Err(AppError::Config(format!("自定义模型文件不存在: {}", path)));
        }
        return Ok(path.to_string());
    }

    let info = get_model_info(model)
        .ok_or_else(|| AppError::Config(format!("未知模型: {:?}", model)))?;
    let local = models_dir.join(&info.filename);
    if local.exists() {
        Ok(local.to_string_lossy().to_string())
    } else {
        Ok(info.id.clone())
    }
}
