//! 设置文件读写。
//!
//! 设置以 JSON 保存 `FittingConfig`，文件不存在时使用默认配置；
//! 读到的内容在返回前做一次范围校验。命令行首次运行时会把默认配置写到磁盘，
//! 方便用户在此基础上修改。

use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::fitting::FittingConfig;

pub fn load_settings(path: &Path) -> Result<FittingConfig, AppError> {
    if !path.exists() {
        log::info!("⚙️ 设置文件不存在，使用默认配置 - {}", path.display());
        return Ok(FittingConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config = serde_json::from_str::<FittingConfig>(&content)
        .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))?;

    config.validate()?;
    log::info!("⚙️ 已加载设置 - {}（档位：{}）", path.display(), config.infer_profile().as_str());

    Ok(config)
}

pub fn save_settings(path: &Path, config: &FittingConfig) -> Result<(), AppError> {
    config.validate()?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Settings(format!("创建设置目录失败: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Settings(format!("序列化设置失败: {}", e)))?;

    fs::write(path, content)?;
    Ok(())
}

/// 读取设置；文件不存在时写出一份默认配置再返回。
pub fn load_or_init_settings(path: &Path) -> Result<FittingConfig, AppError> {
    if path.exists() {
        return load_settings(path);
    }

    let config = FittingConfig::default();
    save_settings(path, &config)?;
    log::info!("📝 已写出默认设置 - {}", path.display());
    Ok(config)
}
