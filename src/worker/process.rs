// 推理进程管理
//
// 负责启动引擎进程、把 stdin/stdout 接成 WorkerChannel、转发 stderr 到日志、
// 提供存活探测，并在释放时结束进程。进程本身不做重启，由调用方决定。
//
// 命令解析优先级：
// 1. 配置中的 script_path
// 2. 打包版本: exe_dir/scripts/lacss_server.py
// 3. Resources: exe_dir/resources/scripts/lacss_server.py
// 4. 工作目录: scripts/lacss_server.py

use crate::config::WorkerConfig;
use crate::error::{AppError, AppResult};
use crate::models;
use crate::utils::{get_exe_dir, hidden_command};
use crate::worker::channel::WorkerChannel;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERVER_SCRIPT: &str = "lacss_server.py";

/// 运行中的推理进程
pub struct WorkerProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl WorkerProcess {
    /// 按配置启动引擎进程
    pub fn spawn(config: &WorkerConfig) -> AppResult<(Self, WorkerChannel)> {
        let (program, args) = resolve_worker_command(config)?;
        Self::spawn_command(&program, &args, config.response_timeout())
    }

    /// 启动任意命令作为推理进程
    pub fn spawn_command(
        program: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> AppResult<(Self, WorkerChannel)> {
        info!("[WORKER] 程序: {}", program);
        info!("[WORKER] 参数: {:?}", args);

        let mut child = hidden_command(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("[WORKER] 启动推理进程失败: {}", e);
                AppError::WorkerUnavailable(format!("启动推理进程失败: {}", e))
            })?;

        let pid = child.id();
        info!("[WORKER] 推理进程已启动: pid={}", pid);

        let stdin = child.stdin.take()
            .ok_or_else(|| AppError::WorkerUnavailable("无法获取推理进程输入流".into()))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| AppError::WorkerUnavailable("无法获取推理进程输出流".into()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, pid);
        }

        let child = Arc::new(Mutex::new(child));
        let probe = child.clone();
        let liveness = move || matches!(probe.lock().try_wait(), Ok(None));

        let channel = match WorkerChannel::new(stdin, stdout, liveness, timeout) {
            Ok(channel) => channel,
            Err(e) => {
                let mut guard = child.lock();
                let _ = guard.kill();
                let _ = guard.wait();
                return Err(e);
            }
        };

        Ok((Self { child, pid }, channel))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// 结束进程并回收
    pub fn shutdown(&self) {
        let mut child = self.child.lock();
        if let Ok(None) = child.try_wait() {
            info!("[WORKER] 结束推理进程: pid={}", self.pid);
            if let Err(e) = child.kill() {
                warn!("[WORKER] 结束推理进程失败: {}", e);
            }
        }
        let _ = child.wait();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 把引擎的 stderr 逐行写入日志
fn forward_stderr(stderr: ChildStderr, pid: u32) {
    let spawned = std::thread::Builder::new()
        .name(format!("lacss-worker-stderr-{}", pid))
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => {
                        debug!("[WORKER] stderr: {}", line.trim_end());
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!("[WORKER] 无法启动 stderr 转发线程: {}", e);
    }
}

/// 解析推理进程命令
/// 返回 (程序, 参数)，参数为 [脚本路径, 模型参数]
pub fn resolve_worker_command(config: &WorkerConfig) -> AppResult<(String, Vec<String>)> {
    let script = match &config.script_path {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => find_server_script(get_exe_dir().as_deref())
            .ok_or_else(|| AppError::Config(format!("找不到推理服务脚本 {}", SERVER_SCRIPT)))?,
    };

    let model = models::resolve_model_argument(
        config.model,
        config.custom_model_path.as_deref(),
        &models::get_models_dir(),
    )?;

    Ok((
        config.program.clone(),
        vec![script.to_string_lossy().to_string(), model],
    ))
}

/// 在可执行文件目录附近查找服务脚本
fn find_server_script(exe_dir: Option<&Path>) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(exe_dir) = exe_dir {
        candidates.push(exe_dir.join("scripts").join(SERVER_SCRIPT));
        candidates.push(exe_dir.join("resources").join("scripts").join(SERVER_SCRIPT));
    }
    candidates.push(PathBuf::from("scripts").join(SERVER_SCRIPT));

    candidates.into_iter().find(|p| p.exists())
}
