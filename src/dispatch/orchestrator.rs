// 逐帧分发
//
// 单个引擎实例独占计算资源，帧之间严格串行；任何错误终止整次分发，
// 不返回部分结果，也不重试。

use crate::config::InferenceSettings;
use crate::dispatch::cancel::CancelFlag;
use crate::dispatch::source::{check_input, crop_window, CropWindow, DetectionRegion, ImageSource};
use crate::dispatch::volume::LabelVolume;
use crate::error::{AppError, AppResult};
use crate::protocol::{encode_request, parse_response, LabelMask};
use crate::utils::generate_id;
use crate::worker::InferenceWorker;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 进度回调类型：(progress: 0.0-1.0, message)
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// 一次分发的输出，携带后续时空校正所需的全部信息
#[derive(Debug, Clone)]
pub struct DispatchOutput {
    pub volume: LabelVolume,
    /// 第一帧的绝对帧号
    pub min_frame: i64,
    pub frame_interval: f64,
    pub crop: CropWindow,
    pub calibration: [f64; 3],
}

pub struct Dispatcher<'w, W: InferenceWorker> {
    worker: &'w mut W,
    progress_callback: Option<ProgressCallback>,
    failed_volume: Option<LabelVolume>,
}

impl<'w, W: InferenceWorker> Dispatcher<'w, W> {
    /// 通道由外部持有，分发器只借用
    pub fn new(worker: &'w mut W) -> Self {
        Self {
            worker,
            progress_callback: None,
            failed_volume: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// 上一次失败前已解码的帧，仅供诊断
    pub fn failed_volume(&self) -> Option<&LabelVolume> {
        self.failed_volume.as_ref()
    }

    /// 执行分发
    pub fn dispatch(
        &mut self,
        source: &dyn ImageSource,
        region: &DetectionRegion,
        settings: &InferenceSettings,
        cancel: &CancelFlag,
    ) -> AppResult<DispatchOutput> {
        let dispatch_id = generate_id();
        self.failed_volume = None;

        settings.validate()?;
        let geometry = source.geometry();
        check_input(geometry, region)?;
        let crop = crop_window(geometry, region);

        let (frames, min_frame, frame_interval): (Vec<Option<i64>>, i64, f64) = match region.t {
            Some(t) => (t.iter().map(Some).collect(), t.min, geometry.frame_interval),
            None => (vec![None], 0, 1.0),
        };
        let total = frames.len();

        info!("[DISPATCH] === 开始分发 {} === 帧数={}, 裁剪窗口={}x{}x{}",
            dispatch_id, total, crop.width(), crop.height(), crop.channel_count());

        if !self.worker.is_alive() {
            error!("[DISPATCH] 推理进程不可用，放弃分发 {}", dispatch_id);
            return Err(AppError::WorkerUnavailable("推理进程已退出".to_string()));
        }

        let mut volume = LabelVolume::with_capacity(total);
        for (offset, frame) in frames.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("[DISPATCH] 分发 {} 被取消: 已完成 {}/{} 帧, 原因={:?}",
                    dispatch_id, offset, total, cancel.reason());
                return Err(AppError::Cancelled);
            }

            match self.process_frame(source, &crop, frame, settings) {
                Ok(mask) => volume.push(mask),
                Err(e) => {
                    error!("[DISPATCH] 分发 {} 在第 {} 帧失败: {}",
                        dispatch_id, frame.unwrap_or(0), e);
                    self.failed_volume = Some(volume);
                    return Err(e);
                }
            }

            if let Some(ref cb) = self.progress_callback {
                let done = offset + 1;
                cb(done as f32 / total as f32, &format!("已处理 {}/{} 帧", done, total));
            }
        }

        info!("[DISPATCH] === 分发 {} 完成 === {} 帧", dispatch_id, volume.len());
        Ok(DispatchOutput {
            volume,
            min_frame,
            frame_interval,
            crop,
            calibration: geometry.calibration,
        })
    }

    fn process_frame(
        &mut self,
        source: &dyn ImageSource,
        crop: &CropWindow,
        frame: Option<i64>,
        settings: &InferenceSettings,
    ) -> AppResult<LabelMask> {
        let tensor = source.read_tensor(crop, frame)?;
        let request = encode_request(&tensor, settings)?;
        let payload = self.worker.call(&request)?;
        let mask = parse_response(&payload)?;

        if mask.width() != crop.width() || mask.height() != crop.height() {
            return Err(AppError::Decoding(format!(
                "标签图尺寸 {}x{} 与裁剪窗口 {}x{} 不符",
                mask.width(), mask.height(), crop.width(), crop.height()
            )));
        }

        debug!("[DISPATCH] 帧 {:?} 完成, 目标数={}", frame, mask.labels().len());
        Ok(mask)
    }
}
