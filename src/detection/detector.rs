// 目标检测入口
//
// 组合分发器与结果校正器：把检测区域逐帧送入 Lacss 推理进程，
// 按配置返回校正后的点状目标，或原样返回多帧标签体。
//
// 最小面积参数以物理单位给出，发送前按 X 轴标定换算为像素面积。

use crate::config::{InferenceSettings, ResultMode};
use crate::correction::{Detection, LabelObjectExtractor, ResultCorrector};
use crate::dispatch::{
    CancelFlag, DetectionRegion, DispatchOutput, Dispatcher, ImageSource, ProgressCallback,
};
use crate::error::{AppError, AppResult};
use crate::worker::InferenceWorker;
use std::time::Instant;
use tracing::{error, info};

/// 检测器名称，用于错误信息前缀
pub const DETECTOR_NAME: &str = "Lacss";

/// 检测输出
#[derive(Debug, Clone)]
pub enum DetectionOutput {
    /// 校正后的目标，按帧顺序排列
    Detections(Vec<Detection>),
    /// 未经转换的标签体及其时空信息
    Labels(DispatchOutput),
}

/// 一次检测的结果
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub output: DetectionOutput,
    /// 实际处理的帧数
    pub frames_processed: usize,
    /// 处理耗时（毫秒）
    pub processing_time_ms: u64,
}

impl DetectionResult {
    pub fn detections(&self) -> Option<&[Detection]> {
        match self.output {
            DetectionOutput::Detections(ref d) => Some(d.as_slice()),
            DetectionOutput::Labels(_) => None,
        }
    }
}

/// 带检测器名称前缀的错误信息
pub fn failure_message(err: &AppError) -> String {
    format!("{}: {}", DETECTOR_NAME, err)
}

/// 执行目标检测
///
/// worker 由调用方持有并可跨多次检测复用；取消时返回 `AppError::Cancelled`，
/// 不返回部分结果。
#[allow(clippy::too_many_arguments)]
pub fn detect_objects<W, E>(
    worker: &mut W,
    source: &dyn ImageSource,
    region: &DetectionRegion,
    settings: &InferenceSettings,
    mode: ResultMode,
    extractor: E,
    progress_callback: Option<ProgressCallback>,
    cancel: &CancelFlag,
) -> AppResult<DetectionResult>
where
    W: InferenceWorker,
    E: LabelObjectExtractor,
{
    let started = Instant::now();
    let geometry = source.geometry();
    info!("[DETECTOR] === 开始目标检测 ===");
    info!("[DETECTOR] 图像: {}x{}, 通道={:?}, Z={:?}, T={:?}",
        geometry.width, geometry.height, geometry.channels, geometry.depth, geometry.frames);
    info!("[DETECTOR] 检测配置: 检测阈值={}, 分割阈值={}, 最小面积={}, NMS IoU={}, 缩放={}",
        settings.detection_threshold, settings.segmentation_threshold,
        settings.min_object_area, settings.nms_iou, settings.scaling);

    let pixel_settings = settings.with_calibrated_area(geometry.calibration[0])?;

    if let Some(ref cb) = progress_callback {
        cb(0.0, "准备目标检测...");
    }

    let mut dispatcher = Dispatcher::new(worker);
    if let Some(cb) = progress_callback.clone() {
        dispatcher = dispatcher.with_progress(cb);
    }

    let output = match dispatcher.dispatch(source, region, &pixel_settings, cancel) {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => {
            info!("[DETECTOR] 目标检测被取消");
            return Err(e);
        }
        Err(e) => {
            let kept = dispatcher.failed_volume().map_or(0, |v| v.len());
            error!("[DETECTOR] {} (失败前已完成 {} 帧)", failure_message(&e), kept);
            return Err(e);
        }
    };

    let frames_processed = output.volume.len();
    let output = match mode {
        ResultMode::LabelVolume => DetectionOutput::Labels(output),
        ResultMode::Detections => {
            let detections = ResultCorrector::new(extractor).correct(&output).map_err(|e| {
                error!("[DETECTOR] {}", failure_message(&e));
                e
            })?;
            DetectionOutput::Detections(detections)
        }
    };

    if let Some(ref cb) = progress_callback {
        cb(1.0, "检测完成");
    }

    let processing_time_ms = started.elapsed().as_millis() as u64;
    match output {
        DetectionOutput::Detections(ref d) => {
            info!("[DETECTOR] === 检测完成 === {} 个目标, 处理帧数={}, 耗时={}ms",
                d.len(), frames_processed, processing_time_ms);
        }
        DetectionOutput::Labels(_) => {
            info!("[DETECTOR] === 检测完成 === 返回标签体, 处理帧数={}, 耗时={}ms",
                frames_processed, processing_time_ms);
        }
    }

    Ok(DetectionResult {
        output,
        frames_processed,
        processing_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::CentroidExtractor;
    use crate::dispatch::{ArrayImage, ImageGeometry, Span};
    use crate::protocol::{decode_request, encode_response, LabelMask};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::sync::Arc;

    /// 在 (第一个像素值, 0) 处标一个像素，并记录收到的最小面积
    struct MarkerWorker {
        calls: usize,
        seen_min_area: Vec<f32>,
    }

    impl InferenceWorker for MarkerWorker {
        fn is_alive(&mut self) -> bool {
            true
        }

        fn call(&mut self, request: &[u8]) -> AppResult<Vec<u8>> {
            self.calls += 1;
            let (tensor, settings) = decode_request(&mut Cursor::new(request))?;
            self.seen_min_area.push(settings.min_object_area);
            let mut mask = LabelMask::empty(tensor.width(), tensor.height());
            mask.set(tensor.pixel(0, 0, 0) as usize, 0, 1);
            let frame = encode_response(&mask)?;
            Ok(frame[4..].to_vec())
        }
    }

    fn worker() -> MarkerWorker {
        MarkerWorker { calls: 0, seen_min_area: Vec::new() }
    }

    fn movie() -> ArrayImage {
        let geometry = ImageGeometry {
            frames: Some(6),
            calibration: [0.5, 0.5, 1.0],
            frame_interval: 10.0,
            ..ImageGeometry::planar(8, 8)
        };
        ArrayImage::from_fn(geometry, |_, _, _, _, t| t as f32).unwrap()
    }

    fn region() -> DetectionRegion {
        DetectionRegion {
            x: Span::new(2, 7),
            y: Span::new(1, 6),
            z: None,
            t: Some(Span::new(2, 4)),
        }
    }

    #[test]
    fn test_detections_in_absolute_coordinates() {
        let image = movie();
        let mut w = worker();
        let settings = InferenceSettings { min_object_area: 2.0, ..Default::default() };

        let result = detect_objects(
            &mut w, &image, &region(), &settings, ResultMode::Detections,
            CentroidExtractor, None, &CancelFlag::new(),
        )
        .unwrap();

        assert_eq!(result.frames_processed, 3);
        let detections = result.detections().unwrap();
        assert_eq!(detections.len(), 3);
        for (i, d) in detections.iter().enumerate() {
            let t = 2 + i as i64;
            // 帧内 x = t，加上裁剪起点 2，乘标定 0.5
            assert_eq!(d.position, [(t + 2) as f64 * 0.5, 0.5, 0.0]);
            assert_eq!(d.frame, t);
            assert_eq!(d.time, t as f64 * 10.0);
        }
        // 2.0 / 0.5
        assert_eq!(w.seen_min_area, vec![4.0; 3]);
    }

    #[test]
    fn test_label_volume_mode() {
        let image = movie();
        let mut w = worker();

        let result = detect_objects(
            &mut w, &image, &region(), &InferenceSettings::default(), ResultMode::LabelVolume,
            CentroidExtractor, None, &CancelFlag::new(),
        )
        .unwrap();

        assert!(result.detections().is_none());
        match result.output {
            DetectionOutput::Labels(output) => {
                assert_eq!(output.volume.len(), 3);
                assert_eq!(output.min_frame, 2);
                assert_eq!(output.frame_interval, 10.0);
                assert_eq!(output.volume.get(0).unwrap().get(2, 0), 1);
            }
            DetectionOutput::Detections(_) => panic!("应返回标签体"),
        }
    }

    #[test]
    fn test_progress_reported() {
        let image = movie();
        let mut w = worker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressCallback = Arc::new(move |p: f32, _: &str| sink.lock().push(p));

        detect_objects(
            &mut w, &image, &region(), &InferenceSettings::default(), ResultMode::Detections,
            CentroidExtractor, Some(cb), &CancelFlag::new(),
        )
        .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_cancel_returns_cancelled() {
        let image = movie();
        let mut w = worker();
        let cancel = CancelFlag::new();
        cancel.cancel("用户停止");

        let err = detect_objects(
            &mut w, &image, &region(), &InferenceSettings::default(), ResultMode::Detections,
            CentroidExtractor, None, &cancel,
        )
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(w.calls, 0);
    }

    #[test]
    fn test_failure_message_prefixed() {
        let err = AppError::WorkerUnavailable("推理进程已退出".to_string());
        let msg = failure_message(&err);
        assert!(msg.starts_with("Lacss: "));
        assert!(msg.contains("推理进程已退出"));
    }

    #[test]
    fn test_invalid_region_rejected_before_any_call() {
        let image = movie();
        let mut w = worker();
        let mut bad = region();
        bad.t = Some(Span::new(4, 9));

        let err = detect_objects(
            &mut w, &image, &bad, &InferenceSettings::default(), ResultMode::Detections,
            CentroidExtractor, None, &CancelFlag::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(w.calls, 0);
    }
}
