// 帧编解码
//
// 请求: [u32 BE 长度][Input]
// 响应: [u32 BE 长度][LabelResult]
// 像素与标签数据一律小端，这是与引擎共享的固定约定，不做协商。

use crate::config::InferenceSettings;
use crate::error::{AppError, AppResult};
use crate::protocol::message::{Image, Input, LabelResult, Settings};
use prost::Message;
use std::io::{ErrorKind, Read};
use tracing::{debug, trace};

/// 当前协议版本
pub const PROTOCOL_VERSION: u32 = 1;

/// 单帧负载上限，防止损坏的长度头触发超大分配
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// 读取负载时的最大预分配
const PREALLOC_LIMIT: usize = 1024 * 1024;

/// 单帧图像张量（通道优先: index = c*width*height + y*width + x）
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    width: usize,
    height: usize,
    channel_count: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(width: usize, height: usize, channel_count: usize, data: Vec<f32>) -> AppResult<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channel_count))
            .ok_or_else(|| AppError::Encoding(format!(
                "张量尺寸溢出: {}x{}x{}", width, height, channel_count
            )))?;
        if data.len() != expected {
            return Err(AppError::Encoding(format!(
                "像素数量 {} 与尺寸 {}x{}x{} 不符",
                data.len(), width, height, channel_count
            )));
        }
        Ok(Self { width, height, channel_count, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, x: usize, y: usize, c: usize) -> f32 {
        self.data[c * self.width * self.height + y * self.width + x]
    }
}

/// 单帧标签图，0 为背景，正值为帧内目标编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMask {
    width: usize,
    height: usize,
    data: Vec<i16>,
}

impl LabelMask {
    pub fn new(width: usize, height: usize, data: Vec<i16>) -> AppResult<Self> {
        match width.checked_mul(height) {
            Some(n) if n == data.len() => Ok(Self { width, height, data }),
            _ => Err(AppError::Decoding(format!(
                "标签数量 {} 与尺寸 {}x{} 不符", data.len(), width, height
            ))),
        }
    }

    /// 全背景标签图
    pub fn empty(width: usize, height: usize) -> Self {
        Self { width, height, data: vec![0; width * height] }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> i16 {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, label: i16) {
        self.data[y * self.width + x] = label;
    }

    /// 出现过的目标编号（升序，不含背景）
    pub fn labels(&self) -> Vec<i16> {
        let mut labels: Vec<i16> = self.data.iter().copied().filter(|l| *l > 0).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

/// 给消息加上长度头
fn frame_message<M: Message>(msg: &M) -> AppResult<Vec<u8>> {
    let len = msg.encoded_len();
    if len > MAX_FRAME_LEN || len > u32::MAX as usize {
        return Err(AppError::Encoding(format!("消息过大: {} 字节", len)));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + len);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    msg.encode(&mut buf)
        .map_err(|e| AppError::Encoding(format!("protobuf 编码失败: {}", e)))?;
    Ok(buf)
}

/// 编码请求帧
pub fn encode_request(tensor: &ImageTensor, settings: &InferenceSettings) -> AppResult<Vec<u8>> {
    if tensor.width == 0 || tensor.height == 0 || tensor.channel_count == 0 {
        return Err(AppError::Encoding(format!(
            "张量尺寸不能为 0: {}x{}x{}", tensor.width, tensor.height, tensor.channel_count
        )));
    }

    let mut data = Vec::with_capacity(tensor.data.len() * 4);
    for v in &tensor.data {
        data.extend_from_slice(&v.to_le_bytes());
    }

    let msg = Input {
        image: Some(Image {
            width: tensor.width as u64,
            height: tensor.height as u64,
            channel: tensor.channel_count as u64,
            data,
        }),
        settings: Some(Settings {
            detection_threshold: settings.detection_threshold,
            segmentation_threshold: settings.segmentation_threshold,
            min_cell_area: settings.min_object_area,
            remove_out_of_bound: settings.remove_out_of_bound,
            nms_iou: settings.nms_iou,
            scaling: settings.scaling,
        }),
        version: PROTOCOL_VERSION,
    };

    let frame = frame_message(&msg)?;
    trace!("[CODEC] 请求帧 {} 字节 ({}x{}x{})",
        frame.len(), tensor.width, tensor.height, tensor.channel_count);
    Ok(frame)
}

/// 读取一帧负载（不含长度头），阻塞直到读满或流关闭
pub fn read_frame<R: Read>(reader: &mut R) -> AppResult<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => AppError::Protocol("读取长度头时流已关闭".to_string()),
        _ => AppError::Protocol(format!("读取长度头失败: {}", e)),
    })?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(AppError::Protocol(format!("声明长度 {} 超过上限 {}", len, MAX_FRAME_LEN)));
    }

    // 按实际到达的字节增长，损坏的长度头不会触发大块预分配
    let mut payload = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader
        .take(len as u64)
        .read_to_end(&mut payload)
        .map_err(|e| AppError::Protocol(format!("读取负载失败: {}", e)))?;

    if payload.len() != len {
        return Err(AppError::Protocol(format!(
            "流提前关闭: 声明 {} 字节，仅收到 {} 字节", len, payload.len()
        )));
    }

    Ok(payload)
}

/// 解析响应负载
pub fn parse_response(payload: &[u8]) -> AppResult<LabelMask> {
    let msg = LabelResult::decode(payload)
        .map_err(|e| AppError::Protocol(format!("响应无法解析: {}", e)))?;

    let width = usize::try_from(msg.width)
        .map_err(|_| AppError::Decoding(format!("宽度越界: {}", msg.width)))?;
    let height = usize::try_from(msg.height)
        .map_err(|_| AppError::Decoding(format!("高度越界: {}", msg.height)))?;
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(2))
        .ok_or_else(|| AppError::Decoding(format!("标签尺寸溢出: {}x{}", width, height)))?;

    if msg.data.len() != expected {
        return Err(AppError::Decoding(format!(
            "标签数据 {} 字节，尺寸 {}x{} 需要 {} 字节",
            msg.data.len(), width, height, expected
        )));
    }

    let data = msg.data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    debug!("[CODEC] 收到标签图 {}x{}", width, height);
    LabelMask::new(width, height, data)
}

/// 读取并解析一帧响应
pub fn decode_response<R: Read>(reader: &mut R) -> AppResult<LabelMask> {
    let payload = read_frame(reader)?;
    parse_response(&payload)
}

/// 引擎侧：读取并解析一帧请求
pub fn decode_request<R: Read>(reader: &mut R) -> AppResult<(ImageTensor, InferenceSettings)> {
    let payload = read_frame(reader)?;
    let msg = Input::decode(payload.as_slice())
        .map_err(|e| AppError::Protocol(format!("请求无法解析: {}", e)))?;

    if msg.version > PROTOCOL_VERSION {
        return Err(AppError::Protocol(format!("不支持的协议版本: {}", msg.version)));
    }

    let image = msg.image
        .ok_or_else(|| AppError::Protocol("请求缺少图像字段".to_string()))?;
    if image.data.len() % 4 != 0 {
        return Err(AppError::Decoding(format!("像素数据 {} 字节不是 4 的整数倍", image.data.len())));
    }

    let data: Vec<f32> = image.data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let dim = |v: u64| usize::try_from(v)
        .map_err(|_| AppError::Decoding(format!("尺寸越界: {}", v)));
    let tensor = ImageTensor::new(dim(image.width)?, dim(image.height)?, dim(image.channel)?, data)
        .map_err(|e| AppError::Decoding(e.to_string()))?;

    let settings = msg.settings
        .map(|s| InferenceSettings {
            detection_threshold: s.detection_threshold,
            segmentation_threshold: s.segmentation_threshold,
            min_object_area: s.min_cell_area,
            nms_iou: s.nms_iou,
            scaling: s.scaling,
            remove_out_of_bound: s.remove_out_of_bound,
        })
        .unwrap_or_default();

    Ok((tensor, settings))
}

/// 引擎侧：编码响应帧
pub fn encode_response(mask: &LabelMask) -> AppResult<Vec<u8>> {
    let mut data = Vec::with_capacity(mask.data.len() * 2);
    for v in &mask.data {
        data.extend_from_slice(&v.to_le_bytes());
    }
    frame_message(&LabelResult {
        width: mask.width as u64,
        height: mask.height as u64,
        data,
    })
}
