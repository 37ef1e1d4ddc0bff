// 宿主图像源
//
// 轴语义固定为 X、Y、可选通道、可选 Z、可选 T。每帧发送给引擎的区域
// （裁剪窗口）与时间无关；Z 层折叠进通道数，引擎只看到多通道 2D 图像。

use crate::error::{AppError, AppResult};
use crate::protocol::ImageTensor;
use serde::{Deserialize, Serialize};

/// 闭区间 [min, max]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub min: i64,
    pub max: i64,
}

impl Span {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// 覆盖 [0, extent) 的整段
    pub fn full(extent: usize) -> Self {
        Self { min: 0, max: extent as i64 - 1 }
    }

    /// 长度超出 usize 时饱和为 usize::MAX
    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            let n = self.max as i128 - self.min as i128 + 1;
            usize::try_from(n).unwrap_or(usize::MAX)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.min..=self.max
    }

    fn within(&self, extent: usize) -> bool {
        !self.is_empty() && self.min >= 0 && self.max < extent as i64
    }
}

/// 图像几何与标定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub width: usize,
    pub height: usize,
    /// 通道轴长度，None 表示无通道轴（视为单通道）
    pub channels: Option<usize>,
    /// Z 轴长度
    pub depth: Option<usize>,
    /// T 轴长度
    pub frames: Option<usize>,
    /// X/Y/Z 每像素物理尺寸
    pub calibration: [f64; 3],
    /// 帧间隔（物理时间）
    pub frame_interval: f64,
}

impl ImageGeometry {
    /// 单通道 2D 图像，标定为 1
    pub fn planar(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            channels: None,
            depth: None,
            frames: None,
            calibration: [1.0, 1.0, 1.0],
            frame_interval: 1.0,
        }
    }

    pub fn has_time_axis(&self) -> bool {
        self.frames.is_some()
    }

    /// 各轴长度的乘积
    pub fn voxel_count(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.channels.unwrap_or(1))?
            .checked_mul(self.depth.unwrap_or(1))?
            .checked_mul(self.frames.unwrap_or(1))
    }
}

/// 检测区域：空间范围必填，Z/T 仅在图像存在对应轴时有效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRegion {
    pub x: Span,
    pub y: Span,
    pub z: Option<Span>,
    pub t: Option<Span>,
}

impl DetectionRegion {
    /// 覆盖整幅图像
    pub fn full(geometry: &ImageGeometry) -> Self {
        Self {
            x: Span::full(geometry.width),
            y: Span::full(geometry.height),
            z: geometry.depth.map(Span::full),
            t: geometry.frames.map(Span::full),
        }
    }
}

/// 每帧发送的空间（及通道/Z）范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x: Span,
    pub y: Span,
    pub z: Option<Span>,
    pub channels: Option<Span>,
}

impl CropWindow {
    pub fn width(&self) -> usize {
        self.x.len()
    }

    pub fn height(&self) -> usize {
        self.y.len()
    }

    /// 展平后的通道数 = 通道 × Z 层
    pub fn channel_count(&self) -> usize {
        self.channels.map_or(1, |c| c.len()) * self.z.map_or(1, |z| z.len())
    }

    /// 空间轴数（X、Y，存在 Z 时为 3）
    pub fn spatial_dims(&self) -> usize {
        if self.z.is_some() { 3 } else { 2 }
    }

    /// X/Y/Z 起点，无 Z 时为 0
    pub fn spatial_min(&self) -> [i64; 3] {
        [self.x.min, self.y.min, self.z.map_or(0, |z| z.min)]
    }
}

/// 检查区域与图像是否匹配
pub fn check_input(geometry: &ImageGeometry, region: &DetectionRegion) -> AppResult<()> {
    if geometry.width == 0 || geometry.height == 0 {
        return Err(AppError::InvalidArgument("图像尺寸为 0".to_string()));
    }
    if geometry.calibration.iter().any(|c| !(c.is_finite() && *c > 0.0)) {
        return Err(AppError::InvalidArgument(format!("无效的空间标定: {:?}", geometry.calibration)));
    }
    if !(geometry.frame_interval.is_finite() && geometry.frame_interval > 0.0) {
        return Err(AppError::InvalidArgument(format!("无效的帧间隔: {}", geometry.frame_interval)));
    }
    if geometry.channels == Some(0) || geometry.depth == Some(0) || geometry.frames == Some(0) {
        return Err(AppError::InvalidArgument("存在长度为 0 的轴".to_string()));
    }

    if !region.x.within(geometry.width) {
        return Err(AppError::InvalidArgument(format!("X 范围越界: {:?}", region.x)));
    }
    if !region.y.within(geometry.height) {
        return Err(AppError::InvalidArgument(format!("Y 范围越界: {:?}", region.y)));
    }

    match (geometry.depth, region.z) {
        (Some(depth), Some(z)) if !z.within(depth) => {
            return Err(AppError::InvalidArgument(format!("Z 范围越界: {:?}", z)));
        }
        (None, Some(_)) => {
            return Err(AppError::InvalidArgument("图像没有 Z 轴，区域不应指定 Z".to_string()));
        }
        _ => {}
    }

    match (geometry.frames, region.t) {
        (Some(frames), Some(t)) if !t.within(frames) => {
            return Err(AppError::InvalidArgument(format!("T 范围越界: {:?}", t)));
        }
        _ => {}
    }
    if geometry.has_time_axis() != region.t.is_some() {
        return Err(AppError::InvalidArgument(if geometry.has_time_axis() {
            "图像有时间轴，区域必须指定 T".to_string()
        } else {
            "图像没有时间轴，区域不应指定 T".to_string()
        }));
    }
    Ok(())
}

/// 由区域推导裁剪窗口：通道取整轴，Z 取区域（未指定时取整轴）
pub fn crop_window(geometry: &ImageGeometry, region: &DetectionRegion) -> CropWindow {
    CropWindow {
        x: region.x,
        y: region.y,
        z: geometry.depth.map(|d| region.z.unwrap_or_else(|| Span::full(d))),
        channels: geometry.channels.map(Span::full),
    }
}

/// 检查裁剪窗口是否完全落在图像内；无通道/Z 轴时对应范围只能为空或 [0, 0]
pub fn check_crop(geometry: &ImageGeometry, crop: &CropWindow) -> AppResult<()> {
    let axes = [
        ("X", Some(crop.x), geometry.width),
        ("Y", Some(crop.y), geometry.height),
        ("C", crop.channels, geometry.channels.unwrap_or(1)),
        ("Z", crop.z, geometry.depth.unwrap_or(1)),
    ];
    for (name, span, extent) in axes {
        if let Some(span) = span {
            if !span.within(extent) {
                return Err(AppError::InvalidArgument(format!(
                    "裁剪窗口 {} 范围越界: {:?} (轴长 {})", name, span, extent
                )));
            }
        }
    }
    Ok(())
}

/// 宿主图像源
pub trait ImageSource {
    fn geometry(&self) -> &ImageGeometry;

    /// 读取某一帧裁剪窗口内的像素；无时间轴时 frame 为 None
    fn read_tensor(&self, crop: &CropWindow, frame: Option<i64>) -> AppResult<ImageTensor>;
}

/// 内存中的超栈图像，存储顺序 X 最快，其后 Y、C、Z、T
#[derive(Debug, Clone)]
pub struct ArrayImage {
    geometry: ImageGeometry,
    data: Vec<f32>,
}

impl ArrayImage {
    pub fn new(geometry: ImageGeometry, data: Vec<f32>) -> AppResult<Self> {
        let expected = geometry.voxel_count()
            .ok_or_else(|| AppError::InvalidArgument("图像尺寸溢出".to_string()))?;
        if data.len() != expected {
            return Err(AppError::InvalidArgument(format!(
                "像素数量 {} 与几何 {:?} 不符", data.len(), geometry
            )));
        }
        Ok(Self { geometry, data })
    }

    /// 按坐标生成像素值
    pub fn from_fn<F>(geometry: ImageGeometry, mut f: F) -> AppResult<Self>
    where
        F: FnMut(usize, usize, usize, usize, usize) -> f32,
    {
        let (w, h) = (geometry.width, geometry.height);
        let (nc, nz, nt) = (
            geometry.channels.unwrap_or(1),
            geometry.depth.unwrap_or(1),
            geometry.frames.unwrap_or(1),
        );
        let mut data = Vec::with_capacity(w * h * nc * nz * nt);
        for t in 0..nt {
            for z in 0..nz {
                for c in 0..nc {
                    for y in 0..h {
                        for x in 0..w {
                            data.push(f(x, y, c, z, t));
                        }
                    }
                }
            }
        }
        Self::new(geometry, data)
    }

    fn index(&self, x: usize, y: usize, c: usize, z: usize, t: usize) -> usize {
        let g = &self.geometry;
        let nc = g.channels.unwrap_or(1);
        let nz = g.depth.unwrap_or(1);
        x + g.width * (y + g.height * (c + nc * (z + nz * t)))
    }
}

impl ImageSource for ArrayImage {
    fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    fn read_tensor(&self, crop: &CropWindow, frame: Option<i64>) -> AppResult<ImageTensor> {
        let t = match (self.geometry.frames, frame) {
            (Some(frames), Some(t)) if t >= 0 && (t as usize) < frames => t as usize,
            (None, None) => 0,
            _ => {
                return Err(AppError::InvalidArgument(format!("无效的帧: {:?}", frame)));
            }
        };

        check_crop(&self.geometry, crop)?;
        let z_range = crop.z.unwrap_or(Span::new(0, 0));
        let c_range = crop.channels.unwrap_or(Span::new(0, 0));
        let mut data = Vec::with_capacity(crop.width() * crop.height() * crop.channel_count());
        // 展平通道: Z 在外，C 在内
        for z in z_range.iter() {
            for c in c_range.iter() {
                for y in crop.y.iter() {
                    for x in crop.x.iter() {
                        let i = self.index(x as usize, y as usize, c as usize, z as usize, t);
                        data.push(self.data[i]);
                    }
                }
            }
        }

        ImageTensor::new(crop.width(), crop.height(), crop.channel_count(), data)
    }
}
