// 推理引擎线上消息定义
//
// 与引擎侧 lacss_pb2 共享同一份 schema，字段编号一旦发布不可更改。

/// 单帧图像，像素为小端 f32，通道优先（c, y, x）排列
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Image {
    #[prost(uint64, tag="1")]
    pub width: u64,
    #[prost(uint64, tag="2")]
    pub height: u64,
    /// 展平后的通道数（通道 × Z 层）
    #[prost(uint64, tag="3")]
    pub channel: u64,
    #[prost(bytes="vec", tag="4")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Settings {
    #[prost(float, tag="1")]
    pub detection_threshold: f32,
    #[prost(float, tag="2")]
    pub segmentation_threshold: f32,
    #[prost(float, tag="3")]
    pub min_cell_area: f32,
    #[prost(bool, tag="4")]
    pub remove_out_of_bound: bool,
    #[prost(float, tag="5")]
    pub nms_iou: f32,
    #[prost(float, tag="6")]
    pub scaling: f32,
}

/// 请求
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Input {
    #[prost(message, optional, tag="1")]
    pub image: ::core::option::Option<Image>,
    #[prost(message, optional, tag="2")]
    pub settings: ::core::option::Option<Settings>,
    /// 协议版本，旧引擎不认识该字段时按 0 处理
    #[prost(uint32, tag="3")]
    pub version: u32,
}

/// 响应：单帧标签图，小端 i16
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelResult {
    #[prost(uint64, tag="1")]
    pub width: u64,
    #[prost(uint64, tag="2")]
    pub height: u64,
    #[prost(bytes="vec", tag="3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
