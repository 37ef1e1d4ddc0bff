// 帧编解码模块
//
// 线上格式：4 字节大端长度头 + protobuf 负载。
//
// 子模块：
// - message: protobuf 消息定义
// - codec: 张量/标签图与帧之间的转换，以及引擎侧的对称实现

pub mod message;
pub mod codec;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, parse_response,
    read_frame, ImageTensor, LabelMask, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
