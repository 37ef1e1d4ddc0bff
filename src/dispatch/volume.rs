// 多帧标签体

use crate::protocol::LabelMask;

/// 按帧偏移排列的标签图序列，偏移 0 对应本次分发的第一帧
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelVolume {
    masks: Vec<LabelMask>,
}

impl LabelVolume {
    pub fn with_capacity(frames: usize) -> Self {
        Self { masks: Vec::with_capacity(frames) }
    }

    pub fn push(&mut self, mask: LabelMask) {
        self.masks.push(mask);
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn get(&self, offset: usize) -> Option<&LabelMask> {
        self.masks.get(offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelMask> {
        self.masks.iter()
    }
}
