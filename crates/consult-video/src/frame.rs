/// Decoded audio samples for one playout interval.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved i16 PCM samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
    pub timestamp_ms: u64,
}

/// One decoded I420 picture.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl MediaFrame {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            MediaFrame::Audio(f) => f.timestamp_ms,
            MediaFrame::Video(f) => f.timestamp_ms,
        }
    }
}
