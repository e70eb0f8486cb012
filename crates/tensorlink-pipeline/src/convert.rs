//! Frame ⇄ tensor conversions.
//!
//! Pure functions at the codec boundary: the orchestrator derives engine
//! input from raw frames here and rebuilds raw frames from engine output,
//! stamping the paired timing metadata on the way out.

use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::types::{AudioFrame, AudioRecord, Rational, Tensor, TensorShape, VideoFrame};

/// Interleaved RGB24 → normalized NHWC float tensor with `batch == 1`.
pub fn video_frame_to_tensor(frame: &VideoFrame) -> Result<Tensor> {
    let shape = TensorShape {
        batch: 1,
        height: frame.height as usize,
        width: frame.width as usize,
        channels: 3,
    };
    if frame.data.len() != shape.element_count() {
        return Err(LinkError::InvariantViolation(format!(
            "video frame carries {} bytes, expected {} for {}x{} RGB24",
            frame.data.len(),
            shape.element_count(),
            frame.width,
            frame.height
        )));
    }
    let data = frame.data.iter().map(|&b| f32::from(b) / 255.0).collect();
    Tensor::new(data, shape)
}

/// Single-frame tensor → RGB24 frame, values scaled and clamped to
/// `[0, 255]`.
pub fn tensor_to_video_frame(tensor: &Tensor, pts: i64, time_base: Rational) -> Result<VideoFrame> {
    if tensor.shape.batch != 1 || tensor.shape.channels != 3 {
        return Err(LinkError::ShapeMismatch {
            expected: TensorShape {
                batch: 1,
                height: tensor.shape.height,
                width: tensor.shape.width,
                channels: 3,
            },
            actual: tensor.shape,
        });
    }
    let data = tensor
        .data
        .iter()
        .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
        .collect();
    Ok(VideoFrame {
        data,
        width: tensor.shape.width as u32,
        height: tensor.shape.height as u32,
        pts,
        time_base,
    })
}

/// Interleaved stereo → mono by per-sample channel mean.
pub fn audio_frame_to_mono(frame: &AudioFrame) -> Vec<i16> {
    frame
        .data
        .chunks_exact(2)
        .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
        .collect()
}

/// Mono samples → interleaved stereo frame carrying the record's timing.
pub fn mono_to_audio_frame(samples: &[i16], record: &AudioRecord) -> AudioFrame {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        data.push(s);
        data.push(s);
    }
    AudioFrame {
        data,
        sample_rate: record.sample_rate,
        samples: samples.len(),
        pts: record.pts,
        time_base: record.time_base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorlink_core::types::DispatchTag;

    #[test]
    fn video_round_trip_preserves_extremes() {
        let frame = VideoFrame {
            data: vec![0, 255, 0, 255, 0, 255, 255, 0, 255, 0, 255, 0],
            width: 2,
            height: 2,
            pts: 90_000,
            time_base: Rational::new(1, 90_000),
        };
        let tensor = video_frame_to_tensor(&frame).expect("tensor");
        assert_eq!(tensor.shape.unit_elements(), 12);
        assert_eq!(tensor.data[0], 0.0);
        assert_eq!(tensor.data[1], 1.0);

        let back = tensor_to_video_frame(&tensor, frame.pts, frame.time_base).expect("frame");
        assert_eq!(back.data, frame.data);
        assert_eq!(back.pts, 90_000);
    }

    #[test]
    fn video_rejects_short_buffer() {
        let frame = VideoFrame {
            data: vec![0; 11],
            width: 2,
            height: 2,
            pts: 0,
            time_base: Rational::new(1, 1),
        };
        assert!(video_frame_to_tensor(&frame).is_err());
    }

    #[test]
    fn stereo_downmix_is_channel_mean() {
        let frame = AudioFrame {
            data: vec![100, 200, -50, -150, 0, 1],
            sample_rate: 48_000,
            samples: 3,
            pts: 0,
            time_base: Rational::new(1, 48_000),
        };
        assert_eq!(audio_frame_to_mono(&frame), vec![150, -100, 0]);
    }

    #[test]
    fn mono_upmix_duplicates_channels() {
        let record = AudioRecord {
            tag: DispatchTag::new(),
            pts: 1024,
            time_base: Rational::new(1, 48_000),
            sample_rate: 48_000,
            samples: 2,
        };
        let frame = mono_to_audio_frame(&[7, -3], &record);
        assert_eq!(frame.data, vec![7, 7, -3, -3]);
        assert_eq!(frame.samples, 2);
        assert_eq!(frame.pts, 1024);
        assert_eq!(frame.sample_rate, 48_000);
    }
}
