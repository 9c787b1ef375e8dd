//! Fixed-point sample conversion and master-volume mapping.

/// Scale used to normalize signed 16-bit samples.
///
/// Intentionally 32766 rather than 32768 so the negative extreme of the
/// usable range lands exactly on -1.0 instead of clipping past it.
pub const INT16_SCALE: f32 = 32766.0;

/// Attenuation floor treated as silence.
pub const SILENT_ATTENUATION: i32 = -32;

/// Converts one signed 16-bit sample to a normalized float.
#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / INT16_SCALE
}

/// Converts a run of interleaved 16-bit stereo samples to floats.
pub fn convert_interleaved(interleaved: &[i16]) -> Vec<f32> {
    interleaved.iter().map(|&s| sample_to_f32(s)).collect()
}

/// Clamps a master-volume attenuation to the supported 0..-32 range.
pub fn clamp_attenuation(attenuation: i32) -> i32 {
    attenuation.clamp(SILENT_ATTENUATION, 0)
}

/// Maps an attenuation (0 = full volume, -32 = silent) to a gain scalar.
///
/// The mapping is linear, not logarithmic. That is a deliberate
/// simplification of perceptual loudness carried over from the original
/// sound layer, not a bug.
pub fn attenuation_to_gain(attenuation: i32) -> f32 {
    (1.0 + attenuation as f32 / 32.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::{
        attenuation_to_gain, clamp_attenuation, convert_interleaved, sample_to_f32, INT16_SCALE,
    };

    #[test]
    fn test_sample_conversion_divides_by_exact_scale() {
        assert_eq!(sample_to_f32(0), 0.0);
        assert_eq!(sample_to_f32(32766), 1.0);
        assert_eq!(sample_to_f32(-32766), -1.0);
        assert_eq!(sample_to_f32(16383), 16383.0 / INT16_SCALE);
    }

    #[test]
    fn test_sample_conversion_round_trips_within_usable_range() {
        for sample in [-32766i16, -12345, -1, 0, 1, 777, 32766] {
            let converted = sample_to_f32(sample);
            let recovered = (converted * INT16_SCALE).round() as i32;
            assert_eq!(recovered, i32::from(sample));
        }
    }

    #[test]
    fn test_negative_extreme_exceeds_unity_and_saturates_at_render() {
        // -32768 and -32767 fall outside the nominal scale. They convert to
        // slightly below -1.0 and rely on the render-side clamp.
        assert!(sample_to_f32(-32768) < -1.0);
        assert!(sample_to_f32(-32767) < -1.0);
        assert!(sample_to_f32(-32768).clamp(-1.0, 1.0) == -1.0);
    }

    #[test]
    fn test_convert_interleaved_preserves_order_and_length() {
        let converted = convert_interleaved(&[0, 32766, -32766, 16383]);
        assert_eq!(converted.len(), 4);
        assert_eq!(converted[0], 0.0);
        assert_eq!(converted[1], 1.0);
        assert_eq!(converted[2], -1.0);
        assert_eq!(converted[3], 16383.0 / INT16_SCALE);
    }

    #[test]
    fn test_attenuation_maps_linearly_to_gain() {
        assert_eq!(attenuation_to_gain(0), 1.0);
        assert_eq!(attenuation_to_gain(-16), 0.5);
        assert_eq!(attenuation_to_gain(-32), 0.0);
        assert_eq!(attenuation_to_gain(-8), 0.75);
    }

    #[test]
    fn test_attenuation_beyond_range_clamps_to_silence_or_unity() {
        assert_eq!(attenuation_to_gain(-64), 0.0);
        assert_eq!(attenuation_to_gain(12), 1.0);
    }

    #[test]
    fn test_clamp_attenuation_bounds() {
        assert_eq!(clamp_attenuation(0), 0);
        assert_eq!(clamp_attenuation(5), 0);
        assert_eq!(clamp_attenuation(-32), -32);
        assert_eq!(clamp_attenuation(-100), -32);
        assert_eq!(clamp_attenuation(-7), -7);
    }
}
