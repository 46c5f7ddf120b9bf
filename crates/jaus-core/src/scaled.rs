//! Scaled integers: fixed-point encoding of bounded real values.
//!
//! A value inside `[min, max]` maps linearly onto the full range of an
//! unsigned integer of 1, 2 or 4 bytes. Decoding recovers the value to within
//! one quantization step, `(max - min) / (2^(8 * width) - 1)`.

use crate::codec::CodecError;

/// Integer width used to carry a scaled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScaledWidth {
    Byte = 1,
    Short = 2,
    Int = 4,
}

impl ScaledWidth {
    /// Bytes on the wire.
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Largest integer this width can carry.
    pub const fn max_integer(self) -> u32 {
        match self {
            ScaledWidth::Byte => u8::MAX as u32,
            ScaledWidth::Short => u16::MAX as u32,
            ScaledWidth::Int => u32::MAX,
        }
    }
}

fn check_domain(min: f64, max: f64) -> Result<(), CodecError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(CodecError::InvalidValue(format!(
            "scaled domain [{min}, {max}] is not finite"
        )));
    }
    if max <= min {
        return Err(CodecError::InvalidValue(format!(
            "scaled domain [{min}, {max}] is empty"
        )));
    }
    Ok(())
}

/// Quantization step for a domain and width.
pub fn step(min: f64, max: f64, width: ScaledWidth) -> f64 {
    (max - min) / width.max_integer() as f64
}

/// Map `value` onto the integer range of `width`.
///
/// Values outside the domain are clamped to its bounds. A NaN value or an
/// empty or non-finite domain is rejected.
pub fn quantize(value: f64, min: f64, max: f64, width: ScaledWidth) -> Result<u32, CodecError> {
    check_domain(min, max)?;
    if value.is_nan() {
        return Err(CodecError::InvalidValue("scaled value is NaN".to_string()));
    }
    if value < min || value > max {
        tracing::trace!(value, min, max, "scaled value outside domain, clamping");
    }

    let scale = width.max_integer() as f64;
    let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let quantized = (normalized * scale).round().clamp(0.0, scale);
    Ok(quantized as u32)
}

/// Inverse of [`quantize`].
pub fn dequantize(raw: u32, min: f64, max: f64, width: ScaledWidth) -> Result<f64, CodecError> {
    check_domain(min, max)?;
    let scale = width.max_integer() as f64;
    let raw = (raw as f64).min(scale);
    Ok(min + raw / scale * (max - min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn endpoints_map_to_integer_bounds() {
        assert_eq!(quantize(-180.0, -180.0, 180.0, ScaledWidth::Short).unwrap(), 0);
        assert_eq!(
            quantize(180.0, -180.0, 180.0, ScaledWidth::Short).unwrap(),
            u16::MAX as u32
        );
        assert_eq!(
            quantize(1.0, 0.0, 1.0, ScaledWidth::Int).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn out_of_domain_values_clamp() {
        assert_eq!(quantize(-500.0, -180.0, 180.0, ScaledWidth::Byte).unwrap(), 0);
        assert_eq!(quantize(500.0, -180.0, 180.0, ScaledWidth::Byte).unwrap(), 255);
    }

    #[test]
    fn degenerate_domain_is_rejected() {
        assert!(matches!(
            quantize(1.0, 5.0, 5.0, ScaledWidth::Short),
            Err(CodecError::InvalidValue(_))
        ));
        assert!(matches!(
            dequantize(1, 5.0, 5.0, ScaledWidth::Short),
            Err(CodecError::InvalidValue(_))
        ));
        assert!(quantize(1.0, 10.0, 0.0, ScaledWidth::Byte).is_err());
        assert!(quantize(1.0, f64::NEG_INFINITY, 0.0, ScaledWidth::Byte).is_err());
    }

    #[test]
    fn nan_is_rejected() {
        assert!(quantize(f64::NAN, 0.0, 1.0, ScaledWidth::Int).is_err());
    }

    #[test]
    fn heading_step_matches_width() {
        let s = step(-180.0, 180.0, ScaledWidth::Short);
        assert!((s - 360.0 / 65535.0).abs() < 1e-12);
    }

    fn widths() -> impl Strategy<Value = ScaledWidth> {
        prop_oneof![
            Just(ScaledWidth::Byte),
            Just(ScaledWidth::Short),
            Just(ScaledWidth::Int),
        ]
    }

    proptest! {
        #[test]
        fn round_trip_within_one_step(
            min in -1.0e6f64..1.0e6,
            span in 1.0e-3f64..1.0e6,
            fraction in 0.0f64..=1.0,
            width in widths(),
        ) {
            let max = min + span;
            let value = min + fraction * span;
            let raw = quantize(value, min, max, width).unwrap();
            prop_assert!(raw <= width.max_integer());
            let decoded = dequantize(raw, min, max, width).unwrap();
            prop_assert!((decoded - value).abs() <= step(min, max, width));
        }

        #[test]
        fn heading_round_trip(value in -180.0f64..=180.0) {
            let raw = quantize(value, -180.0, 180.0, ScaledWidth::Short).unwrap();
            let decoded = dequantize(raw, -180.0, 180.0, ScaledWidth::Short).unwrap();
            prop_assert!((decoded - value).abs() < 360.0 / 65535.0);
        }
    }
}
