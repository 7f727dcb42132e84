//! The five depth controls, their slider mapping and UI-facing state.

use crate::compress::{CompressionParams, SPAN_MAX, SPAN_MIN};
use crate::config::ControlDefaults;
use serde::{Deserialize, Serialize};

/// Fraction of slider travel spent on the `[min, mid]` half.
pub const SLIDER_SPLIT: f32 = 2.0 / 3.0;

/// Piecewise-quadratic map between a linear slider and a wide value range.
///
/// The first two thirds of the slider cover `[value_min, value_mid]`, the
/// rest `[value_mid, value_max]`; both halves ease in quadratically so most
/// resolution sits at the low end of each half.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlValueCodec {
    pub slider_min: f32,
    pub slider_max: f32,
    pub value_min: f32,
    pub value_mid: f32,
    pub value_max: f32,
}

impl ControlValueCodec {
    /// Slider 1–100 over values 1–10000, with 1000 at two thirds.
    pub const WIDE: Self = Self::new(1.0, 100.0, 1.0, 1000.0, 10_000.0);

    pub const fn new(
        slider_min: f32,
        slider_max: f32,
        value_min: f32,
        value_mid: f32,
        value_max: f32,
    ) -> Self {
        Self {
            slider_min,
            slider_max,
            value_min,
            value_mid,
            value_max,
        }
    }

    pub fn slider_to_value(&self, slider: f32) -> f32 {
        let t = inverse_lerp(self.slider_min, self.slider_max, slider);

        if t <= SLIDER_SPLIT {
            let u = t / SLIDER_SPLIT.max(f32::EPSILON);
            lerp(self.value_min, self.value_mid, u * u)
        } else {
            let u = (t - SLIDER_SPLIT) / (1.0 - SLIDER_SPLIT).max(f32::EPSILON);
            lerp(self.value_mid, self.value_max, u * u)
        }
    }

    pub fn value_to_slider(&self, value: f32) -> f32 {
        let v = value.clamp(self.value_min, self.value_max);

        let t = if v <= self.value_mid {
            inverse_lerp(self.value_min, self.value_mid, v).sqrt() * SLIDER_SPLIT
        } else {
            SLIDER_SPLIT + inverse_lerp(self.value_mid, self.value_max, v).sqrt() * (1.0 - SLIDER_SPLIT)
        };

        lerp(self.slider_min, self.slider_max, t)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Position of `v` between `a` and `b`, clamped to `[0, 1]`.
#[inline]
fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if a == b {
        return 0.0;
    }
    ((v - a) / (b - a)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Magnification,
    CropDistance,
    CompressNear,
    CompressFar,
    CompressSpan,
}

impl Control {
    pub const ALL: [Control; 5] = [
        Self::Magnification,
        Self::CropDistance,
        Self::CompressNear,
        Self::CompressFar,
        Self::CompressSpan,
    ];

    /// Accepted value range.
    pub const fn value_range(self) -> (f32, f32) {
        match self {
            Self::Magnification => (1.0, 50.0),
            Self::CropDistance => (1.0, 10_000.0),
            Self::CompressNear => (0.0, 10.0),
            Self::CompressFar => (1.0, 10_000.0),
            Self::CompressSpan => (SPAN_MIN, SPAN_MAX),
        }
    }

    /// Controls whose slider is not linear in the value.
    pub const fn codec(self) -> Option<ControlValueCodec> {
        match self {
            Self::CropDistance | Self::CompressFar => Some(ControlValueCodec::WIDE),
            _ => None,
        }
    }

    pub fn slider_to_value(self, slider: f32) -> f32 {
        match self.codec() {
            Some(c) => c.slider_to_value(slider),
            None => {
                let (lo, hi) = self.value_range();
                slider.clamp(lo, hi)
            }
        }
    }

    pub fn value_to_slider(self, value: f32) -> f32 {
        match self.codec() {
            Some(c) => c.value_to_slider(value),
            None => {
                let (lo, hi) = self.value_range();
                value.clamp(lo, hi)
            }
        }
    }

    /// Label text: one decimal for the fine controls, whole numbers for
    /// the wide ones. Whole numbers round half away from zero.
    pub fn label(self, value: f32) -> String {
        match self {
            Self::CropDistance | Self::CompressFar => format!("{:.0}", value.round()),
            _ => format!("{:.1}", value),
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Magnification => "magnification",
            Self::CropDistance => "crop_distance",
            Self::CompressNear => "compress_near",
            Self::CompressFar => "compress_far",
            Self::CompressSpan => "compress_span",
        };

        f.write_str(s)
    }
}

/// How a host reports a control change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlInput {
    /// Value in the control's own units.
    Direct(f32),
    /// Slider position, decoded through the control's codec.
    Slider(f32),
}

/// A value the validator moved; the host should move its slider to
/// `slider` without treating that as a user edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correction {
    pub control: Control,
    pub value: f32,
    pub slider: f32,
}

impl Correction {
    pub fn new(control: Control, value: f32) -> Self {
        Self {
            control,
            value,
            slider: control.value_to_slider(value),
        }
    }
}

/// Current state of one control, for labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedControl {
    pub control: Control,
    pub value: f32,
    pub slider: f32,
    pub label: String,
}

/// Owns the current, always-valid control values.
#[derive(Debug, Clone)]
pub struct ControlPanel {
    params: CompressionParams,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new(&ControlDefaults::default())
    }
}

impl ControlPanel {
    pub fn new(defaults: &ControlDefaults) -> Self {
        let (params, corrections) = CompressionParams::from_defaults(defaults);
        if !corrections.is_empty() {
            log::debug!("{} startup control value(s) adjusted", corrections.len());
        }

        Self { params }
    }

    /// Applies one change and revalidates all five values.
    pub fn set(&mut self, control: Control, input: ControlInput) -> Vec<Correction> {
        let requested = match input {
            ControlInput::Direct(v) => v,
            ControlInput::Slider(s) => control.slider_to_value(s),
        };

        let mut values = self.params.values();
        values[control as usize] = requested;

        let (params, corrections) = CompressionParams::from_values(values);
        self.params = params;
        corrections
    }

    pub fn params(&self) -> CompressionParams {
        self.params
    }

    pub fn value(&self, control: Control) -> f32 {
        self.params.get(control)
    }

    pub fn resolved(&self) -> Vec<ResolvedControl> {
        Control::ALL
            .into_iter()
            .map(|control| {
                let value = self.params.get(control);
                ResolvedControl {
                    control,
                    value,
                    slider: control.value_to_slider(value),
                    label: control.label(value),
                }
            })
            .collect()
    }
}
