//! Filter types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// The closed set of filter kinds a job may request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum FilterKind {
    Grayscale,
    Sepia,
    Invert,
    /// Gaussian blur, value is sigma.
    Blur,
    /// Unsharp mask, value is sigma.
    Sharpen,
    /// Additive brightness delta.
    Brightness,
    /// Contrast adjustment in percent.
    Contrast,
    /// Hue rotation in degrees.
    HueRotate,
    /// Clockwise rotation, 90/180/270 degrees.
    Rotate,
    FlipHorizontal,
    FlipVertical,
}

impl FilterKind {
    /// Whether a step of this kind must carry a numeric value.
    pub fn requires_value(self) -> bool {
        matches!(
            self,
            Self::Blur
                | Self::Sharpen
                | Self::Brightness
                | Self::Contrast
                | Self::HueRotate
                | Self::Rotate
        )
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Check a value against the accepted range for this kind.
    fn check_value(self, value: f64) -> std::result::Result<(), String> {
        if !value.is_finite() {
            return Err(format!("{self}: value must be a finite number"));
        }
        match self {
            Self::Blur | Self::Sharpen => {
                if value <= 0.0 || value > 100.0 {
                    return Err(format!("{self}: sigma must be in (0, 100], got {value}"));
                }
            }
            Self::Brightness => {
                if value.fract() != 0.0 || !(-255.0..=255.0).contains(&value) {
                    return Err(format!(
                        "{self}: value must be an integer in [-255, 255], got {value}"
                    ));
                }
            }
            Self::Contrast => {
                if !(-100.0..=100.0).contains(&value) {
                    return Err(format!("{self}: value must be in [-100, 100], got {value}"));
                }
            }
            Self::HueRotate => {
                if !(-360.0..=360.0).contains(&value) {
                    return Err(format!(
                        "{self}: degrees must be in [-360, 360], got {value}"
                    ));
                }
            }
            Self::Rotate => {
                if ![90.0, 180.0, 270.0].contains(&value) {
                    return Err(format!("{self}: degrees must be 90, 180 or 270, got {value}"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One validated step of a filter chain.
///
/// Only constructible through [`FilterStep::new`], so a step that exists is
/// always executable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterStep {
    kind: FilterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl FilterStep {
    /// Build a step, validating the value against the kind.
    ///
    /// A value supplied to a kind that takes none is dropped.
    pub fn new(kind: FilterKind, value: Option<f64>) -> Result<Self> {
        if !kind.requires_value() {
            return Ok(Self { kind, value: None });
        }
        let value =
            value.ok_or_else(|| Error::validation(format!("{kind}: a numeric value is required")))?;
        kind.check_value(value).map_err(Error::Validation)?;
        Ok(Self {
            kind,
            value: Some(value),
        })
    }

    /// Shorthand for kinds without a value.
    pub fn simple(kind: FilterKind) -> Result<Self> {
        Self::new(kind, None)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Human-readable label, e.g. `blur(2.5)`.
    pub fn label(&self) -> String {
        match self.value {
            Some(v) => format!("{}({})", self.kind, v),
            None => self.kind.to_string(),
        }
    }
}

/// Encoding of the produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Bmp,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Bmp => "bmp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Bmp => "bmp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Bmp => "image/bmp",
        }
    }

    /// Map a file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s.trim())
            .ok_or_else(|| Error::validation(format!("Unsupported output format: {}", s)))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in FilterKind::iter() {
            let parsed: FilterKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(FilterKind::HueRotate.as_str(), "hue-rotate");
        assert_eq!("GRAYSCALE".parse::<FilterKind>().unwrap(), FilterKind::Grayscale);
        assert!("posterize".parse::<FilterKind>().is_err());
    }

    #[test]
    fn test_required_value_missing() {
        let err = FilterStep::new(FilterKind::Blur, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_value_dropped_for_valueless_kind() {
        let step = FilterStep::new(FilterKind::Grayscale, Some(3.0)).unwrap();
        assert_eq!(step.value(), None);
        assert_eq!(step.label(), "grayscale");
    }

    #[test]
    fn test_value_ranges() {
        assert!(FilterStep::new(FilterKind::Blur, Some(2.5)).is_ok());
        assert!(FilterStep::new(FilterKind::Blur, Some(0.0)).is_err());
        assert!(FilterStep::new(FilterKind::Brightness, Some(-40.0)).is_ok());
        assert!(FilterStep::new(FilterKind::Brightness, Some(1.5)).is_err());
        assert!(FilterStep::new(FilterKind::Contrast, Some(101.0)).is_err());
        assert!(FilterStep::new(FilterKind::Rotate, Some(180.0)).is_ok());
        assert!(FilterStep::new(FilterKind::Rotate, Some(45.0)).is_err());
        assert!(FilterStep::new(FilterKind::HueRotate, Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_label() {
        let step = FilterStep::new(FilterKind::Blur, Some(2.5)).unwrap();
        assert_eq!(step.label(), "blur(2.5)");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert!("tiff".parse::<OutputFormat>().is_err());
    }
}
