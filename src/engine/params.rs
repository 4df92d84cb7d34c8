//! Processing parameters and their validation.
//!
//! Parsing is case-insensitive. Anything outside the accepted set is rejected
//! before a job is queued.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameter validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("backgroundColor must be 'transparent', 'white', or 'black' (got '{0}')")]
    Background(String),

    #[error("fileType must be 'PNG' or 'JPEG' (got '{0}')")]
    Format(String),

    #[error("watermark must be 'none' or 'blog' (got '{0}')")]
    Watermark(String),
}

/// Background painted behind the cut-out subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundColor {
    /// Checkerboard preview over the alpha channel
    Transparent,
    #[default]
    White,
    Black,
}

impl FromStr for BackgroundColor {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transparent" => Ok(Self::Transparent),
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            _ => Err(ParamsError::Background(s.to_string())),
        }
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transparent => write!(f, "transparent"),
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    Png,
    #[default]
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(Self::Png),
            "JPEG" => Ok(Self::Jpeg),
            _ => Err(ParamsError::Format(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "PNG"),
            Self::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Watermark stamped onto the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Watermark {
    #[default]
    None,
    Blog,
}

impl FromStr for Watermark {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "blog" => Ok(Self::Blog),
            _ => Err(ParamsError::Watermark(s.to_string())),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Blog => write!(f, "blog"),
        }
    }
}

/// Parameters handed to the engine with every image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub background: BackgroundColor,
    pub format: OutputFormat,
    pub watermark: Watermark,
}

impl ProcessingParams {
    /// Parse raw request fields. Missing or empty fields take their defaults.
    pub fn parse(
        background: Option<&str>,
        format: Option<&str>,
        watermark: Option<&str>,
    ) -> Result<Self, ParamsError> {
        Self::default().merge(background, format, watermark)
    }

    /// Apply raw overrides on top of `self`. All-or-nothing.
    pub fn merge(
        self,
        background: Option<&str>,
        format: Option<&str>,
        watermark: Option<&str>,
    ) -> Result<Self, ParamsError> {
        let background = match background.filter(|s| !s.is_empty()) {
            Some(s) => s.parse()?,
            None => self.background,
        };
        let format = match format.filter(|s| !s.is_empty()) {
            Some(s) => s.parse()?,
            None => self.format,
        };
        let watermark = match watermark.filter(|s| !s.is_empty()) {
            Some(s) => s.parse()?,
            None => self.watermark,
        };
        Ok(Self { background, format, watermark })
    }

    /// `photo.jpeg` -> `photo-no-bg.png` for PNG output.
    pub fn output_filename(&self, input: &str) -> String {
        let stem = match input.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => input,
        };
        format!("{}-no-bg.{}", stem, self.format.extension())
    }
}
