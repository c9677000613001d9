//! Typed image operations.
//!
//! Operations form a closed set, so they are modeled as one tagged enum
//! rather than trait objects: the executor special-cases `Resize`, `Format`
//! and `Quality` for apply ordering, and a closed enum keeps that dispatch
//! exhaustive.
//!
//! Each filter token has the shape `name(arg,arg,...)`. `resize` is never a
//! filter; it is parsed from the mandatory `{width}x{height}` URL segment.

use crate::error::ParseError;

/// Default JPEG/WebP/AVIF quality when no `quality(N)` filter is present.
pub const DEFAULT_QUALITY: u8 = 75;

/// Output encoding chosen by filter, alias extension, source extension, or
/// the `jpeg` default, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl OutputFormat {
    /// Parse a format name. `jpg` is accepted as an alias for `jpeg`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Detect a format from a file path extension. Unknown extensions are
    /// ignored so the caller can fall through to the default.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1;
        Self::parse(&ext.to_ascii_lowercase())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    /// Whether the encoded output can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMode {
    /// Scale preserving aspect ratio, then center-crop to the exact target.
    #[default]
    Cover,
    /// Scale down to fit within the target, then pad to the exact target.
    Fill,
}

impl FitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Fill => "fill",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillColor {
    #[default]
    White,
    Black,
    Transparent,
}

impl FillColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
            Self::Transparent => "transparent",
        }
    }
}

/// One step of the transformation pipeline.
///
/// Invariants enforced by the parser: at most one operation of each kind,
/// `Crop` and `PercentCrop` are mutually exclusive, and `Format`, `Quality`
/// and `Resize` are always present in a parsed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Resize {
        width: Option<u32>,
        height: Option<u32>,
        fit: FitMode,
        fill: FillColor,
    },
    Format(OutputFormat),
    Quality(u8),
    Fit {
        mode: FitMode,
        fill: FillColor,
    },
    Crop {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
    },
    PercentCrop {
        x1: u8,
        y1: u8,
        x2: u8,
        y2: u8,
    },
}

impl Operation {
    /// Stable kind name, used for duplicate detection and URL rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resize { .. } => "resize",
            Self::Format(_) => "format",
            Self::Quality(_) => "quality",
            Self::Fit { .. } => "fit",
            Self::Crop { .. } => "crop",
            Self::PercentCrop { .. } => "pcrop",
        }
    }

    /// Parse a single filter token like `format(webp)` or `crop(0,0,10,10)`.
    ///
    /// Returns `UnknownFilter` for names outside the closed set so the
    /// caller can reject the whole URL.
    pub fn parse_filter(token: &str) -> Result<Self, ParseError> {
        let token = token.trim();
        let (name, args) = split_filter(token)
            .ok_or_else(|| ParseError::UnknownFilter(token.to_string()))?;

        match name {
            "format" => parse_format(args),
            "quality" => parse_quality(args),
            "fit" => parse_fit(args),
            "crop" => parse_crop(args),
            "pcrop" => parse_pcrop(args),
            _ => Err(ParseError::UnknownFilter(token.to_string())),
        }
    }

    /// Render the filter back to its URL token form. `Resize` has no token.
    pub fn to_token(&self) -> Option<String> {
        match self {
            Self::Resize { .. } => None,
            Self::Format(f) => Some(format!("format({})", f.as_str())),
            Self::Quality(q) => Some(format!("quality({q})")),
            Self::Fit { mode, fill } => match mode {
                FitMode::Fill => Some(format!("fit(fill,{})", fill.as_str())),
                FitMode::Cover => Some("fit(cover)".to_string()),
            },
            Self::Crop { x1, y1, x2, y2 } => Some(format!("crop({x1},{y1},{x2},{y2})")),
            Self::PercentCrop { x1, y1, x2, y2 } => Some(format!("pcrop({x1},{y1},{x2},{y2})")),
        }
    }
}

/// Split `name(args)` into its parts. Returns `None` when the token does not
/// have the filter shape at all.
fn split_filter(token: &str) -> Option<(&str, &str)> {
    let open = token.find('(')?;
    if !token.ends_with(')') {
        return None;
    }
    let name = &token[..open];
    let args = &token[open + 1..token.len() - 1];
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}

fn parse_format(args: &str) -> Result<Operation, ParseError> {
    let value = args.trim();
    if value.is_empty() {
        return Err(ParseError::InvalidFilter {
            filter: "format",
            reason: "requires a format type".to_string(),
        });
    }
    let format =
        OutputFormat::parse(&value.to_ascii_lowercase()).ok_or(ParseError::InvalidFilter {
            filter: "format",
            reason: format!("unsupported format: {value} (supported: jpeg, png, webp, avif)"),
        })?;
    Ok(Operation::Format(format))
}

fn parse_quality(args: &str) -> Result<Operation, ParseError> {
    let value = args.trim();
    let quality: u32 = value.parse().map_err(|_| ParseError::InvalidFilter {
        filter: "quality",
        reason: format!("must be a number, got: {value}"),
    })?;
    if !(1..=100).contains(&quality) {
        return Err(ParseError::InvalidFilter {
            filter: "quality",
            reason: format!("must be between 1 and 100, got: {quality}"),
        });
    }
    Ok(Operation::Quality(quality as u8))
}

fn parse_fit(args: &str) -> Result<Operation, ParseError> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(ParseError::InvalidFilter {
            filter: "fit",
            reason: format!("expects 1 or 2 parameters, got: {args}"),
        });
    }

    let mode = match parts[0].to_ascii_lowercase().as_str() {
        "cover" => FitMode::Cover,
        "fill" => FitMode::Fill,
        other => {
            return Err(ParseError::InvalidFilter {
                filter: "fit",
                reason: format!("mode must be 'fill' or 'cover', got: {other}"),
            })
        }
    };

    let mut fill = FillColor::White;
    if parts.len() == 2 {
        if mode != FitMode::Fill {
            return Err(ParseError::InvalidFilter {
                filter: "fit",
                reason: format!("color parameter is only valid for fit(fill), not fit({})", mode.as_str()),
            });
        }
        fill = match parts[1].to_ascii_lowercase().as_str() {
            "black" => FillColor::Black,
            "white" => FillColor::White,
            "transparent" => FillColor::Transparent,
            other => {
                return Err(ParseError::InvalidFilter {
                    filter: "fit",
                    reason: format!(
                        "fill color must be 'black', 'white', or 'transparent', got: {other}"
                    ),
                })
            }
        };
    }

    Ok(Operation::Fit { mode, fill })
}

fn parse_coords(filter: &'static str, args: &str) -> Result<[i64; 4], ParseError> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(ParseError::InvalidFilter {
            filter,
            reason: format!("expects 4 coordinates (x1,y1,x2,y2), got: {args}"),
        });
    }
    let mut coords = [0i64; 4];
    for (i, part) in parts.iter().enumerate() {
        coords[i] = part.parse().map_err(|_| ParseError::InvalidFilter {
            filter,
            reason: format!("coordinate {} must be a number, got: {part}", i + 1),
        })?;
    }
    Ok(coords)
}

fn parse_crop(args: &str) -> Result<Operation, ParseError> {
    let [x1, y1, x2, y2] = parse_coords("crop", args)?;

    if x1 < 0 || y1 < 0 || x2 < 0 || y2 < 0 {
        return Err(ParseError::InvalidFilter {
            filter: "crop",
            reason: format!("negative values not allowed (got crop({x1},{y1},{x2},{y2}))"),
        });
    }
    if x2 <= x1 {
        return Err(ParseError::InvalidFilter {
            filter: "crop",
            reason: format!("x2 must be greater than x1 (got crop({x1},{y1},{x2},{y2}))"),
        });
    }
    if y2 <= y1 {
        return Err(ParseError::InvalidFilter {
            filter: "crop",
            reason: format!("y2 must be greater than y1 (got crop({x1},{y1},{x2},{y2}))"),
        });
    }

    Ok(Operation::Crop {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    })
}

fn parse_pcrop(args: &str) -> Result<Operation, ParseError> {
    let [x1, y1, x2, y2] = parse_coords("pcrop", args)?;

    if x1 < 0 || y1 < 0 || x2 < 0 || y2 < 0 {
        return Err(ParseError::InvalidFilter {
            filter: "pcrop",
            reason: format!("percentages must be >= 0 (got pcrop({x1},{y1},{x2},{y2}))"),
        });
    }
    if x1 > 100 || y1 > 100 || x2 > 100 || y2 > 100 {
        return Err(ParseError::InvalidFilter {
            filter: "pcrop",
            reason: format!("percentages must be <= 100 (got pcrop({x1},{y1},{x2},{y2}))"),
        });
    }
    if x2 <= x1 {
        return Err(ParseError::InvalidFilter {
            filter: "pcrop",
            reason: format!("x2 must be greater than x1 (got pcrop({x1},{y1},{x2},{y2}))"),
        });
    }
    if y2 <= y1 {
        return Err(ParseError::InvalidFilter {
            filter: "pcrop",
            reason: format!("y2 must be greater than y1 (got pcrop({x1},{y1},{x2},{y2}))"),
        });
    }

    Ok(Operation::PercentCrop {
        x1: x1 as u8,
        y1: y1 as u8,
        x2: x2 as u8,
        y2: y2 as u8,
    })
}
