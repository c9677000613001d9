//! URL parser for thumbnail request paths.
//!
//! Grammar (slash-separated segments after the `/thumbs/` prefix):
//!
//! ```text
//! /thumbs/[{sig}/]{size}/[filters:{flist}/]{path...}[/as/{alias.ext}]
//! ```
//!
//! - `{size}` matches `^(\d*)x(\d*)$`; both sides empty preserves the
//!   original dimensions.
//! - `{sig}` is 8-64 hex characters. The second segment is taken as a
//!   signature exactly when it does not have the size form, which lets
//!   signed and unsigned URLs coexist (hex never contains an `x`).
//! - `{flist}` is a `;`-separated list of `name(arg,arg,…)` filter tokens.
//! - A trailing `/as/{alias.ext}` pair renames the output and contributes
//!   its extension to format selection.
//!
//! Examples:
//!
//! ```text
//! /thumbs/200x350/one/two/image.jpg
//! /thumbs/a1b2c3d4e5f6a7b8/200x350/filters:format(webp);quality(88)/image.jpeg
//! /thumbs/100x100/filters:pcrop(0,0,50,50)/image.png/as/card.webp
//! ```

use crate::error::ParseError;
use crate::ops::{FillColor, FitMode, Operation, OutputFormat, DEFAULT_QUALITY};
use crate::plan::{Alias, RequestPlan};

/// Upper bounds applied while validating the resize segment.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_width: u32,
    pub max_height: u32,
    /// Maximum pixel area (`width * height`) when both dimensions are set.
    pub max_resolution: u64,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_width: 10_000,
            max_height: 10_000,
            max_resolution: 100_000_000,
        }
    }
}

/// Parses request paths into [`RequestPlan`]s.
#[derive(Debug, Clone, Default)]
pub struct UrlParser {
    limits: ParserLimits,
}

impl UrlParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    /// Parse a request path. The query string and fragment, if present, are
    /// stripped before the canonical signature payload is constructed.
    pub fn parse(&self, path: &str) -> Result<RequestPlan, ParseError> {
        let path = strip_query(path);
        let raw = path
            .strip_prefix("/thumbs/")
            .or_else(|| path.strip_prefix("thumbs/"))
            .ok_or(ParseError::InvalidPrefix)?;

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() < 2 {
            return Err(ParseError::TooFewSegments);
        }

        // Signature disambiguation: the first segment after the prefix is a
        // signature exactly when it is not of the size form.
        let (provided_signature, size_index) = if is_size_form(segments[0]) {
            (String::new(), 0)
        } else {
            if !is_valid_signature(segments[0]) {
                return Err(ParseError::InvalidSignatureFormat);
            }
            if segments.len() < 3 {
                return Err(ParseError::TooFewSegments);
            }
            (segments[0].to_string(), 1)
        };

        // Canonical payload: the raw path with the signature segment
        // stripped and a leading slash restored.
        let signature_payload = if size_index == 1 {
            let stripped = &raw[segments[0].len() + 1..];
            format!("/{stripped}")
        } else {
            format!("/{raw}")
        };

        let size_segment = segments[size_index];
        let (width, height) = self.parse_size(size_segment)?;

        // Optional filters segment.
        let mut path_index = size_index + 1;
        let filter_string = match segments.get(path_index) {
            Some(seg) if seg.starts_with("filters:") => {
                let flist = &seg["filters:".len()..];
                path_index += 1;
                flist.to_string()
            }
            _ => String::new(),
        };

        // Remaining segments form the source path, optionally ending with
        // the `/as/{alias.ext}` pair.
        let rest = &segments[path_index..];
        let (path_segments, alias_raw) = match rest.len() {
            n if n >= 3 && rest[n - 2] == "as" => (&rest[..n - 2], Some(rest[n - 1])),
            _ => (rest, None),
        };
        let source_key = path_segments.join("/");
        if source_key.is_empty() {
            return Err(ParseError::MissingPath);
        }

        let alias = alias_raw.map(parse_alias).transpose()?;

        let (operations, filter_string) = self.build_operations(
            &filter_string,
            &source_key,
            alias.as_ref(),
            width,
            height,
        )?;

        Ok(RequestPlan {
            source_key,
            alias,
            provided_signature,
            signature_payload,
            size_segment: size_segment.to_string(),
            filter_string,
            operations,
        })
    }

    /// Parse `{width}x{height}` where either side may be empty. A `0`
    /// dimension is treated the same as an empty one: preserve the original.
    fn parse_size(&self, segment: &str) -> Result<(Option<u32>, Option<u32>), ParseError> {
        if !is_size_form(segment) {
            return Err(ParseError::InvalidSize(segment.to_string()));
        }
        let (w_str, h_str) = segment.split_once('x').expect("size form contains an x");

        let width = parse_dimension(w_str, segment)?;
        let height = parse_dimension(h_str, segment)?;

        if let Some(w) = width {
            if w > self.limits.max_width {
                return Err(ParseError::DimensionTooLarge {
                    dimension: "width",
                    value: w,
                    max: self.limits.max_width,
                });
            }
        }
        if let Some(h) = height {
            if h > self.limits.max_height {
                return Err(ParseError::DimensionTooLarge {
                    dimension: "height",
                    value: h,
                    max: self.limits.max_height,
                });
            }
        }
        if let (Some(w), Some(h)) = (width, height) {
            let area = w as u64 * h as u64;
            if area > self.limits.max_resolution {
                return Err(ParseError::ResolutionTooLarge {
                    width: w,
                    height: h,
                    area,
                    max: self.limits.max_resolution,
                });
            }
        }

        Ok((width, height))
    }

    /// Parse the filter list and assemble the final operation sequence with
    /// its invariants: at most one op of each kind, crop xor pcrop, format
    /// and quality always present, resize always last.
    fn build_operations(
        &self,
        filter_string: &str,
        source_key: &str,
        alias: Option<&Alias>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(Vec<Operation>, String), ParseError> {
        let mut declared: Vec<Operation> = Vec::new();
        let mut format: Option<OutputFormat> = None;
        let mut quality: Option<u8> = None;
        let mut fit: Option<(FitMode, FillColor)> = None;
        let mut has_crop = false;
        let mut has_pcrop = false;

        for token in filter_string.split(';') {
            if token.trim().is_empty() {
                continue;
            }
            let op = Operation::parse_filter(token)?;
            match &op {
                Operation::Format(f) => {
                    if format.replace(*f).is_some() {
                        return Err(ParseError::DuplicateFilter("format"));
                    }
                }
                Operation::Quality(q) => {
                    if quality.replace(*q).is_some() {
                        return Err(ParseError::DuplicateFilter("quality"));
                    }
                }
                Operation::Fit { mode, fill } => {
                    if fit.replace((*mode, *fill)).is_some() {
                        return Err(ParseError::DuplicateFilter("fit"));
                    }
                }
                Operation::Crop { .. } => {
                    if has_crop {
                        return Err(ParseError::DuplicateFilter("crop"));
                    }
                    has_crop = true;
                }
                Operation::PercentCrop { .. } => {
                    if has_pcrop {
                        return Err(ParseError::DuplicateFilter("pcrop"));
                    }
                    has_pcrop = true;
                }
                Operation::Resize { .. } => unreachable!("resize is not a filter"),
            }
            declared.push(op);
        }

        if has_crop && has_pcrop {
            return Err(ParseError::ConflictingCrops);
        }

        // Format resolution: filter > alias extension > source extension >
        // jpeg. An alias extension conflicting with an explicit filter is an
        // error rather than a silent override.
        if let (Some(f), Some(a)) = (format, alias) {
            if f != a.extension {
                return Err(ParseError::AliasFormatMismatch {
                    alias: a.extension.as_str(),
                    format: f.as_str(),
                });
            }
        }
        let resolved_format = format
            .or(alias.map(|a| a.extension))
            .or_else(|| OutputFormat::from_path(source_key))
            .unwrap_or(OutputFormat::Jpeg);

        let (fit_mode, fill_color) = fit.unwrap_or_default();
        if fit_mode == FitMode::Fill && (width.is_none() || height.is_none()) {
            return Err(ParseError::FillRequiresBothDimensions);
        }
        if fit_mode == FitMode::Fill
            && fill_color == FillColor::Transparent
            && !resolved_format.supports_alpha()
        {
            return Err(ParseError::TransparentRequiresAlpha(resolved_format.as_str()));
        }

        let mut operations = declared;
        if format.is_none() {
            operations.push(Operation::Format(resolved_format));
        }
        if quality.is_none() {
            operations.push(Operation::Quality(DEFAULT_QUALITY));
        }
        operations.push(Operation::Resize {
            width,
            height,
            fit: fit_mode,
            fill: fill_color,
        });

        Ok((operations, filter_string.to_string()))
    }
}

fn strip_query(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    path.split('#').next().unwrap_or(path)
}

/// `^(\d*)x(\d*)$` without pulling in a regex engine: exactly one `x` with
/// only digits on both sides.
fn is_size_form(segment: &str) -> bool {
    match segment.split_once('x') {
        Some((w, h)) => {
            w.chars().all(|c| c.is_ascii_digit()) && h.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn parse_dimension(s: &str, segment: &str) -> Result<Option<u32>, ParseError> {
    if s.is_empty() {
        return Ok(None);
    }
    let value: u32 = s
        .parse()
        .map_err(|_| ParseError::InvalidSize(segment.to_string()))?;
    // A zero dimension carries the same meaning as an absent one.
    Ok(if value == 0 { None } else { Some(value) })
}

fn is_valid_signature(sig: &str) -> bool {
    (8..=64).contains(&sig.len()) && sig.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_alias(raw: &str) -> Result<Alias, ParseError> {
    let (name, ext) = raw
        .rsplit_once('.')
        .ok_or_else(|| ParseError::UnsupportedAliasExtension(raw.to_string()))?;
    if name.is_empty() {
        return Err(ParseError::UnsupportedAliasExtension(raw.to_string()));
    }
    let extension = OutputFormat::parse(&ext.to_ascii_lowercase())
        .ok_or_else(|| ParseError::UnsupportedAliasExtension(ext.to_string()))?;
    Ok(Alias {
        name: name.to_string(),
        extension,
    })
}
