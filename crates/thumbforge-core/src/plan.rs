//! The parsed request plan.

use crate::ops::{FillColor, FitMode, Operation, OutputFormat, DEFAULT_QUALITY};

/// Output alias from a trailing `/as/{name.ext}` pair. The alias renames the
/// download and its extension participates in format selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub extension: OutputFormat,
}

/// A validated, ordered transformation plan produced by the URL parser.
///
/// `operations` always contains exactly one `Format`, one `Quality` and one
/// `Resize` (the resize is last); `Crop`/`PercentCrop`/`Fit` appear at most
/// once, in URL-declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    /// Path of the source object in the backing store.
    pub source_key: String,
    /// Optional `/as/{name.ext}` suffix.
    pub alias: Option<Alias>,
    /// Signature token from the URL, empty when the URL is unsigned.
    pub provided_signature: String,
    /// Canonical payload for HMAC verification:
    /// `/{size}/[filters:{flist}/]{path}[/as/{alias.ext}]`.
    pub signature_payload: String,
    /// The size segment exactly as it appeared in the URL (`100x200`, `x`, …).
    pub size_segment: String,
    /// Raw filter list without the `filters:` prefix, empty when absent.
    pub filter_string: String,
    /// Ordered operations, ready for the transform pipeline.
    pub operations: Vec<Operation>,
}

impl RequestPlan {
    /// The output format. Present in every parsed plan.
    pub fn format(&self) -> OutputFormat {
        self.operations
            .iter()
            .find_map(|op| match op {
                Operation::Format(f) => Some(*f),
                _ => None,
            })
            .unwrap_or(OutputFormat::Jpeg)
    }

    /// The encode quality. Present in every parsed plan.
    pub fn quality(&self) -> u8 {
        self.operations
            .iter()
            .find_map(|op| match op {
                Operation::Quality(q) => Some(*q),
                _ => None,
            })
            .unwrap_or(DEFAULT_QUALITY)
    }

    /// The resize parameters: `(width, height, fit, fill)`.
    pub fn resize(&self) -> (Option<u32>, Option<u32>, FitMode, FillColor) {
        self.operations
            .iter()
            .find_map(|op| match op {
                Operation::Resize {
                    width,
                    height,
                    fit,
                    fill,
                } => Some((*width, *height, *fit, *fill)),
                _ => None,
            })
            .unwrap_or((None, None, FitMode::Cover, FillColor::White))
    }

    /// Rebuild a request URL from the plan's canonical fields. Reparsing the
    /// result yields an equivalent plan.
    pub fn canonical_url(&self) -> String {
        let mut url = String::from("/thumbs/");
        if !self.provided_signature.is_empty() {
            url.push_str(&self.provided_signature);
            url.push('/');
        }
        url.push_str(&self.size_segment);
        url.push('/');
        if !self.filter_string.is_empty() {
            url.push_str("filters:");
            url.push_str(&self.filter_string);
            url.push('/');
        }
        url.push_str(&self.source_key);
        if let Some(alias) = &self.alias {
            url.push_str("/as/");
            url.push_str(&alias.name);
            url.push('.');
            url.push_str(alias.extension.as_str());
        }
        url
    }
}
