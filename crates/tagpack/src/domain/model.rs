//! Domain models shared by the markup engine, the bundler and configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the merged replacement for a run of elements is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsertPosition {
    /// Rewrite in place, where the constituent elements stood.
    Local,
    StartOfHead,
    EndOfHead,
    StartOfBody,
    EndOfBody,
    StartOfDocument,
    EndOfDocument,
    StartOfFile,
    EndOfFile,
}

impl InsertPosition {
    /// The document-wide anchor this position names, or `None` for [`InsertPosition::Local`].
    pub fn anchor(&self) -> Option<InsertAnchor> {
        use AnchorElement::*;
        use AnchorEdge::*;

        let (element, edge) = match self {
            InsertPosition::Local => return None,
            InsertPosition::StartOfHead => (Head, Start),
            InsertPosition::EndOfHead => (Head, End),
            InsertPosition::StartOfBody => (Body, Start),
            InsertPosition::EndOfBody => (Body, End),
            InsertPosition::StartOfDocument => (Document, Start),
            InsertPosition::EndOfDocument => (Document, End),
            InsertPosition::StartOfFile => (File, Start),
            InsertPosition::EndOfFile => (File, End),
        };
        Some(InsertAnchor { element, edge })
    }
}

/// A single document-wide insertion anchor such as "end of head".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsertAnchor {
    pub element: AnchorElement,
    pub edge: AnchorEdge,
}

impl InsertAnchor {
    /// The anchor to try when this one is absent from a document.
    pub fn fallback(&self) -> Option<InsertAnchor> {
        let element = match self.element {
            AnchorElement::Head | AnchorElement::Body => AnchorElement::Document,
            AnchorElement::Document => AnchorElement::File,
            AnchorElement::File => return None,
        };
        Some(InsertAnchor {
            element,
            edge: self.edge,
        })
    }
}

impl fmt::Display for InsertAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edge = match self.edge {
            AnchorEdge::Start => "start",
            AnchorEdge::End => "end",
        };
        let element = match self.element {
            AnchorElement::Head => "head",
            AnchorElement::Body => "body",
            AnchorElement::Document => "document",
            AnchorElement::File => "file",
        };
        write!(f, "{edge} of {element}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorElement {
    Head,
    Body,
    Document,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorEdge {
    Start,
    End,
}

/// What happens to an element whose relative reference points at no file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingTagAction {
    /// Leave the tag untouched and exclude it from bundling.
    Keep,
    /// Excise the tag, and its line when that line becomes whitespace-only.
    Remove,
}

/// Output policy for source script/style files once markup has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAction {
    RemoveAll,
    RemoveBundled,
    KeepAll,
    KeepNecessary,
}

/// Language level handed to the transpile collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranspileTarget {
    #[default]
    Off,
    Es5,
    Es2015,
    Es2017,
    Es2020,
    EsNext,
}

impl TranspileTarget {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TranspileTarget::Off)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TranspileTarget::Off => "off",
            TranspileTarget::Es5 => "es5",
            TranspileTarget::Es2015 => "es2015",
            TranspileTarget::Es2017 => "es2017",
            TranspileTarget::Es2020 => "es2020",
            TranspileTarget::EsNext => "esnext",
        }
    }
}

impl FromStr for TranspileTarget {
    type Err = TranspileTargetParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" => Ok(TranspileTarget::Off),
            "es5" => Ok(TranspileTarget::Es5),
            "es2015" | "es6" => Ok(TranspileTarget::Es2015),
            "es2017" => Ok(TranspileTarget::Es2017),
            "es2020" => Ok(TranspileTarget::Es2020),
            "esnext" | "latest" => Ok(TranspileTarget::EsNext),
            other => Err(TranspileTargetParseError::UnknownTarget(other.to_string())),
        }
    }
}

/// Error returned when parsing a [`TranspileTarget`] fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TranspileTargetParseError {
    #[error("unknown transpile target '{0}'")]
    UnknownTarget(String),
}

/// The two element families the bundler merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFamily {
    Script,
    Style,
}

impl AssetFamily {
    /// Extension of generated bundle files, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            AssetFamily::Script => ".js",
            AssetFamily::Style => ".css",
        }
    }
}

impl fmt::Display for AssetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetFamily::Script => f.write_str("script"),
            AssetFamily::Style => f.write_str("style"),
        }
    }
}

/// The option values that influence a bundle's transformed bytes.
///
/// Two bundling requests with different snapshots never share a bundle through the file-list
/// identity, even if they happen to produce identical code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TransformSnapshot {
    pub minify_script: bool,
    pub iife_script: bool,
    pub transpile_script: TranspileTarget,
    pub minify_css: bool,
    pub optimize_css: bool,
    pub autoprefix_css: bool,
    pub sanitize: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_fall_back_to_document_then_file() {
        let head = InsertPosition::EndOfHead.anchor().expect("anchored");
        let document = head.fallback().expect("document fallback");
        assert_eq!(document.element, AnchorElement::Document);
        assert_eq!(document.edge, AnchorEdge::End);

        let file = document.fallback().expect("file fallback");
        assert_eq!(file.element, AnchorElement::File);
        assert!(file.fallback().is_none());
        assert!(InsertPosition::Local.anchor().is_none());
    }

    #[test]
    fn parses_transpile_targets() {
        assert_eq!("ES6".parse::<TranspileTarget>(), Ok(TranspileTarget::Es2015));
        assert_eq!("off".parse::<TranspileTarget>(), Ok(TranspileTarget::Off));
        assert!("es3".parse::<TranspileTarget>().is_err());
    }

    #[test]
    fn insert_positions_use_screaming_names() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Placement {
            position: InsertPosition,
        }
        let parsed: Placement = toml::from_str("position = \"END_OF_BODY\"")?;
        assert_eq!(parsed.position, InsertPosition::EndOfBody);
        Ok(())
    }
}
