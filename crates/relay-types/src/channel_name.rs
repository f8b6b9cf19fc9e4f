//! # Channel Names
//!
//! Connection names carry metadata about who opened a channel and why.
//!
//! ```text
//! <label>       <uuid>                               <origin>            [<typeName>]
//! ContentScript 6f1c...-...-...-...-............     https://example.com penumbra.view.v1.ViewService
//! ```
//!
//! Any script with access to the host runtime may open a channel with any
//! name, so names are untrusted. Parse them with [`ChannelName::parse`] and
//! still validate the sender before acting on the result.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::ChannelNameError;

/// Purpose of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLabel {
    /// Session opened from a content script on behalf of a page.
    ContentScript,
    /// Session opened from an internal extension page or worker.
    Extension,
}

impl ChannelLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelLabel::ContentScript => "ContentScript",
            ChannelLabel::Extension => "Extension",
        }
    }
}

impl FromStr for ChannelLabel {
    type Err = ChannelNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ContentScript" => Ok(ChannelLabel::ContentScript),
            "Extension" => Ok(ChannelLabel::Extension),
            other => Err(ChannelNameError::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName {
    pub label: ChannelLabel,
    pub id: Uuid,
    pub origin: String,
    pub type_name: Option<String>,
}

impl ChannelName {
    /// Build a name with a fresh id.
    pub fn new(
        label: ChannelLabel,
        origin: &str,
        type_name: Option<&str>,
    ) -> Result<Self, ChannelNameError> {
        validate_origin(origin)?;
        if let Some(type_name) = type_name {
            validate_type_name(type_name)?;
        }
        Ok(Self {
            label,
            id: Uuid::new_v4(),
            origin: origin.to_string(),
            type_name: type_name.map(str::to_string),
        })
    }

    /// Parse an untrusted name.
    pub fn parse(name: &str) -> Result<Self, ChannelNameError> {
        let fields: Vec<&str> = name.split(' ').collect();
        if !(3..=4).contains(&fields.len()) {
            return Err(ChannelNameError::WrongFieldCount {
                found: fields.len(),
            });
        }

        let label = fields[0].parse::<ChannelLabel>()?;
        let id = Uuid::parse_str(fields[1])
            .map_err(|_| ChannelNameError::InvalidId(fields[1].to_string()))?;
        validate_origin(fields[2])?;
        let type_name = match fields.get(3) {
            Some(type_name) => {
                validate_type_name(type_name)?;
                Some((*type_name).to_string())
            }
            None => None,
        };

        Ok(Self {
            label,
            id,
            origin: fields[2].to_string(),
            type_name,
        })
    }

    /// Registry key for this channel: the type name, or the label if absent.
    #[must_use]
    pub fn service(&self) -> &str {
        self.type_name.as_deref().unwrap_or(self.label.as_str())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.label, self.id, self.origin)?;
        if let Some(type_name) = &self.type_name {
            write!(f, " {type_name}")?;
        }
        Ok(())
    }
}

impl FromStr for ChannelName {
    type Err = ChannelNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Origins look like `scheme://host[:port]`, no path, no whitespace.
fn validate_origin(origin: &str) -> Result<(), ChannelNameError> {
    let invalid = || ChannelNameError::InvalidOrigin(origin.to_string());
    let (scheme, host) = origin.split_once("://").ok_or_else(invalid)?;

    let scheme_ok = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let host_ok = !host.is_empty()
        && !host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'));

    if scheme_ok && host_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn validate_type_name(type_name: &str) -> Result<(), ChannelNameError> {
    let ok = !type_name.is_empty()
        && type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_'));
    if ok {
        Ok(())
    } else {
        Err(ChannelNameError::InvalidTypeName(type_name.to_string()))
    }
}
