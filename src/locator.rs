//! Resource Locator
//!
//! Turns opaque, delimiter-rich resource identifiers (for example
//! `arn:aws:bedrock-agentcore:us-west-2:123456789012:runtime/calc-abc`) into
//! a single URL path segment and builds the invocation URL around it.
//!
//! Every reserved delimiter, `%` itself, and anything outside the RFC 3986
//! unreserved set are percent-encoded, so `decode(encode(x)) == x` for every
//! identifier the configured alphabet accepts. Nothing here performs I/O.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use url::Url;

use crate::config::LocatorConfig;
use crate::error::{Result, TollgateError};

/// An immutable, fully qualified resource address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceAddress {
    identifier: String,
    region: String,
    qualifier: String,
}

impl ResourceAddress {
    /// Creates an address with the `DEFAULT` qualifier.
    pub fn new(identifier: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            region: region.into(),
            qualifier: "DEFAULT".to_string(),
        }
    }

    /// Returns a copy of this address with a different qualifier.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Parses an ARN-style identifier, taking the region from its fourth
    /// colon-separated field.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::InvalidAddress`] when the identifier is not
    /// shaped like `arn:<partition>:<service>:<region>:<account>:<resource>`
    /// or carries an empty region.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::locator::ResourceAddress;
    ///
    /// let address = ResourceAddress::from_arn(
    ///     "arn:aws:bedrock-agentcore:us-west-2:123456789012:runtime/calc-abc",
    /// )
    /// .unwrap();
    /// assert_eq!(address.region(), "us-west-2");
    /// assert_eq!(address.qualifier(), "DEFAULT");
    /// ```
    pub fn from_arn(arn: &str) -> Result<Self> {
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(TollgateError::InvalidAddress(format!(
                "'{}' is not an ARN (expected arn:<partition>:<service>:<region>:<account>:<resource>)",
                arn
            ))
            .into());
        }
        if parts[3].is_empty() {
            return Err(TollgateError::InvalidAddress(format!("'{}' has no region", arn)).into());
        }
        Ok(Self::new(arn, parts[3]))
    }

    /// The opaque identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Region or namespace qualifier used in the endpoint host.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint qualifier (version or alias).
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.identifier, self.region, self.qualifier)
    }
}

/// A percent-encoded identifier safe to embed as one URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment(String);

impl PathSegment {
    /// The encoded text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the segment, returning the encoded text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoder/decoder configured with a deployment's identifier alphabet.
#[derive(Debug, Clone)]
pub struct Locator {
    reserved: BTreeSet<char>,
    alphabet: Regex,
    endpoint_template: String,
}

impl Locator {
    /// Builds a locator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] if the identifier pattern does not
    /// compile.
    pub fn new(config: &LocatorConfig) -> Result<Self> {
        let alphabet = Regex::new(&config.identifier_pattern).map_err(|e| {
            TollgateError::Config(format!("invalid identifier pattern: {}", e))
        })?;
        let mut reserved: BTreeSet<char> = config.reserved.chars().collect();
        reserved.insert('%');

        Ok(Self {
            reserved,
            alphabet,
            endpoint_template: config.endpoint_template.clone(),
        })
    }

    /// Whether `c` must appear percent-encoded in a segment.
    fn needs_escape(&self, c: char) -> bool {
        self.reserved.contains(&c) || !is_unreserved(c)
    }

    fn check_alphabet(&self, identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(TollgateError::InvalidAddress("identifier is empty".to_string()).into());
        }
        if !self.alphabet.is_match(identifier) {
            return Err(TollgateError::InvalidAddress(format!(
                "'{}' contains characters outside the allowed alphabet",
                identifier
            ))
            .into());
        }
        Ok(())
    }

    /// Encodes a bare identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::InvalidAddress`] for an empty identifier or
    /// one that does not match the configured alphabet.
    pub fn encode_identifier(&self, identifier: &str) -> Result<PathSegment> {
        self.check_alphabet(identifier)?;

        let mut out = String::with_capacity(identifier.len() + 16);
        let mut buf = [0u8; 4];
        for c in identifier.chars() {
            if self.needs_escape(c) {
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", byte));
                }
            } else {
                out.push(c);
            }
        }
        Ok(PathSegment(out))
    }

    /// Encodes the identifier of `address` into a single path segment.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::config::LocatorConfig;
    /// use tollgate::locator::{Locator, ResourceAddress};
    ///
    /// let locator = Locator::new(&LocatorConfig::default()).unwrap();
    /// let address = ResourceAddress::new("arn:aws:x:us-east-1:1:runtime/calc", "us-east-1");
    /// let segment = locator.encode(&address).unwrap();
    /// assert_eq!(segment.as_str(), "arn%3Aaws%3Ax%3Aus-east-1%3A1%3Aruntime%2Fcalc");
    /// ```
    pub fn encode(&self, address: &ResourceAddress) -> Result<PathSegment> {
        self.encode_identifier(address.identifier())
    }

    /// Decodes a path segment back into the original identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::InvalidAddress`] on a truncated or non-hex
    /// escape, a raw character that [`encode`](Self::encode) would have
    /// escaped, invalid UTF-8, or a result outside the configured alphabet.
    pub fn decode(&self, segment: &str) -> Result<String> {
        let bytes = segment.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    let hex = bytes.get(i + 1..i + 3).ok_or_else(|| {
                        TollgateError::InvalidAddress(format!(
                            "truncated escape at offset {} in '{}'",
                            i, segment
                        ))
                    })?;
                    let value = std::str::from_utf8(hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| {
                            TollgateError::InvalidAddress(format!(
                                "malformed escape at offset {} in '{}'",
                                i, segment
                            ))
                        })?;
                    decoded.push(value);
                    i += 3;
                }
                b if !b.is_ascii() || self.needs_escape(b as char) => {
                    return Err(TollgateError::InvalidAddress(format!(
                        "unescaped character at offset {} in '{}'",
                        i, segment
                    ))
                    .into());
                }
                b => {
                    decoded.push(b);
                    i += 1;
                }
            }
        }

        let identifier = String::from_utf8(decoded).map_err(|_| {
            TollgateError::InvalidAddress(format!("'{}' does not decode to UTF-8", segment))
        })?;
        self.check_alphabet(&identifier)?;
        Ok(identifier)
    }

    /// Builds the invocation URL for `address` from the endpoint template.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::InvalidAddress`] when the identifier, region
    /// or qualifier is unusable, or when the filled-in template is not a URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::config::LocatorConfig;
    /// use tollgate::locator::{Locator, ResourceAddress};
    ///
    /// let locator = Locator::new(&LocatorConfig::default()).unwrap();
    /// let address = ResourceAddress::new("arn:aws:x:us-west-2:1:runtime/calc", "us-west-2");
    /// let url = locator.invocation_url(&address).unwrap();
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://bedrock-agentcore.us-west-2.amazonaws.com/runtimes/arn%3Aaws%3Ax%3Aus-west-2%3A1%3Aruntime%2Fcalc/invocations?qualifier=DEFAULT"
    /// );
    /// ```
    pub fn invocation_url(&self, address: &ResourceAddress) -> Result<Url> {
        let segment = self.encode(address)?;
        check_token("region", address.region())?;
        check_token("qualifier", address.qualifier())?;

        let filled = self
            .endpoint_template
            .replace("{region}", address.region())
            .replace("{qualifier}", address.qualifier())
            .replace("{resource}", segment.as_str());

        Url::parse(&filled).map_err(|e| {
            TollgateError::InvalidAddress(format!("invocation URL '{}' is invalid: {}", filled, e))
                .into()
        })
    }
}

/// RFC 3986 `unreserved`: safe anywhere in a path segment.
fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn check_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(TollgateError::InvalidAddress(format!("invalid {} '{}'", what, value)).into());
    }
    Ok(())
}
