use std::fmt;

/// A container image reference split into its name, tag and digest parts.
///
/// Parsing never fails. Anything that does not look like a tag or a digest stays
/// part of the name, so the name is always usable as a comparison key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Self {
        // digest suffix, e.g. @sha256:abcd
        let (without_digest, digest) = match s.find('@') {
            Some(pos) => (&s[..pos], Some(s[pos + 1..].to_string())),
            None => (s, None),
        };

        // A tag colon must come after the last slash, otherwise it is a registry port
        let last_segment = without_digest.rfind('/').map_or(0, |slash| slash + 1);
        let (name, tag) = match without_digest[last_segment..].find(':') {
            Some(offset) => {
                let pos = last_segment + offset;
                (&without_digest[..pos], Some(without_digest[pos + 1..].to_string()))
            }
            None => (without_digest, None),
        };

        Self {
            name: name.to_string(),
            tag,
            digest,
        }
    }

    /// The reference without tag and digest, used to join policies and containers.
    pub fn base_identity(&self) -> &str {
        &self.name
    }
}

pub fn base_identity(image: &str) -> String {
    ImageReference::parse(image).name
}
