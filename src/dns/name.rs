use std::fmt;

/// An owned dotted DNS name, canonical with a trailing dot.
///
/// The empty (root) name is the single dot. Names compare and hash on their
/// canonical text, so `"a.b"` and `"a.b."` are the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Build a name from dotted text, appending the trailing dot if absent.
    pub fn from_dotted(name: impl Into<String>) -> Name {
        let mut name = name.into();
        if !name.ends_with('.') {
            name.push('.');
        }
        Name(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Non-empty labels, left to right.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|label| !label.is_empty())
    }

    /// Uncompressed wire size: each label costs its length plus one length
    /// byte, plus the terminating zero.
    pub fn encoded_len(&self) -> usize {
        self.labels().map(|label| label.len() + 1).sum::<usize>() + 1
    }

    /// The name with its first label removed, or `None` at the root.
    pub fn parent(&self) -> Option<Name> {
        let rest = self.0.split_once('.')?.1;
        if rest.is_empty() {
            None
        } else {
            Some(Name(rest.to_owned()))
        }
    }

    /// Prepend `label` to this name.
    pub fn prepend(&self, label: &str) -> Name {
        if self.is_root() {
            Name(format!("{}.", label))
        } else {
            Name(format!("{}.{}", label, self.0))
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Name {
        Name::from_dotted(name)
    }
}

impl From<String> for Name {
    fn from(name: String) -> Name {
        Name::from_dotted(name)
    }
}
