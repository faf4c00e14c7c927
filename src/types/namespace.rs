//! Logical storage partitions on a service node.
//!
//! A namespace is a small signed integer; `All` is a special value used by
//! delete-scoped operations and serializes distinctly from any concrete
//! numeric namespace.

use serde::{Deserialize, Serialize, Serializer};

/// A logical message partition on a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "i16")]
pub enum Namespace {
    /// Standard messages (0)
    Default,

    /// Config messages (5)
    Config,

    /// Legacy closed group messages (-10); reads are unauthenticated
    LegacyGroup,

    /// Every namespace at once; only valid for delete-scoped operations
    All,

    /// Any other concrete partition number
    Other(i16),
}

impl Namespace {
    /// The concrete partition number, if this namespace has one
    pub fn value(&self) -> Option<i16> {
        match self {
            Namespace::Default => Some(0),
            Namespace::Config => Some(5),
            Namespace::LegacyGroup => Some(-10),
            Namespace::All => None,
            Namespace::Other(value) => Some(*value),
        }
    }

    /// Rendering used inside canonical signature strings: `All` is the
    /// literal "all", `Default` the empty string, anything else decimal.
    pub fn signature_component(&self) -> String {
        match self {
            Namespace::All => "all".to_string(),
            Namespace::Default => String::new(),
            other => other.value().expect("concrete namespace").to_string(),
        }
    }

    /// Whether reads from this namespace must be signed.
    ///
    /// Kept explicit rather than inferred: getting this wrong changes wire
    /// compatibility. Legacy closed group reads are the one unauthenticated
    /// case.
    pub fn requires_read_auth(&self) -> bool {
        !matches!(self, Namespace::LegacyGroup)
    }
}

impl From<i16> for Namespace {
    fn from(value: i16) -> Self {
        match value {
            0 => Namespace::Default,
            5 => Namespace::Config,
            -10 => Namespace::LegacyGroup,
            other => Namespace::Other(other),
        }
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // `all` goes over the wire as a string, concrete namespaces as
        // numbers, so the two can never be confused server-side.
        match self.value() {
            None => serializer.serialize_str("all"),
            Some(value) => serializer.serialize_i16(value),
        }
    }
}
