//! Bridge-marker addressing.
//!
//! Thread, sender and message identifiers of the form `LLC:<native>` belong
//! to this bridge; anything else belongs to the legacy backend.

/// Prefix that marks an identifier as addressing the LLC bridge.
pub const BRIDGE_MARKER: &str = "LLC:";

/// Which backend an identifier addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address<'a> {
    /// Native LLC identifier with the marker stripped.
    Bridge(&'a str),
    /// Legacy identifier, unchanged.
    Legacy(&'a str),
}

impl<'a> Address<'a> {
    pub fn parse(id: &'a str) -> Self {
        match id.strip_prefix(BRIDGE_MARKER) {
            Some(native) => Address::Bridge(native),
            None => Address::Legacy(id),
        }
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self, Address::Bridge(_))
    }
}

/// Prefix a native identifier with the bridge marker.
pub fn bridge_id(native: &str) -> String {
    format!("{BRIDGE_MARKER}{native}")
}

/// The identifier with its first marker-length characters removed, as
/// synthesized thread names are derived.
pub fn strip_marker_len(id: &str) -> String {
    id.chars().skip(BRIDGE_MARKER.chars().count()).collect()
}
