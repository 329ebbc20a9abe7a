//! C3 (detection half) — per-conversation vendor format detection.

use keeper_core::types::VendorFormat;

/// A conversation object is vendor-A iff it has a `mapping` object,
/// vendor-B iff it has a `chat_messages` array; otherwise unknown.
pub fn detect_format(conversation: &serde_json::Value) -> VendorFormat {
    if conversation.get("mapping").is_some_and(|v| v.is_object()) {
        VendorFormat::VendorA
    } else if conversation
        .get("chat_messages")
        .is_some_and(|v| v.is_array())
    {
        VendorFormat::VendorB
    } else {
        VendorFormat::Unknown
    }
}

/// Tracks the "locked" format label across a stream of conversations: the
/// first non-unknown detection wins and is reported for the whole input,
/// even though detection itself stays per-conversation.
#[derive(Debug, Default)]
pub struct FormatLock {
    locked: Option<VendorFormat>,
}

impl FormatLock {
    pub fn new() -> Self {
        Self { locked: None }
    }

    /// Records a per-conversation detection and returns it unchanged; the
    /// lock only affects `reported_format()`.
    pub fn observe(&mut self, detected: VendorFormat) -> VendorFormat {
        if self.locked.is_none() && detected != VendorFormat::Unknown {
            self.locked = Some(detected);
        }
        detected
    }

    pub fn reported_format(&self) -> VendorFormat {
        self.locked.unwrap_or(VendorFormat::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_vendor_a_by_mapping_object() {
        let v = json!({"mapping": {}});
        assert_eq!(detect_format(&v), VendorFormat::VendorA);
    }

    #[test]
    fn detects_vendor_b_by_chat_messages_array() {
        let v = json!({"chat_messages": []});
        assert_eq!(detect_format(&v), VendorFormat::VendorB);
    }

    #[test]
    fn unknown_when_neither_key_present() {
        let v = json!({"title": "hi"});
        assert_eq!(detect_format(&v), VendorFormat::Unknown);
    }

    #[test]
    fn lock_sticks_to_first_non_unknown_detection() {
        let mut lock = FormatLock::new();
        assert_eq!(lock.observe(VendorFormat::Unknown), VendorFormat::Unknown);
        assert_eq!(lock.observe(VendorFormat::VendorB), VendorFormat::VendorB);
        assert_eq!(lock.observe(VendorFormat::VendorA), VendorFormat::VendorA);
        assert_eq!(lock.reported_format(), VendorFormat::VendorB);
    }
}
