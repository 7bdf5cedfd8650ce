//! Echo suppression and deduplication rules for clipboard sync.
//!
//! [`SyncLedger`] remembers what this device last sent, last applied and
//! last saw on the relay, and decides for each local change or remote item
//! whether it should go through. Time is passed in so the rules can be
//! tested without sleeping.

use clip_types::{DeviceId, ItemId};
use std::time::{Duration, Instant};

/// Default window after a remote apply during which the same text coming
/// back from the local clipboard is treated as an echo.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(2);

/// What to do with a local clipboard change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Encrypt and upload it.
    Upload,
    /// Empty text is never synced.
    SkipEmpty,
    /// It is the text we just applied from the relay.
    SuppressedEcho,
    /// It is the text we last uploaded.
    Duplicate,
}

/// First-stage verdict on a remote item, before decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDecision {
    /// First observation since start; recorded, not applied.
    Primed,
    /// Same item as last time.
    AlreadySeen,
    /// Uploaded by this device.
    OwnOrigin,
    /// New item from the counterpart; decrypt it.
    Decrypt,
}

/// Final verdict on a decrypted remote item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDecision {
    /// Write it to the system clipboard.
    Apply,
    /// Same text as the last applied item.
    SameAsApplied,
}

/// Per-engine sync bookkeeping.
#[derive(Clone)]
pub struct SyncLedger {
    echo_window: Duration,
    last_sent_text: Option<String>,
    last_applied_text: Option<String>,
    last_seen_item_id: Option<ItemId>,
    suppress_until: Option<Instant>,
    primed: bool,
}

impl SyncLedger {
    /// Create an empty ledger.
    pub fn new(echo_window: Duration) -> Self {
        Self {
            echo_window,
            last_sent_text: None,
            last_applied_text: None,
            last_seen_item_id: None,
            suppress_until: None,
            primed: false,
        }
    }

    /// Decide whether a local change should be uploaded.
    pub fn check_outbound(&self, text: &str, now: Instant) -> OutboundDecision {
        if text.is_empty() {
            return OutboundDecision::SkipEmpty;
        }
        if self.is_suppressing(now) && self.last_applied_text.as_deref() == Some(text) {
            return OutboundDecision::SuppressedEcho;
        }
        if self.last_sent_text.as_deref() == Some(text) {
            return OutboundDecision::Duplicate;
        }
        OutboundDecision::Upload
    }

    /// Record a successful upload.
    pub fn record_sent(&mut self, text: &str) {
        self.last_sent_text = Some(text.to_string());
    }

    /// Record that the relay has no item yet.
    ///
    /// The first poll result primes the ledger even when empty, so the
    /// first real item after that is treated as new.
    pub fn observe_empty(&mut self) {
        self.primed = true;
    }

    /// Decide what to do with a remote item before decrypting it.
    pub fn check_inbound(
        &mut self,
        item_id: &ItemId,
        source: &DeviceId,
        local: &DeviceId,
    ) -> InboundDecision {
        if !self.primed {
            self.primed = true;
            self.last_seen_item_id = Some(item_id.clone());
            return InboundDecision::Primed;
        }
        if self.last_seen_item_id.as_ref() == Some(item_id) {
            return InboundDecision::AlreadySeen;
        }
        if source == local {
            self.last_seen_item_id = Some(item_id.clone());
            return InboundDecision::OwnOrigin;
        }
        InboundDecision::Decrypt
    }

    /// Mark an item as handled without applying it (e.g. it failed to decrypt).
    pub fn mark_seen(&mut self, item_id: &ItemId) {
        self.last_seen_item_id = Some(item_id.clone());
    }

    /// Decide whether decrypted text should be applied, and record it if so.
    pub fn apply(&mut self, item_id: &ItemId, text: &str, now: Instant) -> ApplyDecision {
        self.last_seen_item_id = Some(item_id.clone());
        if self.last_applied_text.as_deref() == Some(text) {
            return ApplyDecision::SameAsApplied;
        }
        self.suppress_until = Some(now + self.echo_window);
        self.last_applied_text = Some(text.to_string());
        ApplyDecision::Apply
    }

    /// Whether the echo window of the last apply is still open.
    pub fn is_suppressing(&self, now: Instant) -> bool {
        self.suppress_until.map_or(false, |until| now < until)
    }

    /// Whether the first poll result has been seen.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Last remote item handled.
    pub fn last_seen_item_id(&self) -> Option<&ItemId> {
        self.last_seen_item_id.as_ref()
    }
}

impl Default for SyncLedger {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_WINDOW)
    }
}

// Clipboard contents stay out of logs
impl std::fmt::Debug for SyncLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLedger")
            .field("echo_window", &self.echo_window)
            .field("has_last_sent", &self.last_sent_text.is_some())
            .field("has_last_applied", &self.last_applied_text.is_some())
            .field("last_seen_item_id", &self.last_seen_item_id)
            .field("suppress_until", &self.suppress_until)
            .field("primed", &self.primed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> DeviceId {
        DeviceId::new("me")
    }

    fn peer() -> DeviceId {
        DeviceId::new("peer")
    }

    fn item(id: &str) -> ItemId {
        ItemId::new(id)
    }

    fn primed_ledger() -> SyncLedger {
        let mut ledger = SyncLedger::default();
        ledger.observe_empty();
        ledger
    }

    // ===========================================
    // Outbound
    // ===========================================

    #[test]
    fn fresh_text_is_uploaded() {
        let ledger = SyncLedger::default();
        assert_eq!(
            ledger.check_outbound("hello", Instant::now()),
            OutboundDecision::Upload
        );
    }

    #[test]
    fn empty_text_is_skipped() {
        let ledger = SyncLedger::default();
        assert_eq!(
            ledger.check_outbound("", Instant::now()),
            OutboundDecision::SkipEmpty
        );
    }

    #[test]
    fn repeated_text_is_duplicate() {
        let mut ledger = SyncLedger::default();
        ledger.record_sent("hello");
        assert_eq!(
            ledger.check_outbound("hello", Instant::now()),
            OutboundDecision::Duplicate
        );
        assert_eq!(
            ledger.check_outbound("other", Instant::now()),
            OutboundDecision::Upload
        );
    }

    #[test]
    fn applied_text_is_suppressed_inside_window() {
        let mut ledger = primed_ledger();
        let t0 = Instant::now();
        assert_eq!(ledger.check_inbound(&item("c1"), &peer(), &me()), InboundDecision::Decrypt);
        assert_eq!(ledger.apply(&item("c1"), "X", t0), ApplyDecision::Apply);

        let inside = t0 + Duration::from_millis(1500);
        assert_eq!(ledger.check_outbound("X", inside), OutboundDecision::SuppressedEcho);
        assert_eq!(ledger.check_outbound("Y", inside), OutboundDecision::Upload);
    }

    #[test]
    fn applied_text_uploads_after_window() {
        let mut ledger = primed_ledger();
        let t0 = Instant::now();
        ledger.apply(&item("c1"), "X", t0);
        let after = t0 + DEFAULT_ECHO_WINDOW + Duration::from_millis(1);
        assert!(!ledger.is_suppressing(after));
        assert_eq!(ledger.check_outbound("X", after), OutboundDecision::Upload);
    }

    // ===========================================
    // Inbound
    // ===========================================

    #[test]
    fn first_item_primes_without_applying() {
        let mut ledger = SyncLedger::default();
        assert_eq!(
            ledger.check_inbound(&item("old"), &peer(), &me()),
            InboundDecision::Primed
        );
        assert!(ledger.is_primed());
        assert_eq!(ledger.last_seen_item_id(), Some(&item("old")));
        assert_eq!(
            ledger.check_inbound(&item("old"), &peer(), &me()),
            InboundDecision::AlreadySeen
        );
    }

    #[test]
    fn empty_first_result_primes() {
        let mut ledger = SyncLedger::default();
        ledger.observe_empty();
        assert_eq!(
            ledger.check_inbound(&item("c1"), &peer(), &me()),
            InboundDecision::Decrypt
        );
    }

    #[test]
    fn own_items_are_ignored() {
        let mut ledger = primed_ledger();
        assert_eq!(
            ledger.check_inbound(&item("c1"), &me(), &me()),
            InboundDecision::OwnOrigin
        );
    }

    #[test]
    fn undecryptable_item_is_not_retried() {
        let mut ledger = primed_ledger();
        assert_eq!(ledger.check_inbound(&item("bad"), &peer(), &me()), InboundDecision::Decrypt);
        ledger.mark_seen(&item("bad"));
        assert_eq!(
            ledger.check_inbound(&item("bad"), &peer(), &me()),
            InboundDecision::AlreadySeen
        );
    }

    #[test]
    fn same_text_in_new_item_is_not_reapplied() {
        let mut ledger = primed_ledger();
        let now = Instant::now();
        assert_eq!(ledger.apply(&item("c1"), "X", now), ApplyDecision::Apply);
        assert_eq!(
            ledger.check_inbound(&item("c2"), &peer(), &me()),
            InboundDecision::Decrypt
        );
        assert_eq!(ledger.apply(&item("c2"), "X", now), ApplyDecision::SameAsApplied);
        assert_eq!(ledger.last_seen_item_id(), Some(&item("c2")));
    }

    #[test]
    fn debug_hides_clipboard_text() {
        let mut ledger = SyncLedger::default();
        ledger.record_sent("super secret otp 123456");
        let debug = format!("{:?}", ledger);
        assert!(!debug.contains("123456"));
    }
}
