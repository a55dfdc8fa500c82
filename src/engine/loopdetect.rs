//! Loop Detector - flags agents replaying the same message.
//!
//! Each message is fingerprinted and appended to a short per-agent window
//! in the key-value store. A message whose fingerprint already appears
//! three or more times in the window is treated as a loop.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::domain::AgentMessage;
use crate::storage::KvStore;

/// Window length: fingerprints of the last N messages.
const WINDOW_LEN: usize = 10;

/// Window TTL, re-armed on every message.
const WINDOW_TTL: Duration = Duration::from_secs(300);

/// Prior occurrences at which the new message counts as a loop.
const LOOP_THRESHOLD: usize = 3;

/// Length of the hex fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Rolling-window repetition detector.
pub struct LoopDetector {
    kv: Arc<dyn KvStore>,
}

impl LoopDetector {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Record a message and report whether it closes a loop.
    ///
    /// Reads the current window, counts prior occurrences of the new
    /// fingerprint, prepends it, trims to the window length, and re-arms
    /// the TTL. Returns true when the fingerprint already appeared
    /// `LOOP_THRESHOLD` or more times.
    pub async fn check_and_record(&self, agent_id: &str, message: &AgentMessage) -> bool {
        let fingerprint = Self::fingerprint(message);
        let key = format!("agent:messages:{}", agent_id);

        let window = self.kv.list_range(&key).await;
        let prior = window.iter().filter(|f| **f == fingerprint).count();

        self.kv
            .list_prepend(&key, &fingerprint, WINDOW_LEN, WINDOW_TTL)
            .await;

        prior >= LOOP_THRESHOLD
    }

    /// Short fingerprint over the identifying fields of a message.
    ///
    /// The serialization is canonical: fixed field order {type, content,
    /// targetAgentId}, so equal messages always hash equally.
    pub fn fingerprint(message: &AgentMessage) -> String {
        let canonical = serde_json::json!({
            "type": message.kind.to_string(),
            "content": message.content,
            "targetAgentId": message.target_agent_id,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)[..FINGERPRINT_LEN].to_string()
    }
}
