//! Per-invocation context.
//!
//! Every top-level call creates its own [`CallContext`] and passes it down
//! explicitly; nothing about the current call lives in global state, so
//! concurrent calls on a shared thread pool stay isolated.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::{Span, info_span};

use crate::core::types::Metadata;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: String,
    /// Keyword overrides forwarded to the model on every attempt of this call.
    pub kwargs: Map<String, Value>,
    /// Handed to every validator of this call.
    pub metadata: Metadata,
    pub span: Span,
}

impl CallContext {
    pub fn new(kwargs: Map<String, Value>, metadata: Metadata, num_reasks: u32) -> Self {
        let call_id = format!("call-{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed));
        let span = info_span!("guard_call", call_id = %call_id, num_reasks);
        Self {
            call_id,
            kwargs,
            metadata,
            span,
        }
    }
}
