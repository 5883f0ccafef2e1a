//! Resource activity tracking.
//!
//! Every network resource the engine reports gets a [`ResourceRecord`]
//! keyed by its id. The in-flight counter is the sole input to the
//! quiet-period debounce: each transition to zero is reported as
//! [`Activity::Idle`].

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::engine::{ReplyMeta, ReplyStage, RequestMeta, ResourceId};

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub request: RequestMeta,
    pub start_reply: Option<ReplyMeta>,
    pub end_reply: Option<ReplyMeta>,
    terminated: bool,
}

impl ResourceRecord {
    fn new(request: RequestMeta) -> Self {
        Self {
            request,
            start_reply: None,
            end_reply: None,
            terminated: false,
        }
    }

    /// Request, start reply and end reply are all present.
    pub fn complete(&self) -> Option<(&RequestMeta, &ReplyMeta, &ReplyMeta)> {
        match (&self.start_reply, &self.end_reply) {
            (Some(start), Some(end)) => Some((&self.request, start, end)),
            _ => None,
        }
    }
}

/// What a lifecycle event did to the in-flight count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A new request started; the quiet period restarts.
    Busy,
    /// The count just dropped to zero.
    Idle,
    /// Nothing the scheduler cares about.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct ResourceTracker {
    records: HashMap<ResourceId, ResourceRecord>,
    order: Vec<ResourceId>,
    in_flight: usize,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn on_request_started(&mut self, id: ResourceId, request: RequestMeta) -> Activity {
        trace!(%id, url = %request.url, "request started");
        match self.records.get_mut(&id) {
            // Redirect hops reuse the id of a resource that is still in flight.
            Some(existing) if !existing.terminated => {
                *existing = ResourceRecord::new(request);
            }
            Some(existing) => {
                *existing = ResourceRecord::new(request);
                self.in_flight += 1;
            }
            None => {
                self.records.insert(id.clone(), ResourceRecord::new(request));
                self.order.push(id);
                self.in_flight += 1;
            }
        }
        Activity::Busy
    }

    pub fn on_reply_stage(
        &mut self,
        id: &str,
        stage: Option<ReplyStage>,
        reply: Option<ReplyMeta>,
    ) -> Activity {
        let Some(record) = self.records.get_mut(id) else {
            debug!(%id, "reply for unknown resource ignored");
            return Activity::Unchanged;
        };
        match (stage, reply) {
            (Some(ReplyStage::Start), Some(reply)) => record.start_reply = Some(reply),
            (Some(ReplyStage::End), Some(reply)) => record.end_reply = Some(reply),
            _ => {}
        }
        if stage == Some(ReplyStage::Start) || record.terminated {
            return Activity::Unchanged;
        }
        record.terminated = true;
        self.in_flight = self.in_flight.saturating_sub(1);
        trace!(%id, in_flight = self.in_flight, "resource finished");
        if self.in_flight == 0 {
            Activity::Idle
        } else {
            Activity::Unchanged
        }
    }

    /// Records in the order they were first requested.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Owned copy of the records for the assembler.
    pub fn snapshot(&self) -> Vec<ResourceRecord> {
        self.records().cloned().collect()
    }
}
