//! Turning queued mutations into one push per record.

use std::collections::HashMap;

use crate::models::{Mutation, MutationAction, RecordId, RecordKind};

/// What the server should end up with for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Upsert,
    Delete,
}

impl From<MutationAction> for Intent {
    fn from(action: MutationAction) -> Self {
        match action {
            MutationAction::Save => Self::Upsert,
            MutationAction::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOp {
    pub kind: RecordKind,
    pub record_id: RecordId,
    pub intent: Intent,
    /// Highest queue entry this op covers; `None` when found by a table scan.
    pub up_to_seq: Option<i64>,
    /// How many queue entries were folded into this op.
    pub entries: usize,
}

/// Ordered list of pushes for one sync pass.
///
/// Only the last intent per record is kept. Records with no queue entry are
/// picked up from two scans: unsynced rows become upserts, and records the
/// server still holds after a local delete become deletes. Animals come
/// before care records so a care record can reference its parent's server
/// id; within a kind, records keep the order in which they first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    ops: Vec<PlannedOp>,
}

impl SyncPlan {
    #[must_use]
    pub fn build(
        mutations: &[Mutation],
        unsynced: &[(RecordKind, RecordId)],
        orphaned: &[(RecordKind, RecordId)],
    ) -> Self {
        let mut ordered: Vec<&Mutation> = mutations.iter().collect();
        ordered.sort_by_key(|mutation| mutation.seq);

        let mut ops: Vec<PlannedOp> = Vec::new();
        let mut index: HashMap<(RecordKind, RecordId), usize> = HashMap::new();

        for mutation in ordered {
            let key = (mutation.kind, mutation.record_id);
            if let Some(&position) = index.get(&key) {
                let op = &mut ops[position];
                op.intent = mutation.action.into();
                op.up_to_seq = Some(mutation.seq);
                op.entries += 1;
            } else {
                index.insert(key, ops.len());
                ops.push(PlannedOp {
                    kind: mutation.kind,
                    record_id: mutation.record_id,
                    intent: mutation.action.into(),
                    up_to_seq: Some(mutation.seq),
                    entries: 1,
                });
            }
        }

        let scanned = unsynced
            .iter()
            .map(|&key| (key, Intent::Upsert))
            .chain(orphaned.iter().map(|&key| (key, Intent::Delete)));
        for ((kind, record_id), intent) in scanned {
            if index.contains_key(&(kind, record_id)) {
                continue;
            }
            index.insert((kind, record_id), ops.len());
            ops.push(PlannedOp {
                kind,
                record_id,
                intent,
                up_to_seq: None,
                entries: 0,
            });
        }

        // Stable: first-appearance order survives within each kind
        ops.sort_by_key(|op| op.kind);

        Self { ops }
    }

    pub fn ops(&self) -> &[PlannedOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
