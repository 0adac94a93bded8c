// src/events.rs
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Selector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PaymasterEvent {
    SenderStatusUpdated {
        sender: Address,
        allowed: bool,
    },
    OperationStatusUpdated {
        operation: Selector,
        allowed: bool,
    },
    UserOperationSponsored {
        sender: Address,
        operation: Selector,
        actual_gas_cost: U256,
    },
    Deposited {
        from: Address,
        amount: U256,
        total_deposit: U256,
    },
    Withdrawn {
        to: Address,
        amount: U256,
    },
    StakeLocked {
        total_staked: U256,
        unstake_delay_sec: u64,
    },
    StakeUnlocked {
        withdraw_time: u64,
    },
    StakeWithdrawn {
        to: Address,
        amount: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub event: PaymasterEvent,
}

/// Append-only audit trail for off-chain reconciliation.
#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn emit(&mut self, event: PaymasterEvent) {
        let seq = self.records.len() as u64;
        info!(seq, ?event, "event");
        self.records.push(EventRecord { seq, event });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `seq >= from`, oldest first.
    pub fn events_since(&self, from: u64) -> &[EventRecord] {
        let start = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_dense() {
        let mut log = EventLog::default();
        log.emit(PaymasterEvent::StakeUnlocked { withdraw_time: 1 });
        log.emit(PaymasterEvent::StakeUnlocked { withdraw_time: 2 });
        let seqs: Vec<u64> = log.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn events_since_clamps_past_the_end() {
        let mut log = EventLog::default();
        log.emit(PaymasterEvent::StakeUnlocked { withdraw_time: 1 });
        assert_eq!(log.events_since(0).len(), 1);
        assert_eq!(log.events_since(1).len(), 0);
        assert_eq!(log.events_since(u64::MAX).len(), 0);
    }

    #[test]
    fn records_serialize_flat_with_event_tag() {
        let record = EventRecord {
            seq: 3,
            event: PaymasterEvent::SenderStatusUpdated {
                sender: Address::zero(),
                allowed: true,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["event"], "senderStatusUpdated");
        assert_eq!(json["allowed"], true);
    }
}
